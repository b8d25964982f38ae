//! Shared helpers for the integration tests.

#![allow(dead_code)]

use dusk::errors::{DuskError, ErrorKind};
use dusk::grammar::TranslationWarning;
use dusk::ir::{StencilDef, StencilIrDocument};
use dusk::{transpile_source, SourceContext};

pub const FILENAME: &str = "stencils.py";

/// Translates `source`, panicking on error.
pub fn translate(source: &str) -> StencilIrDocument {
    match transpile_source(&SourceContext::from_file(FILENAME, source)) {
        Ok(outcome) => outcome.document,
        Err(e) => panic!("translation failed: {e}"),
    }
}

/// Translates `source` and returns the only stencil in it.
pub fn translate_one(source: &str) -> StencilDef {
    let mut document = translate(source);
    assert_eq!(document.stencils.len(), 1, "expected exactly one stencil");
    document.stencils.remove(0)
}

/// Translates `source` and returns its warnings.
pub fn warnings(source: &str) -> Vec<TranslationWarning> {
    match transpile_source(&SourceContext::from_file(FILENAME, source)) {
        Ok(outcome) => outcome.warnings,
        Err(e) => panic!("translation failed: {e}"),
    }
}

/// Translates `source`, expecting it to fail.
pub fn translate_err(source: &str) -> DuskError {
    match transpile_source(&SourceContext::from_file(FILENAME, source)) {
        Ok(outcome) => panic!(
            "expected an error, got {} stencil(s)",
            outcome.document.stencils.len()
        ),
        Err(e) => e,
    }
}

/// The error kind of a failed translation.
pub fn error_kind(source: &str) -> ErrorKind {
    translate_err(source).kind
}
