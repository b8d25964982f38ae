//! The translation pipeline.
//!
//! source text -> host tree -> recognized stencils -> `StencilDef`s ->
//! `StencilIrDocument`, then optionally JSON on disk and generated code from a
//! backend. The first error aborts the run.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::backend::{Backend, BackendAdapter, ExternalCodegen, DEFAULT_CODEGEN};
use crate::errors::{DuskError, SourceContext};
use crate::grammar::{translate_stencil, TranslationWarning};
use crate::ir::{GridType, StencilDef, StencilIrDocument};
use crate::recognizer::iter_stencils;
use crate::syntax::parse_module;

/// Everything a `transpile` run needs to know.
#[derive(Debug, Clone)]
pub struct TranspileOptions {
    pub input: PathBuf,
    /// Where to write the serialized IR.
    pub sir_output: Option<PathBuf>,
    /// Where to write the generated code.
    pub code_output: Option<PathBuf>,
    pub backend: Backend,
    /// External code generator program.
    pub codegen: String,
    pub verbose: bool,
}

impl TranspileOptions {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            sir_output: None,
            code_output: None,
            backend: Backend::default(),
            codegen: DEFAULT_CODEGEN.to_string(),
            verbose: false,
        }
    }

    /// Reject option combinations that cannot work.
    pub fn validate(&self) -> Result<(), DuskError> {
        if let (Some(sir), Some(code)) = (&self.sir_output, &self.code_output) {
            if sir == code {
                return Err(DuskError::configuration(format!(
                    "the IR and the generated code cannot both be written to '{}'",
                    sir.display()
                )));
            }
        }
        if self.codegen.trim().is_empty() {
            return Err(DuskError::configuration("the code generator program name is empty"));
        }
        Ok(())
    }
}

/// A translated document and the warnings found on the way.
#[derive(Debug, Clone)]
pub struct TranspileOutcome {
    pub document: StencilIrDocument,
    pub warnings: Vec<TranslationWarning>,
}

/// Combine translated stencils into one document.
pub fn make_ir(filename: &str, stencils: Vec<StencilDef>) -> StencilIrDocument {
    StencilIrDocument {
        filename: filename.to_string(),
        grid_type: GridType::Unstructured,
        stencils,
    }
}

/// Translate every stencil of `source`, in declaration order.
pub fn transpile_source(source: &SourceContext) -> Result<TranspileOutcome, DuskError> {
    let module = parse_module(source)?;
    let candidates = iter_stencils(&module, source);
    debug!("{}: {} stencil(s) recognized", source.name, candidates.len());

    let mut stencils = Vec::with_capacity(candidates.len());
    let mut warnings = Vec::new();
    for candidate in candidates {
        let translation = translate_stencil(source, candidate)?;
        stencils.push(translation.stencil);
        warnings.extend(translation.warnings);
    }

    Ok(TranspileOutcome {
        document: make_ir(&source.name, stencils),
        warnings,
    })
}

pub fn read_source(path: &Path) -> Result<SourceContext, DuskError> {
    let content = fs::read_to_string(path).map_err(|e| DuskError::io("read", path.display(), e))?;
    Ok(SourceContext::from_file(path.display().to_string(), content))
}

/// Pretty-printed JSON of a document; identical input gives identical bytes.
pub fn to_json(document: &StencilIrDocument) -> Result<String, DuskError> {
    let mut json = serde_json::to_string_pretty(document)
        .map_err(|e| DuskError::configuration(format!("cannot serialize IR: {e}")))?;
    json.push('\n');
    Ok(json)
}

/// Full run with the external code generator named in `options`.
pub fn transpile(options: &TranspileOptions) -> Result<TranspileOutcome, DuskError> {
    let adapter = ExternalCodegen::new(options.codegen.clone());
    transpile_with(options, &adapter)
}

/// Full run: translate, then write the IR and generate code as requested.
pub fn transpile_with(
    options: &TranspileOptions,
    adapter: &dyn BackendAdapter,
) -> Result<TranspileOutcome, DuskError> {
    options.validate()?;
    let source = read_source(&options.input)?;
    let outcome = transpile_source(&source)?;

    if let Some(path) = &options.sir_output {
        write_file(path, &to_json(&outcome.document)?)?;
        info!("wrote IR to {}", path.display());
    }
    if let Some(path) = &options.code_output {
        info!("generating {} code with {}", options.backend, adapter.name());
        let code = adapter.generate(&outcome.document, options.backend, options.verbose)?;
        write_file(path, &code)?;
        info!("wrote generated code to {}", path.display());
    }

    Ok(outcome)
}

fn write_file(path: &Path, contents: &str) -> Result<(), DuskError> {
    fs::write(path, contents).map_err(|e| DuskError::io("write", path.display(), e))
}
