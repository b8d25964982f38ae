//! Stencil translation.
//!
//! Lowers one recognized stencil definition into a [`StencilDef`]. The
//! signature becomes the field list; the body is walked once in source order,
//! with reduction bodies handled recursively. Any host construct outside the
//! stencil language is rejected with a located DSL error.

use std::fmt;

use log::debug;

use crate::errors::{DuskError, SourceContext};
use crate::ir::{Field, Intent, LocationType, SourceLocation, StencilDef};
use crate::recognizer::StencilCandidate;
use crate::syntax::Span;

mod expressions;
mod scope;
mod signature;
mod statements;

use scope::Scopes;

// ============================================================================
// PUBLIC API
// ============================================================================

/// A non-fatal finding about a translated stencil.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationWarning {
    pub path: String,
    pub stencil: String,
    pub message: String,
    pub loc: SourceLocation,
}

impl fmt::Display for TranslationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}",
            self.path, self.loc.line, self.loc.column, self.message
        )
    }
}

#[derive(Debug, Clone)]
pub struct Translation {
    pub stencil: StencilDef,
    pub warnings: Vec<TranslationWarning>,
}

/// Translate one stencil definition.
pub fn translate_stencil(
    source: &SourceContext,
    candidate: StencilCandidate<'_>,
) -> Result<Translation, DuskError> {
    StencilTranslator::new(source).translate(candidate)
}

// ============================================================================
// TRANSLATOR STATE
// ============================================================================

/// A declared field and how the body uses it.
struct FieldSlot {
    field: Field,
    read: bool,
    written: bool,
}

/// The reduction whose per-neighbor body is being lowered.
#[derive(Debug, Clone)]
struct LoopContext {
    target: LocationType,
    neighbor: LocationType,
    /// Generator loop variable; block reductions have none.
    variable: Option<String>,
    /// First scope frame owned by the reduction body.
    scope_floor: usize,
}

struct StencilTranslator<'a> {
    source: &'a SourceContext,
    fields: Vec<FieldSlot>,
    scopes: Scopes,
    in_loop: Option<LoopContext>,
    /// Location of the enclosing conditions, if any.
    guard: Option<LocationType>,
}

impl<'a> StencilTranslator<'a> {
    fn new(source: &'a SourceContext) -> Self {
        Self {
            source,
            fields: Vec::new(),
            scopes: Scopes::new(),
            in_loop: None,
            guard: None,
        }
    }

    fn translate(mut self, candidate: StencilCandidate<'_>) -> Result<Translation, DuskError> {
        let def = candidate.def;
        debug!("translating stencil '{}'", def.name);

        self.fields = self.signature(def)?;
        let (vertical, stmts) = self.vertical_region(&def.body);
        let body = self.block(stmts)?;

        let warnings = self.usage_warnings(&def.name);
        for warning in &warnings {
            debug!("warning: {warning}");
        }

        let stencil = StencilDef {
            name: def.name.clone(),
            loc: self.location(candidate.span),
            vertical,
            fields: self.fields.into_iter().map(|slot| slot.field).collect(),
            body,
        };
        debug!(
            "stencil '{}': {} field(s), {} statement(s), {:?} vertical order",
            stencil.name,
            stencil.fields.len(),
            stencil.body.len(),
            stencil.vertical
        );

        Ok(Translation { stencil, warnings })
    }

    fn location(&self, span: Span) -> SourceLocation {
        let (line, column) = self.source.line_col(span.start);
        SourceLocation { line, column }
    }

    fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|slot| slot.field.name == name)
    }

    /// Run `f` inside a fresh local scope.
    fn scoped<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, DuskError>,
    ) -> Result<T, DuskError> {
        self.scopes.push();
        let result = f(self);
        self.scopes.pop();
        result
    }

    /// Run `f` as the per-neighbor body of a reduction.
    fn in_reduction<T>(
        &mut self,
        target: LocationType,
        neighbor: LocationType,
        variable: Option<String>,
        f: impl FnOnce(&mut Self) -> Result<T, DuskError>,
    ) -> Result<T, DuskError> {
        let saved_guard = self.guard.take();
        self.in_loop = Some(LoopContext {
            target,
            neighbor,
            variable,
            scope_floor: self.scopes.depth(),
        });
        let result = self.scoped(f);
        self.in_loop = None;
        self.guard = saved_guard;
        result
    }

    // ------------------------------------------------------------------
    // finalization
    // ------------------------------------------------------------------

    fn usage_warnings(&self, stencil: &str) -> Vec<TranslationWarning> {
        self.fields
            .iter()
            .filter_map(|slot| {
                let name = &slot.field.name;
                let message = if !slot.read && !slot.written {
                    format!("field '{name}' is never used in stencil '{stencil}'")
                } else if slot.field.intent == Intent::Output && !slot.written {
                    format!("output field '{name}' is never written in stencil '{stencil}'")
                } else {
                    return None;
                };
                Some(TranslationWarning {
                    path: self.source.name.clone(),
                    stencil: stencil.to_string(),
                    message,
                    loc: slot.field.loc,
                })
            })
            .collect()
    }
}
