//! Stencil recognition.
//!
//! Picks the stencil definitions out of a parsed module. A top-level function
//! is a stencil when it carries the `stencil` decorator and takes plain
//! positional parameters only.

use log::{debug, warn};

use crate::errors::SourceContext;
use crate::syntax::{Expr, ExprKind, FunctionDef, Module, ParamKind, Span, StmtKind};

/// A function definition classified as a stencil.
#[derive(Debug, Clone, Copy)]
pub struct StencilCandidate<'a> {
    pub def: &'a FunctionDef,
    pub span: Span,
}

/// Outcome of classifying one function definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    Stencil,
    NotStencil,
    /// Marked as a stencil, but its parameter list cannot be one.
    BadShape(String),
}

/// Classify a function definition.
pub fn recognize(def: &FunctionDef) -> Recognition {
    if !def.decorators.iter().any(is_stencil_decorator) {
        return Recognition::NotStencil;
    }
    match parameter_shape_problem(def) {
        Some(problem) => Recognition::BadShape(problem),
        None => Recognition::Stencil,
    }
}

/// Top-level stencil definitions of `module`, in source order.
pub fn iter_stencils<'a>(module: &'a Module, source: &SourceContext) -> Vec<StencilCandidate<'a>> {
    let mut stencils = Vec::new();

    for stmt in &module.body {
        let StmtKind::FunctionDef(def) = &stmt.kind else {
            continue;
        };
        match recognize(def) {
            Recognition::Stencil => {
                debug!("recognized stencil '{}'", def.name);
                stencils.push(StencilCandidate {
                    def,
                    span: stmt.span,
                });
            }
            Recognition::NotStencil => {}
            Recognition::BadShape(problem) => {
                let (line, column) = source.line_col(stmt.span.start);
                warn!(
                    "{}:{line}:{column}: skipping '{}': {problem}",
                    source.name, def.name
                );
            }
        }
    }

    stencils
}

/// `stencil`, `dusk.stencil`, `stencil(...)` and `dusk.stencil(...)`.
fn is_stencil_decorator(decorator: &Expr) -> bool {
    match &decorator.kind {
        ExprKind::Name(name) => name == "stencil",
        ExprKind::Attribute { attr, .. } => attr == "stencil",
        ExprKind::Call { func, .. } => is_stencil_decorator(func),
        _ => false,
    }
}

fn parameter_shape_problem(def: &FunctionDef) -> Option<String> {
    if def.is_async {
        return Some("a stencil cannot be a coroutine".into());
    }
    if def.params.is_empty() {
        return Some("a stencil takes at least one field parameter".into());
    }
    for param in &def.params {
        let name = param.name.as_deref().unwrap_or("*");
        match param.kind {
            ParamKind::VarArgs => return Some(format!("variadic parameter '*{name}'")),
            ParamKind::KwArgs => return Some(format!("keyword parameter '**{name}'")),
            ParamKind::KeywordOnly => return Some(format!("keyword-only parameter '{name}'")),
            ParamKind::Positional | ParamKind::PositionalOnly if param.default.is_some() => {
                return Some(format!("parameter '{name}' has a default value"))
            }
            ParamKind::Positional | ParamKind::PositionalOnly => {}
        }
    }
    None
}
