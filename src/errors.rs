//! Dusk Error Handling
//!
//! One error type for the whole pipeline. A `DuskError` carries what went wrong
//! (`ErrorKind`), where it happened (`SourceInfo`, absent for configuration and
//! I/O failures) and how to help (`DiagnosticInfo`). Rendering goes through
//! miette at the CLI boundary.

use std::{fmt, sync::Arc};

use miette::{Diagnostic, LabeledSpan, NamedSource, SourceSpan};
use thiserror::Error;

use crate::ir::{Intent, LocationType, NEIGHBOR_RELATIONS};
use crate::syntax::Span;

// ============================================================================
// SOURCE CONTEXT
// ============================================================================

/// The source text being translated, together with the path it came from.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub name: String,
    pub content: String,
}

impl SourceContext {
    pub fn from_file(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Convert to NamedSource for use with miette error reporting
    pub fn to_named_source(&self) -> Arc<NamedSource<String>> {
        Arc::new(NamedSource::new(self.name.clone(), self.content.clone()))
    }

    /// 1-based line and column (in characters) of a byte offset.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let mut offset = offset.min(self.content.len());
        while !self.content.is_char_boundary(offset) {
            offset -= 1;
        }
        let before = &self.content[..offset];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let column = before[line_start..].chars().count() + 1;
        (line, column)
    }
}

// ============================================================================
// ERROR DATA
// ============================================================================

/// The single error type
#[derive(Debug)]
pub struct DuskError {
    /// What went wrong
    pub kind: ErrorKind,
    /// Where it happened, when the error is tied to source text
    pub source_info: Option<SourceInfo>,
    /// How to help
    pub diagnostic_info: DiagnosticInfo,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    // Host syntax: the input is not (supported) Python
    #[error("{message}")]
    HostSyntax { message: String },

    // DSL syntax: a recognized stencil breaks the language rules
    #[error("unsupported {construct}")]
    UnsupportedConstruct { construct: String },
    #[error("reference to undeclared name or field '{name}'")]
    UndeclaredField { name: String },
    #[error("{detail}")]
    ShapeMismatch { detail: String },
    #[error("invalid neighbor relation: {target} elements have no {neighbor} neighbors")]
    InvalidNeighborRelation {
        target: LocationType,
        neighbor: LocationType,
    },
    #[error("malformed annotation for '{parameter}': {detail}")]
    MalformedAnnotation { parameter: String, detail: String },
    #[error("field '{field}' has intent {intent} and cannot be written")]
    IntentViolation { field: String, intent: Intent },
    #[error("invalid reduction: {detail}")]
    InvalidReduction { detail: String },
    #[error("{detail}")]
    InvalidConstruct { detail: String },

    // Configuration
    #[error("unknown backend '{selector}' (expected one of: {expected})")]
    UnknownBackend { selector: String, expected: String },
    #[error("{message}")]
    Configuration { message: String },

    // Boundaries
    #[error("cannot {action} '{path}': {message}")]
    Io {
        action: String,
        path: String,
        message: String,
    },
    #[error("backend '{backend}' failed: {message}")]
    Backend { backend: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    HostSyntax,
    DslSyntax,
    Configuration,
    Io,
    Backend,
}

impl ErrorCategory {
    pub const fn describe(self) -> &'static str {
        match self {
            Self::HostSyntax => "host syntax error",
            Self::DslSyntax => "DSL syntax error",
            Self::Configuration => "configuration error",
            Self::Io => "I/O error",
            Self::Backend => "backend error",
        }
    }

    const fn code_prefix(self) -> &'static str {
        match self {
            Self::HostSyntax => "dusk::host",
            Self::DslSyntax => "dusk::dsl",
            Self::Configuration => "dusk::config",
            Self::Io => "dusk::io",
            Self::Backend => "dusk::backend",
        }
    }
}

impl ErrorKind {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::HostSyntax { .. } => ErrorCategory::HostSyntax,

            Self::UnsupportedConstruct { .. }
            | Self::UndeclaredField { .. }
            | Self::ShapeMismatch { .. }
            | Self::InvalidNeighborRelation { .. }
            | Self::MalformedAnnotation { .. }
            | Self::IntentViolation { .. }
            | Self::InvalidReduction { .. }
            | Self::InvalidConstruct { .. } => ErrorCategory::DslSyntax,

            Self::UnknownBackend { .. } | Self::Configuration { .. } => {
                ErrorCategory::Configuration
            }

            Self::Io { .. } => ErrorCategory::Io,
            Self::Backend { .. } => ErrorCategory::Backend,
        }
    }

    /// Get error code suffix for diagnostic codes
    pub const fn code_suffix(&self) -> &'static str {
        match self {
            Self::HostSyntax { .. } => "syntax",
            Self::UnsupportedConstruct { .. } => "unsupported_construct",
            Self::UndeclaredField { .. } => "undeclared_field",
            Self::ShapeMismatch { .. } => "shape_mismatch",
            Self::InvalidNeighborRelation { .. } => "invalid_neighbor_relation",
            Self::MalformedAnnotation { .. } => "malformed_annotation",
            Self::IntentViolation { .. } => "intent_violation",
            Self::InvalidReduction { .. } => "invalid_reduction",
            Self::InvalidConstruct { .. } => "invalid_construct",
            Self::UnknownBackend { .. } => "unknown_backend",
            Self::Configuration { .. } => "invalid_configuration",
            Self::Io { .. } => "io",
            Self::Backend { .. } => "codegen",
        }
    }

    fn primary_label(&self) -> &'static str {
        match self {
            Self::HostSyntax { .. } => "invalid syntax",
            Self::UnsupportedConstruct { .. } => "not supported in stencils",
            Self::UndeclaredField { .. } => "not a field or a local in scope",
            Self::ShapeMismatch { .. } => "shape mismatch",
            Self::InvalidNeighborRelation { .. } => "invalid neighbor relation",
            Self::MalformedAnnotation { .. } => "malformed annotation",
            Self::IntentViolation { .. } => "written here",
            Self::InvalidReduction { .. } => "invalid reduction",
            Self::InvalidConstruct { .. } => "invalid here",
            Self::UnknownBackend { .. }
            | Self::Configuration { .. }
            | Self::Io { .. }
            | Self::Backend { .. } => "here",
        }
    }

    /// Suggested fix shown under the diagnostic.
    pub fn help(&self) -> Option<String> {
        match self {
            Self::UndeclaredField { name } => Some(format!(
                "declare '{name}' as a stencil parameter, or assign it in this block or an enclosing one before reading it"
            )),
            Self::InvalidNeighborRelation { target, .. } => {
                let element = target.element_name();
                let valid: Vec<String> = NEIGHBOR_RELATIONS
                    .iter()
                    .filter(|(from, _)| from == target)
                    .map(|(_, to)| format!("{}({element})", to.iteration_name()))
                    .collect();
                Some(format!("valid neighbor iterations here: {}", valid.join(", ")))
            }
            Self::MalformedAnnotation { parameter, .. } if parameter == "return" => {
                Some("remove the return annotation or write `-> None`".into())
            }
            Self::MalformedAnnotation { .. } => Some(
                "annotate fields as `Cell`, `Field[Cell]` or `Field[Cell, float]` \
                 (any of Vertex, Edge, Cell), optionally wrapped in `In[...]`, `Out[...]` or `InOut[...]`"
                    .into(),
            ),
            Self::IntentViolation { field, .. } => Some(format!(
                "declare '{field}' as `Out[...]` or `InOut[...]` to write it"
            )),
            _ => None,
        }
    }
}

/// Location of a source-bound error
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub source: Arc<NamedSource<String>>,
    pub path: String,
    pub primary_span: SourceSpan,
    pub line: usize,
    pub column: usize,
}

/// Diagnostic enhancement data
#[derive(Debug, Clone)]
pub struct DiagnosticInfo {
    pub help: Option<String>,
    pub error_code: String,
}

// ============================================================================
// CONSTRUCTION
// ============================================================================

/// Context-aware error creation
pub trait ErrorReporting {
    fn report(&self, kind: ErrorKind, span: Span) -> DuskError;

    fn unsupported(&self, construct: impl Into<String>, span: Span) -> DuskError {
        self.report(
            ErrorKind::UnsupportedConstruct {
                construct: construct.into(),
            },
            span,
        )
    }

    fn shape_mismatch(&self, detail: impl Into<String>, span: Span) -> DuskError {
        self.report(
            ErrorKind::ShapeMismatch {
                detail: detail.into(),
            },
            span,
        )
    }

    fn undeclared_field(&self, name: &str, span: Span) -> DuskError {
        self.report(ErrorKind::UndeclaredField { name: name.into() }, span)
    }

    fn invalid(&self, detail: impl Into<String>, span: Span) -> DuskError {
        self.report(
            ErrorKind::InvalidConstruct {
                detail: detail.into(),
            },
            span,
        )
    }

    fn invalid_reduction(&self, detail: impl Into<String>, span: Span) -> DuskError {
        self.report(
            ErrorKind::InvalidReduction {
                detail: detail.into(),
            },
            span,
        )
    }
}

impl ErrorReporting for SourceContext {
    fn report(&self, kind: ErrorKind, span: Span) -> DuskError {
        let (line, column) = self.line_col(span.start);
        let error_code = format!("{}::{}", kind.category().code_prefix(), kind.code_suffix());
        let help = kind.help();
        DuskError {
            kind,
            source_info: Some(SourceInfo {
                source: self.to_named_source(),
                path: self.name.clone(),
                primary_span: SourceSpan::from(span.start..span.end),
                line,
                column,
            }),
            diagnostic_info: DiagnosticInfo {
                help,
                error_code,
            },
        }
    }
}

impl DuskError {
    /// An error that is not tied to a position in the source text.
    pub fn unspanned(kind: ErrorKind) -> Self {
        let error_code = format!("{}::{}", kind.category().code_prefix(), kind.code_suffix());
        let help = kind.help();
        Self {
            kind,
            source_info: None,
            diagnostic_info: DiagnosticInfo {
                help,
                error_code,
            },
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::unspanned(ErrorKind::Configuration {
            message: message.into(),
        })
    }

    pub fn io(action: &str, path: impl fmt::Display, error: std::io::Error) -> Self {
        Self::unspanned(ErrorKind::Io {
            action: action.into(),
            path: path.to_string(),
            message: error.to_string(),
        })
    }

    pub fn backend(backend: &str, message: impl Into<String>) -> Self {
        Self::unspanned(ErrorKind::Backend {
            backend: backend.into(),
            message: message.into(),
        })
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// 1-based (line, column) of the primary span, when the error has one.
    pub fn location(&self) -> Option<(usize, usize)> {
        self.source_info
            .as_ref()
            .map(|info| (info.line, info.column))
    }
}

// ============================================================================
// PRESENTATION
// ============================================================================

impl std::error::Error for DuskError {}

impl fmt::Display for DuskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(info) = &self.source_info {
            write!(f, "{}:{}:{}: ", info.path, info.line, info.column)?;
        }
        write!(f, "{}: {}", self.category().describe(), self.kind)
    }
}

impl Diagnostic for DuskError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(&self.diagnostic_info.error_code))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.diagnostic_info
            .help
            .as_ref()
            .map(|h| Box::new(h) as Box<dyn fmt::Display>)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let info = self.source_info.as_ref()?;
        let label = LabeledSpan::new_with_span(
            Some(self.kind.primary_label().to_string()),
            info.primary_span,
        );
        Some(Box::new(std::iter::once(label)))
    }

    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        self.source_info
            .as_ref()
            .map(|info| &*info.source as &dyn miette::SourceCode)
    }
}

/// Prints a DuskError with full miette diagnostics
pub fn print_error(error: DuskError) {
    let report = miette::Report::new(error);
    eprintln!("{report:?}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_counts_characters() {
        let source = SourceContext::from_file("t.py", "ab\ncdé f\n");
        assert_eq!(source.line_col(0), (1, 1));
        assert_eq!(source.line_col(3), (2, 1));
        // 'f' sits after the two-byte 'é' and a space
        assert_eq!(source.line_col(8), (2, 5));
    }

    #[test]
    fn spanned_errors_carry_path_and_position() {
        let source = SourceContext::from_file("stencils.py", "x = 1\ny = zz\n");
        let error = source.undeclared_field("zz", Span { start: 10, end: 12 });
        assert_eq!(error.category(), ErrorCategory::DslSyntax);
        assert_eq!(error.location(), Some((2, 5)));
        assert_eq!(error.diagnostic_info.error_code, "dusk::dsl::undeclared_field");
        assert_eq!(
            error.to_string(),
            "stencils.py:2:5: DSL syntax error: reference to undeclared name or field 'zz'"
        );
    }

    #[test]
    fn dsl_errors_carry_help() {
        let source = SourceContext::from_file("stencils.py", "out = sum(f for x in edges(edge))\n");
        let error = source.report(
            ErrorKind::InvalidNeighborRelation {
                target: LocationType::Edge,
                neighbor: LocationType::Edge,
            },
            Span { start: 21, end: 32 },
        );
        assert_eq!(
            error.diagnostic_info.help.as_deref(),
            Some("valid neighbor iterations here: vertices(edge), cells(edge)")
        );
        let help = error.help().map(|h| h.to_string());
        assert_eq!(help, error.diagnostic_info.help);

        let error = source.report(
            ErrorKind::Configuration {
                message: "no".into(),
            },
            Span { start: 0, end: 1 },
        );
        assert!(error.diagnostic_info.help.is_none());
    }

    #[test]
    fn unspanned_errors_have_no_location() {
        let error = DuskError::configuration("nothing to do");
        assert_eq!(error.location(), None);
        assert_eq!(error.to_string(), "configuration error: nothing to do");
    }
}
