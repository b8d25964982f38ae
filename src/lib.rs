pub use crate::errors::{DuskError, ErrorKind, SourceContext};
pub use crate::transpile::{transpile, transpile_source, TranspileOptions, TranspileOutcome};

pub mod backend;
pub mod cli;
pub mod errors;
pub mod grammar;
pub mod ir;
pub mod recognizer;
pub mod syntax;
pub mod transpile;
