//! Defines the command-line arguments and subcommands for the dusk CLI.
//!
//! This module uses the `clap` crate with its "derive" feature to create a
//! declarative and type-safe argument parsing structure.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::backend::DEFAULT_CODEGEN;

/// The main CLI argument structure.
#[derive(Debug, Parser)]
#[command(
    name = "dusk",
    version,
    about = "Translate Python stencil definitions into an unstructured-mesh stencil IR."
)]
pub struct DuskArgs {
    /// Log translation progress and pass --verbose to the code generator.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// An enumeration of all available CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Translate the stencils of a file; print the IR unless an output is given.
    Transpile {
        /// The Python source file containing @stencil functions.
        #[arg(required = true)]
        file: PathBuf,
        /// Write the IR as JSON to this path.
        #[arg(long, value_name = "PATH")]
        sir: Option<PathBuf>,
        /// Generate code with the backend and write it to this path.
        #[arg(short = 'o', long, value_name = "PATH")]
        code: Option<PathBuf>,
        /// Code-generation backend: ico-naive or ico-cuda.
        #[arg(short, long, default_value = "ico-naive")]
        backend: String,
        /// External code generator program.
        #[arg(long, default_value = DEFAULT_CODEGEN, value_name = "PROGRAM")]
        codegen: String,
    },
    /// Translate the stencils of a file and report errors and warnings only.
    Check {
        /// The Python source file containing @stencil functions.
        #[arg(required = true)]
        file: PathBuf,
    },
}
