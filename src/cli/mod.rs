//! The dusk Command-Line Interface.
//!
//! This module is the main entry point for all CLI commands and orchestrates
//! the core library functions.

use crate::backend::Backend;
use crate::cli::args::{Command, DuskArgs};
use crate::errors::{print_error, DuskError};
use crate::transpile::{read_source, to_json, transpile, transpile_source, TranspileOptions};
use clap::Parser;
use std::path::PathBuf;
use std::process;

pub mod args;
pub mod output;

/// The main entry point for the CLI.
pub fn run() {
    let args = DuskArgs::parse();
    init_logging(args.verbose);

    // Dispatch to the appropriate subcommand handler.
    let result = match args.command {
        Command::Transpile {
            file,
            sir,
            code,
            backend,
            codegen,
        } => handle_transpile(file, sir, code, &backend, codegen, args.verbose),
        Command::Check { file } => handle_check(&file),
    };

    if let Err(error) = result {
        print_error(error);
        process::exit(1);
    }
}

/// Configure `env_logger`: `RUST_LOG` wins, otherwise `--verbose` selects
/// debug output and the default shows warnings only.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

/// Handles the `transpile` subcommand.
fn handle_transpile(
    file: PathBuf,
    sir: Option<PathBuf>,
    code: Option<PathBuf>,
    backend: &str,
    codegen: String,
    verbose: bool,
) -> Result<(), DuskError> {
    // Validated before any translation work.
    let backend: Backend = backend.parse()?;
    let print_ir = sir.is_none() && code.is_none();

    let options = TranspileOptions {
        input: file,
        sir_output: sir,
        code_output: code,
        backend,
        codegen,
        verbose,
    };
    let outcome = transpile(&options)?;
    output::print_warnings(&outcome.warnings);

    if print_ir {
        output::print_stdout(&to_json(&outcome.document)?);
    }
    Ok(())
}

/// Handles the `check` subcommand.
fn handle_check(file: &std::path::Path) -> Result<(), DuskError> {
    let source = read_source(file)?;
    let outcome = transpile_source(&source)?;
    output::print_warnings(&outcome.warnings);
    output::print_summary(&outcome.document, outcome.warnings.len());
    Ok(())
}
