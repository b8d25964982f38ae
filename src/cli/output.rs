//! Handles all user-facing output for the CLI.
//!
//! Warnings and summaries go to stderr with colour when the terminal supports
//! it; the IR itself goes to stdout untouched so it can be piped.

use std::io::Write;

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::grammar::TranslationWarning;
use crate::ir::StencilIrDocument;

/// Prints translation warnings, one per line.
pub fn print_warnings(warnings: &[TranslationWarning]) {
    if warnings.is_empty() {
        return;
    }
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    for warning in warnings {
        let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)).set_bold(true));
        let _ = write!(stderr, "warning");
        let _ = stderr.reset();
        let _ = writeln!(stderr, ": {warning}");
    }
}

/// Prints a one-line summary of a successful translation.
pub fn print_summary(document: &StencilIrDocument, warnings: usize) {
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Green)).set_bold(true));
    let _ = write!(stderr, "ok");
    let _ = stderr.reset();
    let names: Vec<&str> = document.stencils.iter().map(|s| s.name.as_str()).collect();
    let _ = writeln!(
        stderr,
        ": {}: {} stencil(s) [{}], {} warning(s)",
        document.filename,
        names.len(),
        names.join(", "),
        warnings
    );
}

/// Writes text to stdout.
pub fn print_stdout(text: &str) {
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    let _ = lock.write_all(text.as_bytes());
    let _ = lock.flush();
}
