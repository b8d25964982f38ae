//! Code-generation backends.
//!
//! The translator stops at the IR. Lowering it to code for a hardware target
//! is the job of an external code generator, reached through the
//! [`BackendAdapter`] seam.

use std::fmt;
use std::io::Write;
use std::process::{Command, Stdio};
use std::str::FromStr;

use log::{debug, info};

use crate::errors::{DuskError, ErrorKind};
use crate::ir::StencilIrDocument;

/// Program invoked by [`ExternalCodegen`] unless configured otherwise.
pub const DEFAULT_CODEGEN: &str = "dawn-codegen";

/// Target selector for code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    IcoNaive,
    IcoCuda,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Self::IcoNaive, Self::IcoCuda];

    pub const fn selector(self) -> &'static str {
        match self {
            Self::IcoNaive => "ico-naive",
            Self::IcoCuda => "ico-cuda",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.selector())
    }
}

impl FromStr for Backend {
    type Err = DuskError;

    fn from_str(selector: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|backend| backend.selector() == selector)
            .ok_or_else(|| {
                let expected = Self::ALL.map(Backend::selector).join(", ");
                DuskError::unspanned(ErrorKind::UnknownBackend {
                    selector: selector.to_string(),
                    expected,
                })
            })
    }
}

/// Lowers a translated document to target code.
pub trait BackendAdapter {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    fn generate(
        &self,
        document: &StencilIrDocument,
        backend: Backend,
        verbose: bool,
    ) -> Result<String, DuskError>;
}

/// Runs an external code generator: the serialized IR is written to its
/// standard input and the generated code is read from its standard output.
///
/// The program is invoked as `<program> --backend <selector> [--verbose]`.
#[derive(Debug, Clone)]
pub struct ExternalCodegen {
    program: String,
}

impl ExternalCodegen {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for ExternalCodegen {
    fn default() -> Self {
        Self::new(DEFAULT_CODEGEN)
    }
}

impl BackendAdapter for ExternalCodegen {
    fn name(&self) -> &str {
        &self.program
    }

    fn generate(
        &self,
        document: &StencilIrDocument,
        backend: Backend,
        verbose: bool,
    ) -> Result<String, DuskError> {
        let input = serde_json::to_string(document)
            .map_err(|e| DuskError::backend(&self.program, format!("cannot serialize IR: {e}")))?;

        let mut command = Command::new(&self.program);
        command.arg("--backend").arg(backend.selector());
        if verbose {
            command.arg("--verbose");
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!("running {command:?}");

        let mut child = command
            .spawn()
            .map_err(|e| DuskError::backend(&self.program, format!("cannot start: {e}")))?;

        // stdin is fed concurrently with draining stdout
        let writer = child.stdin.take().map(|mut stdin| {
            std::thread::spawn(move || stdin.write_all(input.as_bytes()))
        });
        let output = child
            .wait_with_output()
            .map_err(|e| DuskError::backend(&self.program, e.to_string()))?;
        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {}
                // the child may exit without reading all of it
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => {
                    return Err(DuskError::backend(
                        &self.program,
                        format!("cannot write IR: {e}"),
                    ))
                }
                Err(_) => {
                    return Err(DuskError::backend(&self.program, "IR writer thread panicked"))
                }
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let status = match output.status.code() {
                Some(code) => format!("exit code {code}"),
                None => "terminated by a signal".to_string(),
            };
            return Err(DuskError::backend(
                &self.program,
                format!("{status}: {}", stderr.trim()),
            ));
        }

        let code = String::from_utf8(output.stdout).map_err(|_| {
            DuskError::backend(&self.program, "generated code is not valid UTF-8")
        })?;
        info!(
            "{} generated {} bytes of {} code",
            self.program,
            code.len(),
            backend
        );
        Ok(code)
    }
}
