//! The full transpile pipeline against an in-process backend.

use std::cell::RefCell;
use std::fs;

use dusk::backend::{Backend, BackendAdapter};
use dusk::errors::ErrorCategory;
use dusk::ir::StencilIrDocument;
use dusk::transpile::transpile_with;
use dusk::{DuskError, TranspileOptions};
use tempfile::TempDir;

const SOURCE: &str = r#"@stencil
def copy(src: In[Vertex], dst: Out[Vertex]):
    dst = src
"#;

/// Records what it was asked to generate.
#[derive(Default)]
struct RecordingBackend {
    calls: RefCell<Vec<(String, Backend, bool)>>,
}

impl BackendAdapter for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn generate(
        &self,
        document: &StencilIrDocument,
        backend: Backend,
        verbose: bool,
    ) -> Result<String, DuskError> {
        let names: Vec<_> = document.stencils.iter().map(|s| s.name.clone()).collect();
        self.calls
            .borrow_mut()
            .push((names.join(","), backend, verbose));
        Ok(format!("// {backend}\n"))
    }
}

struct FailingBackend;

impl BackendAdapter for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    fn generate(&self, _: &StencilIrDocument, _: Backend, _: bool) -> Result<String, DuskError> {
        Err(DuskError::backend("failing", "exit code 2: no target"))
    }
}

fn options(dir: &TempDir) -> TranspileOptions {
    let input = dir.path().join("copy.py");
    fs::write(&input, SOURCE).unwrap();
    TranspileOptions::new(input)
}

#[test]
fn translation_only_run_skips_the_backend() {
    let dir = TempDir::new().unwrap();
    let backend = RecordingBackend::default();

    let outcome = transpile_with(&options(&dir), &backend).unwrap();
    assert_eq!(outcome.document.stencils[0].name, "copy");
    assert!(outcome.warnings.is_empty());
    assert!(backend.calls.borrow().is_empty());
}

#[test]
fn ir_and_code_are_written() {
    let dir = TempDir::new().unwrap();
    let mut options = options(&dir);
    let sir = dir.path().join("copy.json");
    let code = dir.path().join("copy.cu");
    options.sir_output = Some(sir.clone());
    options.code_output = Some(code.clone());
    options.backend = Backend::IcoCuda;
    options.verbose = true;

    let backend = RecordingBackend::default();
    transpile_with(&options, &backend).unwrap();

    assert_eq!(
        *backend.calls.borrow(),
        [("copy".to_string(), Backend::IcoCuda, true)]
    );
    assert_eq!(fs::read_to_string(&code).unwrap(), "// ico-cuda\n");
    let document: StencilIrDocument =
        serde_json::from_str(&fs::read_to_string(&sir).unwrap()).unwrap();
    assert_eq!(document.stencils.len(), 1);
}

#[test]
fn backend_failure_keeps_the_written_ir() {
    let dir = TempDir::new().unwrap();
    let mut options = options(&dir);
    let sir = dir.path().join("copy.json");
    options.sir_output = Some(sir.clone());
    options.code_output = Some(dir.path().join("copy.cpp"));

    let error = transpile_with(&options, &FailingBackend).unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Backend);
    assert!(sir.exists());
    assert!(!dir.path().join("copy.cpp").exists());
}

#[test]
fn translation_errors_stop_before_any_output() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("bad.py");
    fs::write(&input, "@stencil\ndef bad(a: In[Cell]):\n    a = 1.0\n").unwrap();
    let sir = dir.path().join("bad.json");
    let mut options = TranspileOptions::new(input);
    options.sir_output = Some(sir.clone());

    let error = transpile_with(&options, &RecordingBackend::default()).unwrap_err();
    assert_eq!(error.category(), ErrorCategory::DslSyntax);
    assert!(!sir.exists());
}

#[test]
fn empty_codegen_name_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut options = options(&dir);
    options.codegen = "  ".into();
    let error = transpile_with(&options, &RecordingBackend::default()).unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Configuration);
}
