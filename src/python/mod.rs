//! Validation of generated Python code.
//!
//! A syntax check runs in the embedded interpreter (compile only, nothing executes there).
//! Execution happens in a separate interpreter process, see [`sandbox`].

pub mod sandbox;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use pyo3::exceptions::{PySyntaxError, PyValueError};
use pyo3::prelude::*;
use tracing::debug;

pub use sandbox::PythonSandbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    /// Headless display/GUI failure, counted as a pass.
    DisplayWarning,
    SyntaxError,
    ImportError,
    RuntimeError,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub verdict: Verdict,
    pub message: String,
}

impl Validation {
    pub fn new(verdict: Verdict, message: impl Into<String>) -> Self {
        Self {
            verdict,
            message: message.into(),
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self.verdict, Verdict::Clean | Verdict::DisplayWarning)
    }
}

/// Checks whether a piece of Python code compiles and runs.
///
/// `Err` is reserved for infrastructure failures (no interpreter, cannot spawn). Code that
/// does not work is an `Ok` validation that did not pass.
#[async_trait]
pub trait CodeValidator: Send + Sync {
    async fn validate(&self, code: &str, cwd: &Path) -> Result<Validation>;
}

/// `Some("Line L, Column C: msg")` when `code` does not compile.
pub async fn syntax_error(code: &str) -> Result<Option<String>> {
    let code = code.to_string();
    tokio::task::spawn_blocking(move || compile_check(&code)).await?
}

fn compile_check(code: &str) -> Result<Option<String>> {
    Python::with_gil(|py| {
        let compile = py.import("builtins")?.getattr("compile")?;
        match compile.call1((code, "<string>", "exec")) {
            Ok(_) => Ok(None),
            Err(err) if err.is_instance_of::<PySyntaxError>(py) => {
                let value = err.value(py);
                let line: Option<i64> = value.getattr("lineno")?.extract()?;
                let column: Option<i64> = value.getattr("offset")?.extract()?;
                let msg: String = value.getattr("msg")?.extract()?;
                Ok(Some(format!(
                    "Line {}, Column {}: {}",
                    position(line),
                    position(column),
                    msg
                )))
            }
            // compile() raises ValueError for source containing null bytes
            Err(err) if err.is_instance_of::<PyValueError>(py) => Ok(Some(err.to_string())),
            Err(err) => Err(err.into()),
        }
    })
}

fn position(value: Option<i64>) -> String {
    value.map_or_else(|| "None".to_string(), |v| v.to_string())
}

/// Validate a file written by an action. Only `.py` files are checked.
pub async fn validate_file(validator: &dyn CodeValidator, path: &Path) -> Result<Validation> {
    let is_python = path.extension().is_some_and(|ext| ext == "py");
    if !is_python {
        return Ok(Validation::new(
            Verdict::Clean,
            format!("Skipped validation for non-Python file {}", path.display()),
        ));
    }

    let code = match tokio::fs::read_to_string(path).await {
        Ok(code) => code,
        Err(e) => {
            return Ok(Validation::new(
                Verdict::RuntimeError,
                format!("Could not read {} for validation: {}", path.display(), e),
            ))
        }
    };
    let cwd = path.parent().unwrap_or(Path::new("."));
    let validation = validator.validate(&code, cwd).await?;
    debug!(path = %path.display(), verdict = ?validation.verdict, "file validated");
    Ok(validation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedValidator;

    #[tokio::test]
    async fn test_syntax_error_reports_position() {
        assert_eq!(syntax_error("x = 1\n").await.unwrap(), None);
        let err = syntax_error("x = 1\ndef f(:\n").await.unwrap().unwrap();
        assert!(err.starts_with("Line 2, Column "), "{}", err);
    }

    #[tokio::test]
    async fn test_validate_file_skips_non_python() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "# not python (").unwrap();
        let validator = ScriptedValidator::failing_always("unused");
        let result = validate_file(&validator, &path).await.unwrap();
        assert!(result.passed());
        assert_eq!(validator.calls(), 0);
    }

    #[tokio::test]
    async fn test_validate_file_runs_validator_on_python() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.py");
        std::fs::write(&path, "import nope\n").unwrap();
        let validator = ScriptedValidator::failing_always("Import error: No module named 'nope'");
        let result = validate_file(&validator, &path).await.unwrap();
        assert!(!result.passed());
        assert_eq!(validator.calls(), 1);
    }
}
