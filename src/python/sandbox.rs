use std::io::Write as _;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use super::{syntax_error, CodeValidator, Validation, Verdict};

const HEADLESS_PRELUDE: &str = "import matplotlib\n\
matplotlib.use('Agg', force=True)\n\
import matplotlib.pyplot as plt\n\
plt.ioff()\n";

const DISPLAY_IMPORT_TERMS: &[&str] = &["matplotlib", "display", "gui", "tkinter"];

static DISPLAY_TERMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(display|gui|x11|tkinter|qt|show)\b").expect("display term pattern")
});

/// Runs candidate code in a child interpreter with a wall-clock limit.
///
/// The child gets the caller's working directory, a null stdin and a headless matplotlib
/// backend. It is killed when the limit expires.
pub struct PythonSandbox {
    interpreter: String,
    timeout: Duration,
}

impl PythonSandbox {
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }

    async fn execute(&self, code: &str, cwd: &Path) -> Result<Validation> {
        let mut script = tempfile::Builder::new()
            .prefix("agent-check-")
            .suffix(".py")
            .tempfile()
            .context("Failed to create temporary script")?;
        if code.contains("matplotlib") || code.contains("plt.") {
            script.write_all(HEADLESS_PRELUDE.as_bytes())?;
        }
        script.write_all(code.as_bytes())?;
        script.flush()?;

        let mut cmd = tokio::process::Command::new(&self.interpreter);
        cmd.arg(script.path())
            .env("MPLBACKEND", "Agg")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if cwd.is_dir() {
            cmd.current_dir(cwd);
        }
        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to start Python interpreter `{}`", self.interpreter))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.context("Failed to collect interpreter output")?,
            Err(_) => {
                warn!(timeout = ?self.timeout, "code execution timed out");
                return Ok(Validation::new(
                    Verdict::Timeout,
                    format!("Code has runtime errors: execution exceeded {:?}", self.timeout),
                ));
            }
        };

        if output.status.success() {
            return Ok(Validation::new(Verdict::Clean, "Code syntax looks valid."));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(classify_failure(&stderr))
    }
}

#[async_trait]
impl CodeValidator for PythonSandbox {
    async fn validate(&self, code: &str, cwd: &Path) -> Result<Validation> {
        if let Some(position) = syntax_error(code).await? {
            warn!("Code has syntax errors: {}", position);
            return Ok(Validation::new(
                Verdict::SyntaxError,
                format!("Code has syntax errors: {}", position),
            ));
        }
        let validation = self.execute(code, cwd).await?;
        debug!(verdict = ?validation.verdict, "code executed");
        Ok(validation)
    }
}

/// Classify the stderr of a failed run. Display and GUI failures are downgraded to passes.
pub fn classify_failure(stderr: &str) -> Validation {
    let last = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    let (kind, detail) = last.split_once(':').unwrap_or((last, ""));
    let kind = kind.rsplit('.').next().unwrap_or(kind);
    let detail = detail.trim();

    if kind == "ImportError" || kind == "ModuleNotFoundError" {
        let lower = detail.to_lowercase();
        if DISPLAY_IMPORT_TERMS.iter().any(|t| lower.contains(t)) {
            warn!("Import warning (likely display-related): {}", detail);
            return Validation::new(
                Verdict::DisplayWarning,
                "Code syntax looks valid (with display-related import warnings).",
            );
        }
        return Validation::new(Verdict::ImportError, format!("Import error: {}", detail));
    }

    if DISPLAY_TERMS.is_match(detail) {
        warn!("Display-related warning: {}", detail);
        return Validation::new(
            Verdict::DisplayWarning,
            "Code syntax looks valid (with display-related warnings).",
        );
    }

    Validation::new(
        Verdict::RuntimeError,
        format!("Code has runtime errors: {}", stderr.trim_end()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACE: &str = "Traceback (most recent call last):\n  File \"x.py\", line 1, in <module>\n";

    #[test]
    fn test_plain_import_error_fails() {
        let v = classify_failure(&format!(
            "{}ModuleNotFoundError: No module named 'numpyy'\n",
            TRACE
        ));
        assert_eq!(v.verdict, Verdict::ImportError);
        assert_eq!(v.message, "Import error: No module named 'numpyy'");
        assert!(!v.passed());
    }

    #[test]
    fn test_display_import_is_a_warning() {
        let v = classify_failure(&format!("{}ImportError: No module named 'tkinter'\n", TRACE));
        assert_eq!(v.verdict, Verdict::DisplayWarning);
        assert!(v.passed());
    }

    #[test]
    fn test_display_runtime_error_is_a_warning() {
        let v = classify_failure(&format!(
            "{}_tkinter.TclError: no $DISPLAY environment variable\n",
            TRACE
        ));
        assert!(v.passed());
        assert_eq!(
            v.message,
            "Code syntax looks valid (with display-related warnings)."
        );
    }

    #[test]
    fn test_word_boundaries_for_display_terms() {
        let v = classify_failure(&format!("{}NameError: name 'shown_total' is not defined\n", TRACE));
        assert_eq!(v.verdict, Verdict::RuntimeError);
        assert!(v.message.starts_with("Code has runtime errors: Traceback"));
    }

    #[tokio::test]
    async fn test_sandbox_runs_code() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = PythonSandbox::new("python3", Duration::from_secs(30));
        let ok = sandbox.validate("print('hi')\n", dir.path()).await.unwrap();
        assert_eq!(ok.verdict, Verdict::Clean);
        let again = sandbox.validate("print('hi')\n", dir.path()).await.unwrap();
        assert_eq!(again, ok);

        let bad = sandbox.validate("import definitely_missing_mod\n", dir.path()).await.unwrap();
        assert_eq!(bad.verdict, Verdict::ImportError);

        let syntax = sandbox.validate("def f(:\n", dir.path()).await.unwrap();
        assert_eq!(syntax.verdict, Verdict::SyntaxError);
    }

    #[tokio::test]
    async fn test_sandbox_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = PythonSandbox::new("python3", Duration::from_millis(300));
        let v = sandbox
            .validate("import time\ntime.sleep(10)\n", dir.path())
            .await
            .unwrap();
        assert_eq!(v.verdict, Verdict::Timeout);
        assert!(!v.passed());
    }
}
