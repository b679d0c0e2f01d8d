//! Static checks for editor canvases
//!
//! A canvas is linted out of process with pylint. Only the issue lines reach
//! the model: banner, score and separator lines are dropped, and the scratch
//! file path is rewritten to `Line ` so the report reads like it came from
//! the canvas itself.

use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Default wall-clock limit for one lint run
pub const DEFAULT_LINT_TIMEOUT: Duration = Duration::from_secs(60);

/// What a lint run found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LintOutcome {
    Clean,
    /// The code does not parse; there is nothing useful to send to the model
    SyntaxError,
    /// Cleaned report, one issue per line
    Issues(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LintError {
    #[error("Lint I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("pylint is not available: {0}")]
    Unavailable(String),
    #[error("pylint did not finish within {0:?}")]
    TimedOut(Duration),
}

#[async_trait]
pub trait CodeLinter: Send + Sync {
    async fn lint(&self, code: &str) -> Result<LintOutcome, LintError>;
}

/// Runs `python -m pylint` on a scratch copy of the code
#[derive(Debug, Clone)]
pub struct Pylint {
    python_bin: String,
    timeout: Duration,
}

impl Default for Pylint {
    fn default() -> Self {
        Self {
            python_bin: "python3".to_string(),
            timeout: DEFAULT_LINT_TIMEOUT,
        }
    }
}

impl Pylint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_python_bin(mut self, python_bin: impl Into<String>) -> Self {
        self.python_bin = python_bin.into();
        self
    }

    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = limit;
        self
    }
}

#[async_trait]
impl CodeLinter for Pylint {
    async fn lint(&self, code: &str) -> Result<LintOutcome, LintError> {
        let mut scratch = tempfile::Builder::new()
            .prefix("canvas_")
            .suffix(".py")
            .tempfile()?;
        scratch.write_all(code.replace("\r\n", "\n").as_bytes())?;
        scratch.flush()?;
        let path = scratch.path().to_string_lossy().into_owned();

        let run = Command::new(&self.python_bin)
            .args(["-m", "pylint", path.as_str()])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = timeout(self.timeout, run)
            .await
            .map_err(|_| LintError::TimedOut(self.timeout))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(status = %output.status, "pylint finished");
        parse_report(&stdout, &stderr, &path)
    }
}

/// Reduce raw pylint output to a [`LintOutcome`].
pub fn parse_report(stdout: &str, stderr: &str, scratch_path: &str) -> Result<LintOutcome, LintError> {
    if stderr.contains("No module named pylint") {
        warn!("pylint is not installed for the configured interpreter");
        return Err(LintError::Unavailable(stderr.trim().to_string()));
    }

    let combined = format!("{stderr}{stdout}").to_ascii_lowercase();
    if combined.contains("syntax-error") {
        return Ok(LintOutcome::SyntaxError);
    }

    let prefix = format!("{scratch_path}:");
    let issues: Vec<String> = stdout
        .lines()
        .filter(|line| {
            !line.trim().is_empty()
                && !line.starts_with(['*', '-'])
                && !line.contains("Your code has been rated")
        })
        .map(|line| line.replace(&prefix, "Line "))
        .collect();

    if issues.is_empty() {
        Ok(LintOutcome::Clean)
    } else {
        Ok(LintOutcome::Issues(issues.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "/tmp/canvas_ab12.py";

    #[test]
    fn test_report_keeps_issue_lines_only() {
        let stdout = "************* Module canvas_ab12\n\
                      /tmp/canvas_ab12.py:1:0: C0114: Missing module docstring (missing-module-docstring)\n\
                      /tmp/canvas_ab12.py:3:4: W0612: Unused variable 'y' (unused-variable)\n\
                      \n\
                      ------------------------------------------------------------------\n\
                      Your code has been rated at 3.33/10\n";

        let outcome = parse_report(stdout, "", PATH).unwrap();
        assert_eq!(
            outcome,
            LintOutcome::Issues(
                "Line 1:0: C0114: Missing module docstring (missing-module-docstring)\n\
                 Line 3:4: W0612: Unused variable 'y' (unused-variable)"
                    .to_string()
            )
        );
    }

    #[test]
    fn test_syntax_error_and_clean() {
        let stdout = "/tmp/canvas_ab12.py:1:5: E0001: Parsing failed: 'invalid syntax' (syntax-error)\n";
        assert_eq!(parse_report(stdout, "", PATH).unwrap(), LintOutcome::SyntaxError);

        let clean = "\n--------------------------------------------------------------------\n\
                     Your code has been rated at 10.00/10\n";
        assert_eq!(parse_report(clean, "", PATH).unwrap(), LintOutcome::Clean);
    }

    #[test]
    fn test_missing_pylint_is_an_error() {
        let result = parse_report("", "/usr/bin/python3: No module named pylint\n", PATH);
        assert!(matches!(result, Err(LintError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_io_error() {
        let linter = Pylint::new().with_python_bin("/nonexistent/python3");
        assert!(matches!(linter.lint("x = 1").await, Err(LintError::Io(_))));
    }
}
