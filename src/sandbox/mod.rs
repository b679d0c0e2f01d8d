//! Execution sandbox for model-generated code
//!
//! Runs one snippet against a fixed set of bindings and returns what it
//! printed plus any charts it drew. The sandbox knows nothing about retries or
//! conversations; the Code-Fix Agent decides what to do with the result.
//!
//! # Failure signal
//!
//! [`CodeRunner::execute`] never fails. Exceptions, crashes of the worker and
//! timeouts all come back as text carrying [`TRACEBACK_MARKER`], and
//! [`looks_like_failure`] is the one predicate that turns that text into a
//! success/failure decision. A script that prints the marker on purpose is
//! classified as failed; that is an accepted limitation of the convention.
//!
//! # Bindings visible to the code
//!
//! | name | value |
//! |------|-------|
//! | `pd`, `np`, `plt`, `io` | pandas, numpy, matplotlib.pyplot, io |
//! | `files` | `{logical name: absolute path}` from [`AvailableFiles`] |
//! | `canvas_1`, `canvas_2`, ... | editor buffer contents, in order |

pub mod limits;
pub mod python;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;

pub use limits::ResourceLimits;
pub use python::PythonSandbox;

/// Text an interpreter prints at the top of an uncaught-exception report.
pub const TRACEBACK_MARKER: &str = "Traceback (most recent call last):";

/// Logical file name → absolute path, built once per turn.
pub type AvailableFiles = BTreeMap<String, PathBuf>;

/// Whether captured output reports a failed run.
pub fn looks_like_failure(output_text: &str) -> bool {
    output_text.contains(TRACEBACK_MARKER)
}

/// Outcome of one sandbox run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    stdout_text: String,
    images: Vec<Vec<u8>>,
    timed_out: bool,
}

impl ExecutionResult {
    /// Result of a run that reached the end of the harness.
    pub fn new(stdout_text: impl Into<String>, images: Vec<Vec<u8>>) -> Self {
        Self {
            stdout_text: stdout_text.into(),
            images,
            timed_out: false,
        }
    }

    /// Result of a run killed at the wall-clock deadline.
    pub fn timed_out(limit: Duration) -> Self {
        Self {
            stdout_text: format!(
                "{TRACEBACK_MARKER}\nTimeoutError: execution exceeded {}s and was terminated",
                limit.as_secs_f64()
            ),
            images: Vec::new(),
            timed_out: true,
        }
    }

    /// Result of a worker that could not run or did not report back.
    ///
    /// `detail` is used as-is when it is already a traceback.
    pub fn worker_failure(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let stdout_text = if looks_like_failure(&detail) {
            detail
        } else {
            format!("{TRACEBACK_MARKER}\nSandboxError: {}", detail.trim())
        };
        Self {
            stdout_text,
            images: Vec::new(),
            timed_out: false,
        }
    }

    pub fn stdout_text(&self) -> &str {
        &self.stdout_text
    }

    /// PNG buffers in the order the figures were created
    pub fn images(&self) -> &[Vec<u8>] {
        &self.images
    }

    pub fn is_error(&self) -> bool {
        looks_like_failure(&self.stdout_text)
    }

    pub fn is_timeout(&self) -> bool {
        self.timed_out
    }

    /// True when the run produced any text or any image
    pub fn has_output(&self) -> bool {
        !self.stdout_text.is_empty() || !self.images.is_empty()
    }

    /// Images as base64 text for embedding in a message record
    pub fn encoded_images(&self) -> Vec<String> {
        self.images
            .iter()
            .map(|png| base64::engine::general_purpose::STANDARD.encode(png))
            .collect()
    }

    /// Label used for metrics and logs
    pub fn status(&self) -> &'static str {
        if self.timed_out {
            "timeout"
        } else if self.is_error() {
            "error"
        } else {
            "success"
        }
    }
}

/// Something that can run a code snippet.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn execute(
        &self,
        code: &str,
        files: &AvailableFiles,
        editors: &[String],
    ) -> ExecutionResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_drives_error_flag() {
        let ok = ExecutionResult::new("42\n[System] No charts generated.", vec![]);
        assert!(!ok.is_error());
        assert_eq!(ok.status(), "success");

        let failed = ExecutionResult::new(
            "Traceback (most recent call last):\n  File \"<string>\", line 1\nZeroDivisionError: division by zero",
            vec![],
        );
        assert!(failed.is_error());
        assert_eq!(failed.status(), "error");
    }

    #[test]
    fn test_timeout_is_an_error() {
        let result = ExecutionResult::timed_out(Duration::from_secs(30));
        assert!(result.is_error());
        assert!(result.is_timeout());
        assert_eq!(result.status(), "timeout");
        assert!(result.stdout_text().contains("30s"));
    }

    #[test]
    fn test_worker_failure_keeps_existing_traceback() {
        let tb = "Traceback (most recent call last):\nModuleNotFoundError: No module named 'pandas'";
        assert_eq!(ExecutionResult::worker_failure(tb).stdout_text(), tb);

        let wrapped = ExecutionResult::worker_failure("failed to spawn python3: not found");
        assert!(wrapped.is_error());
        assert!(wrapped.stdout_text().ends_with("SandboxError: failed to spawn python3: not found"));
    }

    #[test]
    fn test_encoded_images_and_output() {
        let result = ExecutionResult::new("", vec![vec![0x89, 0x50, 0x4e, 0x47]]);
        assert!(result.has_output());
        assert_eq!(result.encoded_images(), vec!["iVBORw==".to_string()]);
        assert!(!ExecutionResult::new("", vec![]).has_output());
    }
}
