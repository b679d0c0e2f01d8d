//! Python worker-process sandbox
//!
//! Every call spawns a fresh `python3 -I` process running the embedded
//! harness, so no interpreter state (globals, imported modules, open figures)
//! survives between runs. The request crosses the process boundary as one
//! JSON document on stdin; the harness answers with one JSON line on stdout.
//!
//! The worker gets a cleared environment, its own process group and kernel
//! resource limits. Past the wall-clock deadline the whole group is killed.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use base64::Engine as _;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use super::{AvailableFiles, CodeRunner, ExecutionResult, ResourceLimits};
use crate::metrics::{CODE_EXECUTIONS, CODE_EXECUTION_DURATION};

/// In-worker harness: bindings, output capture, figure harvesting.
const HARNESS: &str = include_str!("harness.py");

/// Default wall-clock deadline for one run
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to keep reading worker pipes after the worker itself exited
const PIPE_DRAIN: Duration = Duration::from_millis(500);

/// Host variables passed through to the worker; everything else is dropped.
const PASSTHROUGH_ENV: &[&str] = &["PATH", "HOME", "LANG"];

#[derive(Serialize)]
struct WorkerRequest<'a> {
    code: &'a str,
    files: &'a AvailableFiles,
    canvases: &'a [String],
}

#[derive(Deserialize)]
struct WorkerResponse {
    #[serde(default)]
    output: String,
    #[serde(default)]
    images: Vec<String>,
}

/// Runs snippets in isolated `python3` worker processes
#[derive(Debug, Clone)]
pub struct PythonSandbox {
    python_bin: String,
    timeout: Duration,
    limits: ResourceLimits,
    working_dir: Option<PathBuf>,
    user_site: bool,
}

impl Default for PythonSandbox {
    fn default() -> Self {
        Self {
            python_bin: "python3".to_string(),
            timeout: DEFAULT_TIMEOUT,
            limits: ResourceLimits::default(),
            working_dir: None,
            user_site: false,
        }
    }
}

impl PythonSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_python_bin(mut self, python_bin: impl Into<String>) -> Self {
        self.python_bin = python_bin.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Run workers from this directory (usually the session workspace).
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Let workers import from user site-packages (`pip install --user`).
    ///
    /// Workers then run with `-E` instead of `-I`: `PYTHON*` variables stay
    /// ignored, `~/.local` site-packages become importable.
    pub fn with_user_site(mut self, enabled: bool) -> Self {
        self.user_site = enabled;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn isolation_flags(&self) -> &'static [&'static str] {
        if self.user_site {
            &["-E"]
        } else {
            &["-I"]
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.python_bin);
        cmd.args(self.isolation_flags())
            .arg("-c")
            .arg(HARNESS)
            .env_clear()
            .env("MPLBACKEND", "Agg")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);

        for key in PASSTHROUGH_ENV {
            if let Some(value) = std::env::var_os(key) {
                cmd.env(key, value);
            }
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let limits = self.limits;
        // SAFETY: pre_exec runs after fork() and before exec() in the child.
        // ResourceLimits::apply only calls setrlimit, which is async-signal-safe.
        unsafe {
            cmd.pre_exec(move || limits.apply());
        }
        cmd
    }

    async fn run(&self, payload: Vec<u8>) -> ExecutionResult {
        let mut child = match self.command().spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionResult::worker_failure(format!(
                    "failed to start {}: {e}",
                    self.python_bin
                ))
            }
        };
        let pid = child.id();
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let exchange = async {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(&payload).await?;
                // Dropping stdin closes it so the harness sees EOF
            }

            let reading = async {
                tokio::join!(
                    read_pipe(stdout_pipe, &mut stdout),
                    read_pipe(stderr_pipe, &mut stderr)
                )
            };
            tokio::pin!(reading);

            // The result is complete once the leader exits, even if a
            // background child it started still holds the pipes open
            let (status, drained) = tokio::select! {
                status = child.wait() => (status?, false),
                _ = &mut reading => (child.wait().await?, true),
            };
            if !drained {
                if let Some(pid) = pid {
                    kill_group(pid);
                }
                if timeout(PIPE_DRAIN, &mut reading).await.is_err() {
                    warn!("Worker pipes still open after exit; using partial output");
                }
            }
            Ok::<_, std::io::Error>(status)
        };

        let outcome = timeout(self.timeout, exchange).await;
        match outcome {
            Ok(Ok(status)) => parse_output(&stdout, &stderr, status),
            Ok(Err(e)) => ExecutionResult::worker_failure(format!("worker I/O failed: {e}")),
            Err(_) => {
                warn!(timeout = ?self.timeout, "Sandbox run timed out; killing worker group");
                if let Some(pid) = pid {
                    kill_group(pid);
                }
                ExecutionResult::timed_out(self.timeout)
            }
        }
    }
}

/// Read a worker pipe to EOF. Bytes read so far stay in `buf` if the
/// future is dropped early.
async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>, buf: &mut Vec<u8>) {
    let Some(mut pipe) = pipe else {
        return;
    };
    if let Err(e) = pipe.read_to_end(buf).await {
        debug!(error = %e, "Worker pipe read failed");
    }
}

fn kill_group(pid: u32) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    // The leader was started with process_group(0), so its pid is the pgid
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        debug!(pid, error = %e, "killpg failed (group already gone?)");
    }
}

/// Turn the worker's raw output into a result.
///
/// The harness writes exactly one JSON line at the end of stdout; anything
/// the code wrote straight to the real stdout comes before it.
fn parse_output(stdout: &[u8], stderr: &[u8], status: std::process::ExitStatus) -> ExecutionResult {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);

    let Some(last_line) = stdout.lines().rev().find(|l| !l.trim().is_empty()) else {
        let detail = if stderr.trim().is_empty() {
            format!("worker exited without a result ({status})")
        } else {
            stderr.into_owned()
        };
        return ExecutionResult::worker_failure(detail);
    };

    let response: WorkerResponse = match serde_json::from_str(last_line) {
        Ok(response) => response,
        Err(e) => {
            return ExecutionResult::worker_failure(format!("malformed worker output: {e}"));
        }
    };

    let mut images = Vec::with_capacity(response.images.len());
    for (index, encoded) in response.images.iter().enumerate() {
        match base64::engine::general_purpose::STANDARD.decode(encoded) {
            Ok(png) => images.push(png),
            Err(e) => warn!(index, error = %e, "Dropping undecodable chart image"),
        }
    }

    ExecutionResult::new(response.output, images)
}

#[async_trait]
impl CodeRunner for PythonSandbox {
    async fn execute(
        &self,
        code: &str,
        files: &AvailableFiles,
        editors: &[String],
    ) -> ExecutionResult {
        let start = Instant::now();

        let request = WorkerRequest {
            code,
            files,
            canvases: editors,
        };
        let result = match serde_json::to_vec(&request) {
            Ok(payload) => self.run(payload).await,
            Err(e) => ExecutionResult::worker_failure(format!("failed to encode request: {e}")),
        };

        let elapsed = start.elapsed();
        CODE_EXECUTIONS.with_label_values(&[result.status()]).inc();
        CODE_EXECUTION_DURATION.observe(elapsed.as_secs_f64());
        debug!(
            status = result.status(),
            images = result.images().len(),
            duration_ms = elapsed.as_millis() as u64,
            "Sandbox run finished"
        );

        result
    }
}
