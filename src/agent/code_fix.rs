//! Code-Fix Agent - run the code in a reply and repair it on failure
//!
//! ```text
//! ExtractCode ──none──→ Done(no-op)
//!     ↓
//!  Execute ──success or last attempt──→ Finalize
//!     ↓ failure
//! RequestFix (feedback note + one blocking call) ──→ ExtractCode
//! ```
//!
//! Each cycle of the bounded loop executes once. With `max_attempts` fixes
//! allowed the budget is `max_attempts + 1` executions, and the last cycle
//! always finalizes, so the agent can never ask for more than
//! `max_attempts` fixes.

use std::sync::Arc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::accounting::{observe_call, CallLedger};
use super::bounded::{run_bounded, BoundedPhase, Control, Cycle, LoopExit};
use super::events::{AgentEvent, EventSink};
use super::{prompts, AgentError};
use crate::llm::{GenerateConfig, LlmTransport};
use crate::metrics::{AGENT_ITERATIONS, AGENT_RUNS};
use crate::sandbox::{AvailableFiles, CodeRunner, ExecutionResult};
use crate::transcript::{AutoSave, Message, TokenUsage, Transcript};

lazy_static! {
    static ref PYTHON_BLOCK: Regex = Regex::new(r"(?s)```(?:python|py)[ \t]*\r?\n(.*?)\r?\n```")
        .expect("python block pattern is valid");
}

/// Pick the code to run from a model reply.
///
/// Scans fenced python blocks from the end and returns the last one that
/// contains one of [`prompts::RUNNABLE_MARKERS`].
pub fn extract_runnable_code(reply: &str) -> Option<String> {
    let blocks: Vec<&str> = PYTHON_BLOCK
        .captures_iter(reply)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    debug!(blocks = blocks.len(), "Python code blocks found");

    blocks
        .into_iter()
        .rev()
        .find(|code| prompts::RUNNABLE_MARKERS.iter().any(|m| code.contains(m)))
        .map(str::to_string)
}

#[derive(Debug, Clone)]
pub struct CodeFixConfig {
    /// Fix requests allowed after the first execution
    pub max_attempts: usize,
}

impl Default for CodeFixConfig {
    fn default() -> Self {
        Self { max_attempts: 2 }
    }
}

/// Loop state, created at entry and dropped at exit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    /// Fix requests issued so far
    pub attempt: usize,
    pub max_attempts: usize,
    pub current_code: String,
    pub current_response_text: String,
}

impl RetryState {
    fn new(initial_reply: &str, max_attempts: usize) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            current_code: String::new(),
            current_response_text: initial_reply.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeFixOutcome {
    /// Nothing runnable in the reply
    NoCode,
    /// The last execution succeeded
    Succeeded,
    /// The retry budget ran out on a failing execution
    GaveUp,
}

impl CodeFixOutcome {
    fn label(&self) -> &'static str {
        match self {
            CodeFixOutcome::NoCode => "no_code",
            CodeFixOutcome::Succeeded => "success",
            CodeFixOutcome::GaveUp => "exhausted",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodeFixReport {
    pub outcome: CodeFixOutcome,
    /// Fix requests issued
    pub attempts: usize,
    /// Last execution, if any ran
    pub result: Option<ExecutionResult>,
    /// Whether a result message was appended to the transcript
    pub appended: bool,
    /// Usage of the fix requests (already attached to their messages)
    pub usage: TokenUsage,
}

/// Auto-save collaborator plus the conversation's current file handle
pub struct SaveHook<'a> {
    pub store: &'a dyn AutoSave,
    pub handle: &'a mut Option<String>,
    pub multi_editor: bool,
}

/// Everything one run reads or appends to
pub struct CodeFixContext<'a> {
    pub transcript: &'a mut Transcript,
    pub files: &'a AvailableFiles,
    pub editors: &'a [String],
    /// Generation settings of the turn; reused for fix requests
    pub gen_config: &'a GenerateConfig,
    pub events: &'a EventSink,
    pub auto_save: Option<SaveHook<'a>>,
}

/// Runs generated code and feeds failures back to the model
pub struct CodeFixAgent {
    transport: Arc<dyn LlmTransport>,
    runner: Arc<dyn CodeRunner>,
    config: CodeFixConfig,
}

enum Finalize {
    NoCode,
    Ran(ExecutionResult),
}

struct FixLoop<'a, 'c> {
    transport: &'a dyn LlmTransport,
    runner: &'a dyn CodeRunner,
    ctx: &'a mut CodeFixContext<'c>,
    state: RetryState,
    ledger: CallLedger,
}

#[async_trait]
impl<'a, 'c> BoundedPhase for FixLoop<'a, 'c> {
    type Output = Finalize;
    type Error = AgentError;

    async fn step(&mut self, cycle: Cycle) -> Result<Control<Finalize>, AgentError> {
        // ExtractCode
        let Some(code) = extract_runnable_code(&self.state.current_response_text) else {
            debug!(attempt = self.state.attempt, "No runnable code in reply");
            return Ok(Control::Finish(Finalize::NoCode));
        };
        self.state.current_code = code;

        // Execute
        if self.state.attempt == 0 {
            self.ctx.events.status("Running code...");
        } else {
            self.ctx.events.status(format!(
                "Re-running fixed code (retry {})...",
                self.state.attempt
            ));
        }
        let result = self
            .runner
            .execute(&self.state.current_code, self.ctx.files, self.ctx.editors)
            .await;
        info!(
            attempt = self.state.attempt,
            status = result.status(),
            output_len = result.stdout_text().len(),
            images = result.images().len(),
            "Code executed"
        );

        if !result.is_error() || self.state.attempt >= self.state.max_attempts || cycle.is_last() {
            return Ok(Control::Finish(Finalize::Ran(result)));
        }

        // RequestFix
        self.state.attempt += 1;
        self.ctx.events.warning(format!(
            "Code execution error detected; asking the model for a fix (attempt {}/{})",
            self.state.attempt, self.state.max_attempts
        ));
        let preview: String = result.stdout_text().chars().take(100).collect();
        debug!(error = %preview, "Requesting fix");

        self.ctx
            .transcript
            .push(Message::system(prompts::fix_request(result.stdout_text())));

        let (instruction, contents) = self.ctx.transcript.to_request();
        let mut config = self.ctx.gen_config.clone();
        if instruction.is_some() {
            config.system_instruction = instruction;
        }

        let response = observe_call("fix", self.transport.generate(&contents, &config))
            .await
            .map_err(AgentError::FixRequest)?;
        self.ledger.record_response(&response);

        self.ctx
            .transcript
            .push(Message::assistant(response.text.clone()).with_usage(response.usage));
        self.state.current_response_text = response.text;

        Ok(Control::Continue)
    }
}

impl CodeFixAgent {
    pub fn new(
        transport: Arc<dyn LlmTransport>,
        runner: Arc<dyn CodeRunner>,
        config: CodeFixConfig,
    ) -> Self {
        Self {
            transport,
            runner,
            config,
        }
    }

    pub fn config(&self) -> &CodeFixConfig {
        &self.config
    }

    /// Run the loop on `initial_reply`, appending to `ctx.transcript`.
    pub async fn run(
        &self,
        initial_reply: &str,
        mut ctx: CodeFixContext<'_>,
    ) -> Result<CodeFixReport, AgentError> {
        let span = info_span!(
            "code_fix",
            max_attempts = self.config.max_attempts,
            otel.name = "code_fix"
        );

        async {
            let mut phase = FixLoop {
                transport: self.transport.as_ref(),
                runner: self.runner.as_ref(),
                ctx: &mut ctx,
                state: RetryState::new(initial_reply, self.config.max_attempts),
                ledger: CallLedger::new(),
            };

            let exit = match run_bounded(&mut phase, self.config.max_attempts + 1).await {
                Ok(exit) => exit,
                Err(e) => {
                    error!(error = %e, attempt = phase.state.attempt, "Code-fix loop aborted");
                    phase.ctx.events.error(e.to_string());
                    AGENT_RUNS.with_label_values(&["code_fix", "failed"]).inc();
                    return Err(e);
                }
            };
            AGENT_ITERATIONS
                .with_label_values(&["code_fix"])
                .observe(exit.iterations() as f64);

            let attempts = phase.state.attempt;
            let usage = phase.ledger.usage();
            let finalize = match exit {
                LoopExit::Finished { value, .. } => value,
                // Unreachable: the last cycle always finishes
                LoopExit::Exhausted { .. } => Finalize::NoCode,
            };

            let report = match finalize {
                Finalize::NoCode => CodeFixReport {
                    outcome: CodeFixOutcome::NoCode,
                    attempts,
                    result: None,
                    appended: false,
                    usage,
                },
                Finalize::Ran(result) => {
                    let appended = finish(&mut ctx, &result).await;
                    let outcome = if result.is_error() {
                        CodeFixOutcome::GaveUp
                    } else {
                        CodeFixOutcome::Succeeded
                    };
                    CodeFixReport {
                        outcome,
                        attempts,
                        result: Some(result),
                        appended,
                        usage,
                    }
                }
            };

            AGENT_RUNS
                .with_label_values(&["code_fix", report.outcome.label()])
                .inc();
            info!(outcome = report.outcome.label(), attempts, "Code-fix loop finished");
            Ok(report)
        }
        .instrument(span)
        .await
    }
}

/// Finalize: report, persist the result message, auto-save.
async fn finish(ctx: &mut CodeFixContext<'_>, result: &ExecutionResult) -> bool {
    let failed = result.is_error();
    let images = result.encoded_images();

    ctx.events.emit(AgentEvent::ExecutionOutput {
        text: result.stdout_text().to_string(),
        images: images.len(),
    });

    let appended = result.has_output();
    if appended {
        let content = if failed {
            prompts::execution_failure_report(result.stdout_text())
        } else {
            prompts::execution_report(result.stdout_text())
        };
        ctx.transcript
            .push(Message::assistant(content).with_images(images));

        if let Some(hook) = ctx.auto_save.as_mut() {
            let saved = hook
                .store
                .save(
                    hook.handle.as_deref(),
                    ctx.transcript.messages(),
                    ctx.editors,
                    hook.multi_editor,
                )
                .await;
            if let Some(file) = saved {
                *hook.handle = Some(file);
            }
        }
    }

    if failed {
        warn!("Automatic code fix failed; retry limit reached");
        ctx.events.error("Automatic code fix failed.");
    } else if !appended {
        ctx.events
            .warning("The code produced neither a chart nor any standard output.");
    }
    appended
}
