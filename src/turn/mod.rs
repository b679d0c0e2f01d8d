//! One user turn, end to end
//!
//! The orchestrator owns the decision of which pipeline answers a turn
//! (plain stream, deep research, deep reasoning), appends the answer, runs
//! the Code-Fix Agent on it when auto-plot is on and finally hands the
//! conversation to the auto-save hook.
//!
//! Session state is split into independent pieces: the transcript, session
//! usage totals, the draft slot for interrupted turns, editor buffers, the
//! pending-upload queue and the current history file handle.
//!
//! Editor canvases can also be sent for review as an ordinary turn, or
//! linted and explained through a standalone validation request.

pub mod canvas;
pub mod uploads;

use std::sync::Arc;

use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::agent::{
    prompts, synthesis::stream_reply, AgentError, AgentReply, AgentRequest, CallLedger, CodeFixAgent,
    CodeFixConfig, CodeFixContext, CodeFixReport, EventSink, ReasoningAgent, ReasoningConfig,
    ResearchAgent, ResearchConfig, SaveHook,
};
use crate::llm::{Content, GenerateConfig, LlmError, LlmTransport, Part, ThinkingLevel};
use crate::metrics::AGENT_RUNS;
use crate::sandbox::{AvailableFiles, CodeRunner};
use crate::transcript::{AutoSave, HistorySnapshot, Message, TokenUsage, Transcript};

pub use canvas::{CodeLinter, LintError, LintOutcome, Pylint};
pub use uploads::{guess_mime_type, parts_for_file, PendingFile, UploadError, UploadQueue};

/// Placeholder content of an untouched editor buffer
pub const DEFAULT_EDITOR_CODE: &str = "# Write code here\n";

/// Upper bound on output tokens the backend accepts
pub const MAX_OUTPUT_TOKENS: u32 = 65_536;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReasoningEffort {
    Low,
    #[default]
    High,
}

impl ReasoningEffort {
    pub fn thinking_level(self) -> ThinkingLevel {
        match self {
            ReasoningEffort::Low => ThinkingLevel::Low,
            ReasoningEffort::High => ThinkingLevel::High,
        }
    }
}

impl std::str::FromStr for ReasoningEffort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(ReasoningEffort::Low),
            "high" => Ok(ReasoningEffort::High),
            other => Err(format!("unknown reasoning effort: {other}")),
        }
    }
}

/// Per-turn switches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnSettings {
    pub web_search: bool,
    pub deep_research: bool,
    pub deep_reasoning: bool,
    pub reasoning_effort: ReasoningEffort,
    /// Run generated code and auto-fix it
    pub auto_plot: bool,
    pub auto_save: bool,
}

/// Which pipeline answers a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnMode {
    Plain,
    Research,
    Reasoning,
}

impl TurnMode {
    /// Research wins when both deep modes are on.
    pub fn select(settings: &TurnSettings) -> Self {
        if settings.deep_research {
            TurnMode::Research
        } else if settings.deep_reasoning {
            TurnMode::Reasoning
        } else {
            TurnMode::Plain
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TurnMode::Plain => "plain",
            TurnMode::Research => "research",
            TurnMode::Reasoning => "reasoning",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("No pending user message to answer")]
    NoPendingMessage,
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error("Error during generation: {0}")]
    Generation(#[source] LlmError),
    #[error("Canvas-{0} does not exist")]
    NoSuchCanvas(usize),
    #[error(transparent)]
    Lint(#[from] LintError),
}

/// State of one conversation
#[derive(Debug, Clone)]
pub struct Session {
    pub transcript: Transcript,
    /// Monotonic sum over every assistant message of this session
    pub usage: TokenUsage,
    pub editors: Vec<String>,
    pub multi_editor: bool,
    pub uploads: UploadQueue,
    /// Staged files that stay visible to executed code after their turn
    pub files: AvailableFiles,
    draft: Option<String>,
    history_handle: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Session {
    pub fn new(system_instruction: Option<&str>) -> Self {
        let transcript = match system_instruction {
            Some(instruction) => Transcript::with_system(instruction),
            None => Transcript::new(),
        };
        Self {
            transcript,
            usage: TokenUsage::default(),
            editors: vec![DEFAULT_EDITOR_CODE.to_string()],
            multi_editor: false,
            uploads: UploadQueue::new(),
            files: AvailableFiles::new(),
            draft: None,
            history_handle: None,
        }
    }

    /// Replace this session with a saved snapshot.
    ///
    /// `file` becomes the history handle, so later auto-saves overwrite it.
    pub fn restore(&mut self, file: impl Into<String>, snapshot: HistorySnapshot) {
        self.transcript = Transcript::from_messages(snapshot.messages);
        self.editors = if snapshot.python_canvases.is_empty() {
            vec![DEFAULT_EDITOR_CODE.to_string()]
        } else {
            snapshot.python_canvases
        };
        self.multi_editor = snapshot.multi_code_enabled;
        self.draft = None;
        self.history_handle = Some(file.into());
    }

    /// Move an unanswered trailing user message into the draft slot.
    ///
    /// A newer interrupted message replaces an older draft. Returns false
    /// when there was nothing to recover.
    pub fn recover_interrupted(&mut self) -> bool {
        let Some(text) = self.transcript.take_dangling_user() else {
            return false;
        };
        if let Some(old) = self.draft.replace(text) {
            warn!(chars = old.chars().count(), "Replacing an older draft with the newer interrupted message");
        }
        info!("Recovered interrupted message into draft");
        true
    }

    pub fn draft(&self) -> Option<&str> {
        self.draft.as_deref()
    }

    pub fn discard_draft(&mut self) -> Option<String> {
        self.draft.take()
    }

    pub fn history_handle(&self) -> Option<&str> {
        self.history_handle.as_deref()
    }

    /// Set editor buffer `index`, growing the buffer list as needed.
    pub fn set_editor(&mut self, index: usize, code: impl Into<String>) {
        if self.editors.len() <= index {
            self.editors
                .resize(index + 1, DEFAULT_EDITOR_CODE.to_string());
        }
        self.editors[index] = code.into();
    }

    /// Editor buffers worth showing to the model, as request parts.
    fn editor_context(&self) -> Vec<Part> {
        self.editors
            .iter()
            .enumerate()
            .filter(|(_, code)| !code.trim().is_empty() && code.as_str() != DEFAULT_EDITOR_CODE)
            .map(|(i, code)| Part::text(format!("\n[Canvas-{}]\n```python\n{}\n```", i + 1, code)))
            .collect()
    }
}

/// What a completed turn produced
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub trace_id: String,
    pub mode: TurnMode,
    pub reply: AgentReply,
    pub code_fix: Option<CodeFixReport>,
    /// History file written after this turn, if any
    pub saved_as: Option<String>,
}

/// Result of validating one editor canvas
#[derive(Debug, Clone)]
pub enum CanvasValidation {
    /// Empty or still the placeholder
    NoCode,
    SyntaxError,
    /// pylint found nothing to report
    Clean,
    /// The report was explained by the model and both sides were appended
    Reviewed(TurnOutcome),
}

/// Runs turns against one transport and one code runner
pub struct TurnOrchestrator {
    transport: Arc<dyn LlmTransport>,
    linter: Arc<dyn CodeLinter>,
    code_fix: CodeFixAgent,
    research: ResearchAgent,
    reasoning: ReasoningAgent,
    auto_save: Option<Arc<dyn AutoSave>>,
    max_output_tokens: u32,
}

impl TurnOrchestrator {
    pub fn new(transport: Arc<dyn LlmTransport>, runner: Arc<dyn CodeRunner>) -> Self {
        Self {
            code_fix: CodeFixAgent::new(transport.clone(), runner, CodeFixConfig::default()),
            research: ResearchAgent::new(transport.clone(), ResearchConfig::default()),
            reasoning: ReasoningAgent::new(transport.clone(), ReasoningConfig::default()),
            transport,
            linter: Arc::new(Pylint::new()),
            auto_save: None,
            max_output_tokens: MAX_OUTPUT_TOKENS,
        }
    }

    pub fn with_code_fix(mut self, runner: Arc<dyn CodeRunner>, config: CodeFixConfig) -> Self {
        self.code_fix = CodeFixAgent::new(self.transport.clone(), runner, config);
        self
    }

    pub fn with_research_config(mut self, config: ResearchConfig) -> Self {
        self.research = ResearchAgent::new(self.transport.clone(), config);
        self
    }

    pub fn with_reasoning_config(mut self, config: ReasoningConfig) -> Self {
        self.reasoning = ReasoningAgent::new(self.transport.clone(), config);
        self
    }

    pub fn with_linter(mut self, linter: Arc<dyn CodeLinter>) -> Self {
        self.linter = linter;
        self
    }

    pub fn with_auto_save(mut self, store: Arc<dyn AutoSave>) -> Self {
        self.auto_save = Some(store);
        self
    }

    /// Clamped to [`MAX_OUTPUT_TOKENS`].
    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = max.min(MAX_OUTPUT_TOKENS);
        self
    }

    /// Append `prompt` as a user message and answer it.
    pub async fn run_turn(
        &self,
        session: &mut Session,
        prompt: &str,
        settings: &TurnSettings,
        events: &EventSink,
    ) -> Result<TurnOutcome, TurnError> {
        session.transcript.push(Message::user(prompt));
        self.answer(session, settings, events).await
    }

    /// Resend the recovered draft, possibly edited, as a new user message.
    pub async fn resend_draft(
        &self,
        session: &mut Session,
        edited_text: &str,
        settings: &TurnSettings,
        events: &EventSink,
    ) -> Result<TurnOutcome, TurnError> {
        session.discard_draft();
        self.run_turn(session, edited_text, settings, events).await
    }

    /// Ask for a review of editor buffer `index` (0-based).
    ///
    /// The buffer itself travels as editor context, like on any turn.
    pub async fn review_canvas(
        &self,
        session: &mut Session,
        index: usize,
        settings: &TurnSettings,
        events: &EventSink,
    ) -> Result<TurnOutcome, TurnError> {
        if index >= session.editors.len() {
            return Err(TurnError::NoSuchCanvas(index + 1));
        }
        let prompt = if session.multi_editor {
            prompts::review_canvas(index + 1)
        } else {
            prompts::REVIEW_CANVAS_SINGLE.to_string()
        };
        self.run_turn(session, &prompt, settings, events).await
    }

    /// Lint editor buffer `index` (0-based) and have the model explain the
    /// report.
    ///
    /// The explanation request carries only the system instruction and the
    /// validation prompt, not the conversation. The prompt and the answer are
    /// appended to the transcript only once the answer arrived.
    pub async fn validate_canvas(
        &self,
        session: &mut Session,
        index: usize,
        settings: &TurnSettings,
        events: &EventSink,
    ) -> Result<CanvasValidation, TurnError> {
        let code = session
            .editors
            .get(index)
            .ok_or(TurnError::NoSuchCanvas(index + 1))?
            .clone();
        if code.trim().is_empty() || code.trim() == DEFAULT_EDITOR_CODE.trim() {
            return Ok(CanvasValidation::NoCode);
        }

        events.status(format!("Validating Canvas-{}...", index + 1));
        let report = match self.linter.lint(&code).await? {
            LintOutcome::Clean => {
                info!(canvas = index + 1, "Canvas passed pylint");
                return Ok(CanvasValidation::Clean);
            }
            LintOutcome::SyntaxError => {
                events.warning("Syntax error detected by pylint.");
                return Ok(CanvasValidation::SyntaxError);
            }
            LintOutcome::Issues(report) => report,
        };

        let trace_id = Uuid::now_v7().to_string();
        let span = info_span!("canvas_validation", trace_id = %trace_id, canvas = index + 1);

        async {
            let prompt = prompts::canvas_validation(&code, &report);
            let instruction = session.transcript.system_instruction().map(str::to_string);
            let contents = vec![Content::user_text(prompt.clone())];
            let gen_config = GenerateConfig {
                system_instruction: instruction.clone(),
                max_output_tokens: Some(self.max_output_tokens),
                web_search: settings.web_search,
                thinking: Some(settings.reasoning_effort.thinking_level()),
                ..GenerateConfig::default()
            };

            let reply = match self
                .generate(TurnMode::Plain, &contents, instruction.as_deref(), &gen_config, events)
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    error!(error = %e, "Canvas validation failed");
                    events.error(e.to_string());
                    return Err(e);
                }
            };

            session.transcript.push(Message::user(prompt));
            session.transcript.push(
                Message::assistant(reply.text.clone())
                    .with_usage(Some(reply.usage).filter(|u| !u.is_zero()))
                    .with_citations(Some(reply.citations.clone())),
            );
            session.usage += reply.usage;
            if settings.auto_save {
                self.save(session).await;
            }

            Ok(CanvasValidation::Reviewed(TurnOutcome {
                trace_id: trace_id.clone(),
                mode: TurnMode::Plain,
                reply,
                code_fix: None,
                saved_as: session.history_handle.clone(),
            }))
        }
        .instrument(span)
        .await
    }

    /// Answer the dangling user message at the end of the transcript.
    pub async fn answer(
        &self,
        session: &mut Session,
        settings: &TurnSettings,
        events: &EventSink,
    ) -> Result<TurnOutcome, TurnError> {
        if !session.transcript.has_dangling_user() {
            return Err(TurnError::NoPendingMessage);
        }

        let mode = TurnMode::select(settings);
        let trace_id = Uuid::now_v7().to_string();
        let span = info_span!(
            "turn",
            trace_id = %trace_id,
            mode = mode.label(),
            otel.name = "turn"
        );

        async {
            info!(
                messages = session.transcript.len(),
                attachments = session.uploads.len(),
                "Starting turn"
            );

            let (instruction, mut contents) = session.transcript.to_request();
            if let Some(last) = contents.last_mut() {
                // Final order: editor context, attachments, the user's text
                let mut prefix = session.editor_context();
                prefix.extend(session.uploads.parts());
                prefix.append(&mut last.parts);
                last.parts = prefix;
            }

            let gen_config = GenerateConfig {
                system_instruction: instruction.clone(),
                max_output_tokens: Some(self.max_output_tokens),
                web_search: settings.web_search,
                thinking: Some(settings.reasoning_effort.thinking_level()),
                ..GenerateConfig::default()
            };

            let reply = match self
                .generate(mode, &contents, instruction.as_deref(), &gen_config, events)
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    error!(error = %e, "Turn failed");
                    events.error(e.to_string());
                    session.recover_interrupted();
                    return Err(e);
                }
            };

            let usage = Some(reply.usage).filter(|u| !u.is_zero());
            session.transcript.push(
                Message::assistant(reply.text.clone())
                    .with_usage(usage)
                    .with_citations(Some(reply.citations.clone())),
            );
            session.usage += reply.usage;

            let mut files = session.files.clone();
            files.extend(session.uploads.available_files());
            session.files = files.clone();
            session.uploads.clear();

            let mut saved = false;
            let code_fix = if settings.auto_plot {
                let hook = match (&self.auto_save, settings.auto_save) {
                    (Some(store), true) => Some(SaveHook {
                        store: store.as_ref(),
                        handle: &mut session.history_handle,
                        multi_editor: session.multi_editor,
                    }),
                    _ => None,
                };
                let ctx = CodeFixContext {
                    transcript: &mut session.transcript,
                    files: &files,
                    editors: &session.editors,
                    gen_config: &gen_config,
                    events,
                    auto_save: hook,
                };
                let report = self.code_fix.run(&reply.text, ctx).await?;
                session.usage += report.usage;
                saved = report.appended && settings.auto_save && self.auto_save.is_some();
                Some(report)
            } else {
                None
            };

            if settings.auto_save && !saved {
                self.save(session).await;
            }

            info!(
                input_tokens = reply.usage.input_tokens,
                output_tokens = reply.usage.output_tokens,
                session_tokens = session.usage.total_tokens,
                "Turn finished"
            );

            Ok(TurnOutcome {
                trace_id: trace_id.clone(),
                mode,
                reply,
                code_fix,
                saved_as: session.history_handle.clone(),
            })
        }
        .instrument(span)
        .await
    }

    async fn generate(
        &self,
        mode: TurnMode,
        contents: &[Content],
        instruction: Option<&str>,
        gen_config: &GenerateConfig,
        events: &EventSink,
    ) -> Result<AgentReply, TurnError> {
        let request = AgentRequest {
            contents,
            system_instruction: instruction.unwrap_or(""),
            gen_config,
        };

        match mode {
            TurnMode::Research => Ok(self.research.run(request, events).await?.reply),
            TurnMode::Reasoning => Ok(self.reasoning.run(request, events).await?.reply),
            TurnMode::Plain => {
                let streamed =
                    match stream_reply(self.transport.as_ref(), "chat", contents, gen_config, events)
                        .await
                    {
                        Ok(streamed) => streamed,
                        Err(e) => {
                            AGENT_RUNS.with_label_values(&["plain", "failed"]).inc();
                            return Err(TurnError::Generation(e));
                        }
                    };
                AGENT_RUNS.with_label_values(&["plain", "success"]).inc();
                let mut ledger = CallLedger::new();
                ledger.record(streamed.usage, Some(&streamed.citations));
                let (usage, citations) = ledger.into_parts();
                Ok(AgentReply {
                    text: streamed.text,
                    usage,
                    citations,
                    thoughts: streamed.thoughts,
                })
            }
        }
    }

    /// Hand the conversation to the auto-save hook, if one is configured.
    pub async fn save(&self, session: &mut Session) -> Option<String> {
        let Some(store) = &self.auto_save else {
            warn!("Auto-save requested but no history store is configured");
            return None;
        };
        let handle = store
            .save(
                session.history_handle.as_deref(),
                session.transcript.messages(),
                &session.editors,
                session.multi_editor,
            )
            .await;
        if handle.is_some() {
            session.history_handle = handle.clone();
        }
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Role;

    #[test]
    fn test_research_wins_over_reasoning() {
        let both = TurnSettings {
            deep_research: true,
            deep_reasoning: true,
            ..TurnSettings::default()
        };
        assert_eq!(TurnMode::select(&both), TurnMode::Research);

        let reasoning = TurnSettings {
            deep_reasoning: true,
            ..TurnSettings::default()
        };
        assert_eq!(TurnMode::select(&reasoning), TurnMode::Reasoning);
        assert_eq!(TurnMode::select(&TurnSettings::default()), TurnMode::Plain);
    }

    #[test]
    fn test_editor_context_skips_placeholder_and_blank() {
        let mut session = Session::new(None);
        session.set_editor(1, "   ");
        session.set_editor(2, "print(1)");
        let parts = session.editor_context();
        assert_eq!(parts.len(), 1);
        assert_eq!(
            parts[0].as_text(),
            Some("\n[Canvas-3]\n```python\nprint(1)\n```")
        );
    }

    #[test]
    fn test_recover_interrupted_moves_user_message() {
        let mut session = Session::new(Some("sys"));
        session.transcript.push(Message::user("hello"));

        assert!(session.recover_interrupted());
        assert_eq!(session.draft(), Some("hello"));
        assert_eq!(session.transcript.last().map(|m| m.role), Some(Role::System));

        assert!(!session.recover_interrupted());

        // A second failure while a draft waits: newest text wins, nothing dangles
        session.transcript.push(Message::user("again"));
        assert!(session.recover_interrupted());
        assert!(!session.transcript.has_dangling_user());
        assert_eq!(session.draft(), Some("again"));

        assert_eq!(session.discard_draft().as_deref(), Some("again"));
        assert!(session.draft().is_none());
    }

    #[test]
    fn test_restore_replaces_state_and_sets_handle() {
        let mut session = Session::new(None);
        session.transcript.push(Message::user("stale"));
        let snapshot = HistorySnapshot {
            messages: vec![Message::system("sys"), Message::user("q"), Message::assistant("a")],
            python_canvases: vec![],
            multi_code_enabled: true,
            saved_at: String::new(),
        };

        session.restore("240101_chat.json", snapshot);

        assert_eq!(session.transcript.len(), 3);
        assert_eq!(session.editors, vec![DEFAULT_EDITOR_CODE.to_string()]);
        assert!(session.multi_editor);
        assert_eq!(session.history_handle(), Some("240101_chat.json"));
    }

    #[test]
    fn test_effort_parses() {
        assert_eq!("LOW".parse::<ReasoningEffort>(), Ok(ReasoningEffort::Low));
        assert!("medium".parse::<ReasoningEffort>().is_err());
        assert_eq!(ReasoningEffort::default().thinking_level(), ThinkingLevel::High);
    }

    #[test]
    fn test_max_output_tokens_clamped() {
        struct Nothing;
        #[async_trait::async_trait]
        impl LlmTransport for Nothing {
            fn name(&self) -> &'static str {
                "none"
            }
            fn model(&self) -> &str {
                "none"
            }
            async fn generate(
                &self,
                _: &[Content],
                _: &GenerateConfig,
            ) -> Result<crate::llm::GenerateResponse, LlmError> {
                Err(LlmError::EmptyResponse("none"))
            }
            async fn generate_stream(
                &self,
                _: &[Content],
                _: &GenerateConfig,
            ) -> Result<crate::llm::ChunkStream, LlmError> {
                Err(LlmError::EmptyResponse("none"))
            }
        }

        let orchestrator = TurnOrchestrator::new(
            Arc::new(Nothing),
            Arc::new(crate::sandbox::PythonSandbox::default()),
        )
        .with_max_output_tokens(1_000_000);
        assert_eq!(orchestrator.max_output_tokens, MAX_OUTPUT_TOKENS);
    }
}
