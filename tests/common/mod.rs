//! Scripted test doubles for the transport and the code runner
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use gpchat::llm::{
    ChunkStream, Content, GenerateConfig, GenerateResponse, LlmError, LlmTransport, StreamChunk,
};
use gpchat::sandbox::{AvailableFiles, CodeRunner, ExecutionResult, TRACEBACK_MARKER};
use gpchat::transcript::{AutoSave, Message, TokenUsage};
use gpchat::turn::{CodeLinter, LintError, LintOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Generate,
    Stream,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub kind: CallKind,
    pub contents: Vec<Content>,
    pub config: GenerateConfig,
}

/// Transport that replays queued replies in order and records every request.
///
/// An exhausted queue answers with an error.
#[derive(Default)]
pub struct ScriptedTransport {
    generate: Mutex<VecDeque<Result<GenerateResponse, String>>>,
    stream: Mutex<VecDeque<Result<Vec<StreamChunk>, String>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: &str, usage: TokenUsage) -> Self {
        self.generate
            .lock()
            .unwrap()
            .push_back(Ok(GenerateResponse::from_text(text).with_usage(usage)));
        self
    }

    pub fn response(self, response: GenerateResponse) -> Self {
        self.generate.lock().unwrap().push_back(Ok(response));
        self
    }

    pub fn fail(self, message: &str) -> Self {
        self.generate.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    pub fn stream_text(self, text: &str, usage: TokenUsage) -> Self {
        self.stream.lock().unwrap().push_back(Ok(vec![
            StreamChunk::text(text),
            StreamChunk::usage(usage),
        ]));
        self
    }

    pub fn stream_chunks(self, chunks: Vec<StreamChunk>) -> Self {
        self.stream.lock().unwrap().push_back(Ok(chunks));
        self
    }

    pub fn stream_fail(self, message: &str) -> Self {
        self.stream.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, kind: CallKind) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.kind == kind).count()
    }

    fn record(&self, kind: CallKind, contents: &[Content], config: &GenerateConfig) {
        self.calls.lock().unwrap().push(RecordedCall {
            kind,
            contents: contents.to_vec(),
            config: config.clone(),
        });
    }
}

#[async_trait]
impl LlmTransport for ScriptedTransport {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn generate(
        &self,
        contents: &[Content],
        config: &GenerateConfig,
    ) -> Result<GenerateResponse, LlmError> {
        self.record(CallKind::Generate, contents, config);
        match self.generate.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(LlmError::Transport(message)),
            None => Err(LlmError::EmptyResponse("scripted")),
        }
    }

    async fn generate_stream(
        &self,
        contents: &[Content],
        config: &GenerateConfig,
    ) -> Result<ChunkStream, LlmError> {
        self.record(CallKind::Stream, contents, config);
        match self.stream.lock().unwrap().pop_front() {
            Some(Ok(chunks)) => Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok)))),
            Some(Err(message)) => Err(LlmError::Transport(message)),
            None => Err(LlmError::EmptyResponse("scripted")),
        }
    }
}

/// Runner that replays queued results; an exhausted queue repeats the last one.
#[derive(Default)]
pub struct ScriptedRunner {
    results: Mutex<VecDeque<ExecutionResult>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(results: Vec<ExecutionResult>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeRunner for ScriptedRunner {
    async fn execute(
        &self,
        code: &str,
        _files: &AvailableFiles,
        _editors: &[String],
    ) -> ExecutionResult {
        self.executed.lock().unwrap().push(code.to_string());
        let mut results = self.results.lock().unwrap();
        if results.len() > 1 {
            results.pop_front().unwrap()
        } else {
            results
                .front()
                .cloned()
                .unwrap_or_else(|| ExecutionResult::new("", Vec::new()))
        }
    }
}

/// Auto-save hook that remembers what it was asked to save.
#[derive(Default)]
pub struct RecordingSave {
    pub saves: Mutex<Vec<(Option<String>, usize)>>,
}

#[async_trait]
impl AutoSave for RecordingSave {
    async fn save(
        &self,
        handle: Option<&str>,
        messages: &[Message],
        _editors: &[String],
        _multi_editor: bool,
    ) -> Option<String> {
        self.saves
            .lock()
            .unwrap()
            .push((handle.map(str::to_string), messages.len()));
        Some(handle.unwrap_or("saved.json").to_string())
    }
}

/// Linter that always reports the same outcome and remembers what it saw.
pub struct ScriptedLinter {
    outcome: LintOutcome,
    linted: Mutex<Vec<String>>,
}

impl ScriptedLinter {
    pub fn new(outcome: LintOutcome) -> Self {
        Self {
            outcome,
            linted: Mutex::new(Vec::new()),
        }
    }

    pub fn linted(&self) -> Vec<String> {
        self.linted.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeLinter for ScriptedLinter {
    async fn lint(&self, code: &str) -> Result<LintOutcome, LintError> {
        self.linted.lock().unwrap().push(code.to_string());
        Ok(self.outcome.clone())
    }
}

pub fn traceback(error_line: &str) -> ExecutionResult {
    ExecutionResult::new(
        format!("{TRACEBACK_MARKER}\n  File \"<string>\", line 1, in <module>\n{error_line}\n"),
        Vec::new(),
    )
}

pub fn python_reply(code: &str) -> String {
    format!("Here you go:\n```python\n{code}\n```\n")
}
