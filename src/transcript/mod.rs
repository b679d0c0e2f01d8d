//! Conversation state shared by every agent pipeline
//!
//! The transcript is an ordered, append-only log of messages. All three agents
//! read it as context and append their results to it; nothing outside this
//! module reorders or removes messages except interrupted-turn recovery.
//!
//! # Invariants
//!
//! - The system instruction occupies slot 0 when present. Later `system`-role
//!   messages are feedback notes written by the Code-Fix Agent.
//! - Outside of a running turn, the last message is never `user`. A dangling
//!   `user` message means the previous turn was interrupted; it is moved into a
//!   draft slot by [`Transcript::take_dangling_user`] rather than dropped.

pub mod history;

use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

use crate::llm::{Content, Part};

pub use history::{AutoSave, HistoryError, HistorySnapshot, HistoryStore, HistorySummary};

/// Prefix used when a mid-transcript system note is replayed to the model.
const FEEDBACK_PREFIX: &str = "[System feedback]";

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Token accounting for one call, one turn, or a whole session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Usage with `total_tokens` derived from input + output.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0 && self.total_tokens == 0
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
        self.total_tokens += rhs.total_tokens;
    }
}

/// A web source the model grounded its answer on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub uri: String,
}

/// Grounding metadata: sources deduplicated by URI, queries by value.
///
/// Both collections keep first-seen order. When two sources share a URI the
/// first title wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationSet {
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub queries: Vec<String>,
}

impl CitationSet {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.queries.is_empty()
    }

    /// Add a source unless one with the same URI is already present.
    pub fn add_source(&mut self, title: impl Into<String>, uri: impl Into<String>) -> bool {
        let uri = uri.into();
        if self.sources.iter().any(|s| s.uri == uri) {
            return false;
        }
        self.sources.push(Source {
            title: title.into(),
            uri,
        });
        true
    }

    pub fn add_query(&mut self, query: impl Into<String>) -> bool {
        let query = query.into();
        if self.queries.contains(&query) {
            return false;
        }
        self.queries.push(query);
        true
    }

    /// Fold another batch into this one, keeping first-seen entries.
    pub fn merge(&mut self, other: &CitationSet) {
        for source in &other.sources {
            self.add_source(source.title.clone(), source.uri.clone());
        }
        for query in &other.queries {
            self.add_query(query.clone());
        }
    }
}

/// One entry in the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<CitationSet>,
    /// Base64-encoded PNG images, in production order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            usage: None,
            citations: None,
            images: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_usage(mut self, usage: Option<TokenUsage>) -> Self {
        self.usage = usage;
        self
    }

    /// Attach citations; an empty set is stored as `None`.
    pub fn with_citations(mut self, citations: Option<CitationSet>) -> Self {
        self.citations = citations.filter(|c| !c.is_empty());
        self
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }
}

/// Ordered, append-only conversation log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a transcript with a system instruction in slot 0.
    pub fn with_system(instruction: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(instruction)],
        }
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The leading system message, if any.
    pub fn system_instruction(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Replace the system instruction, or insert it at slot 0.
    pub fn set_system_instruction(&mut self, instruction: impl Into<String>) {
        match self.messages.first_mut() {
            Some(first) if first.role == Role::System => first.content = instruction.into(),
            _ => self.messages.insert(0, Message::system(instruction)),
        }
    }

    /// True when the log ends with an unanswered user message.
    pub fn has_dangling_user(&self) -> bool {
        matches!(self.messages.last(), Some(m) if m.role == Role::User)
    }

    /// Remove a trailing user message and hand its text back.
    pub fn take_dangling_user(&mut self) -> Option<String> {
        if self.has_dangling_user() {
            self.messages.pop().map(|m| m.content)
        } else {
            None
        }
    }

    /// Number of messages that are not system messages.
    pub fn conversation_len(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role != Role::System)
            .count()
    }

    /// Convert the log into model request contents.
    ///
    /// The leading system message is returned separately as the system
    /// instruction. Later system notes are replayed as user-role turns so the
    /// model sees them; image attachments are not resent.
    pub fn to_request(&self) -> (Option<String>, Vec<Content>) {
        let instruction = self.system_instruction().map(str::to_string);
        let skip = usize::from(instruction.is_some());

        let contents = self
            .messages
            .iter()
            .skip(skip)
            .map(|m| match m.role {
                Role::User => Content::user(vec![Part::text(m.content.clone())]),
                Role::Assistant => Content::model(vec![Part::text(m.content.clone())]),
                Role::System => Content::user(vec![Part::text(format!(
                    "{} {}",
                    FEEDBACK_PREFIX, m.content
                ))]),
            })
            .collect();

        (instruction, contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ContentRole;

    #[test]
    fn test_usage_accumulates() {
        let mut total = TokenUsage::default();
        total += TokenUsage::new(10, 5);
        total += TokenUsage::new(3, 2);
        assert_eq!(total, TokenUsage::new(13, 7));
        assert_eq!(total.total_tokens, 20);
    }

    #[test]
    fn test_citation_merge_keeps_first_title() {
        let mut first = CitationSet::default();
        first.add_source("Official docs", "https://example.com/a");
        first.add_query("rust async");

        let mut second = CitationSet::default();
        second.add_source("Mirror", "https://example.com/a");
        second.add_source("Blog", "https://example.com/b");
        second.add_query("rust async");
        second.add_query("tokio");

        first.merge(&second);

        assert_eq!(first.sources.len(), 2);
        assert_eq!(first.sources[0].title, "Official docs");
        assert_eq!(first.sources[1].uri, "https://example.com/b");
        assert_eq!(first.queries, vec!["rust async", "tokio"]);
    }

    #[test]
    fn test_empty_citations_not_stored() {
        let msg = Message::assistant("hi").with_citations(Some(CitationSet::default()));
        assert!(msg.citations.is_none());
    }

    #[test]
    fn test_take_dangling_user() {
        let mut transcript = Transcript::with_system("be helpful");
        transcript.push(Message::user("first"));
        transcript.push(Message::assistant("answer"));
        assert_eq!(transcript.take_dangling_user(), None);

        transcript.push(Message::user("interrupted question"));
        assert!(transcript.has_dangling_user());
        assert_eq!(
            transcript.take_dangling_user().as_deref(),
            Some("interrupted question")
        );
        assert_eq!(transcript.len(), 3);
        assert!(!transcript.has_dangling_user());
    }

    #[test]
    fn test_set_system_instruction_replaces_slot_zero() {
        let mut transcript = Transcript::new();
        transcript.push(Message::user("hello"));
        transcript.set_system_instruction("one");
        transcript.set_system_instruction("two");
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.system_instruction(), Some("two"));
    }

    #[test]
    fn test_to_request_replays_feedback_notes() {
        let mut transcript = Transcript::with_system("instruction");
        transcript.push(Message::user("plot it"));
        transcript.push(Message::assistant("```python\n1/0\n```"));
        transcript.push(Message::system("Code Execution Failed"));

        let (instruction, contents) = transcript.to_request();
        assert_eq!(instruction.as_deref(), Some("instruction"));
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1].role, ContentRole::Model);
        assert_eq!(contents[2].role, ContentRole::User);
        assert!(contents[2].text().starts_with("[System feedback]"));
    }

    #[test]
    fn test_message_serialization_skips_empty_fields() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }
}
