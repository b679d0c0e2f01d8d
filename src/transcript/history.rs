//! Flat JSON snapshots of conversations
//!
//! One file per conversation under the history directory, named
//! `<yymmdd>_<title>.json`. The title comes from one cheap completion over the
//! conversation; the file name is fixed on the first save and later saves
//! overwrite the same file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Message, Role};
use crate::llm::{Content, GenerateConfig, LlmTransport, ThinkingLevel};

/// Conversations shorter than this (non-system messages) are not saved.
pub const MIN_MESSAGES_TO_SAVE: usize = 4;

const TITLE_EXCERPT_CHARS: usize = 500;
const UNTITLED: &str = "Untitled chat";
const TITLE_FAILED: &str = "Auto-saved chat";

const TITLE_PROMPT: &str = "Summarize the following conversation as a short title of roughly \
3 to 6 words. The title is used as a file name, so do not include symbols.\n\
Example: Python class inheritance\n\
Example: AI trends in 2024\n\n\
Conversation:\n";

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("History I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed history file: {0}")]
    Format(#[from] serde_json::Error),
    #[error("Invalid history file name: {0}")]
    InvalidName(String),
}

/// Hook the turn orchestrator calls after a turn when auto-save is enabled.
///
/// `handle` is the file name of the previous save for this conversation, if
/// any. Returns the handle to use next time, or `None` when nothing was saved.
#[async_trait]
pub trait AutoSave: Send + Sync {
    async fn save(
        &self,
        handle: Option<&str>,
        messages: &[Message],
        editors: &[String],
        multi_editor: bool,
    ) -> Option<String>;
}

/// On-disk snapshot layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub python_canvases: Vec<String>,
    #[serde(default)]
    pub multi_code_enabled: bool,
    #[serde(default)]
    pub saved_at: String,
}

/// Summary of a snapshot for listing
#[derive(Debug, Clone, Serialize)]
pub struct HistorySummary {
    pub file: String,
    pub saved_at: String,
    pub message_count: usize,
}

/// Snapshot storage manager
pub struct HistoryStore {
    base_dir: PathBuf,
    titler: Option<Arc<dyn LlmTransport>>,
}

impl HistoryStore {
    /// Create a store, creating the directory if needed
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            titler: None,
        })
    }

    /// Use this transport to generate titles for new files.
    pub fn with_titler(mut self, transport: Arc<dyn LlmTransport>) -> Self {
        self.titler = Some(transport);
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Write a snapshot to `file`, replacing any previous content.
    pub fn write(&self, file: &str, snapshot: &HistorySnapshot) -> Result<PathBuf, HistoryError> {
        let path = self.path_for(file)?;
        let json = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    pub fn load(&self, file: &str) -> Result<HistorySnapshot, HistoryError> {
        let json = std::fs::read_to_string(self.path_for(file)?)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// List all snapshots, newest first. Unreadable files are skipped.
    pub fn list(&self) -> Result<Vec<HistorySummary>, HistoryError> {
        let mut summaries = Vec::new();
        for entry in std::fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            let Some(file) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match self.load(file) {
                Ok(snapshot) => summaries.push(HistorySummary {
                    file: file.to_string(),
                    saved_at: snapshot.saved_at,
                    message_count: snapshot.messages.len(),
                }),
                Err(e) => debug!(file = %file, error = %e, "Skipping unreadable history file"),
            }
        }
        summaries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(summaries)
    }

    pub fn delete(&self, file: &str) -> Result<(), HistoryError> {
        std::fs::remove_file(self.path_for(file)?)?;
        Ok(())
    }

    /// Pick a file name for a new conversation: `<yymmdd>_<title>.json`,
    /// suffixed `_1`, `_2`, ... if taken.
    pub async fn new_file_name(&self, messages: &[Message]) -> String {
        let date = chrono::Local::now().format("%y%m%d");
        let title = self.generate_title(messages).await;
        self.unique_file_name(&format!("{date}_{title}"))
    }

    fn unique_file_name(&self, stem: &str) -> String {
        let mut candidate = format!("{stem}.json");
        let mut counter = 1;
        while self.base_dir.join(&candidate).exists() {
            candidate = format!("{stem}_{counter}.json");
            counter += 1;
        }
        candidate
    }

    async fn generate_title(&self, messages: &[Message]) -> String {
        let Some(transport) = &self.titler else {
            return UNTITLED.to_string();
        };

        let mut conversation = String::new();
        for m in messages.iter().filter(|m| m.role != Role::System) {
            let excerpt: String = m.content.chars().take(TITLE_EXCERPT_CHARS).collect();
            conversation.push_str(&format!("{}: {}\n", role_label(m.role), excerpt));
        }

        let config = GenerateConfig {
            temperature: Some(0.1),
            max_output_tokens: Some(10_000),
            thinking: Some(ThinkingLevel::Low),
            ..GenerateConfig::default()
        };
        let contents = [Content::user_text(format!("{TITLE_PROMPT}{conversation}"))];

        match transport.generate(&contents, &config).await {
            Ok(response) => {
                let title = sanitize_file_name(response.text.trim());
                if title.is_empty() {
                    UNTITLED.to_string()
                } else {
                    title
                }
            }
            Err(e) => {
                warn!(error = %e, "Title generation failed");
                TITLE_FAILED.to_string()
            }
        }
    }

    /// Resolve a bare file name inside the store; anything path-like is rejected.
    fn path_for(&self, file: &str) -> Result<PathBuf, HistoryError> {
        let bare = Path::new(file).file_name().and_then(|n| n.to_str());
        if file.is_empty() || bare != Some(file) {
            return Err(HistoryError::InvalidName(file.to_string()));
        }
        Ok(self.base_dir.join(file))
    }
}

#[async_trait]
impl AutoSave for HistoryStore {
    async fn save(
        &self,
        handle: Option<&str>,
        messages: &[Message],
        editors: &[String],
        multi_editor: bool,
    ) -> Option<String> {
        let conversation = messages.iter().filter(|m| m.role != Role::System).count();
        if conversation < MIN_MESSAGES_TO_SAVE {
            return None;
        }

        let file = match handle {
            Some(existing) => existing.to_string(),
            None => self.new_file_name(messages).await,
        };

        let snapshot = HistorySnapshot {
            messages: messages.to_vec(),
            python_canvases: editors.to_vec(),
            multi_code_enabled: multi_editor,
            saved_at: chrono::Local::now().to_rfc3339(),
        };

        match self.write(&file, &snapshot) {
            Ok(path) => info!(path = %path.display(), "Auto-saved history"),
            Err(e) => warn!(file = %file, error = %e, "Auto-save failed"),
        }
        // The name stays claimed even when the write failed so the next
        // save retries the same file.
        Some(file)
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// Replace characters that are not allowed in file names and drop newlines.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .map(|c| match c {
            '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(turns: usize) -> Vec<Message> {
        let mut messages = vec![Message::system("sys")];
        for i in 0..turns {
            messages.push(Message::user(format!("question {i}")));
            messages.push(Message::assistant(format!("answer {i}")));
        }
        messages
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("a/b:c*d?\"e\"<f>|g\\h"), "a_b_c_d__e__f__g_h");
        assert_eq!(sanitize_file_name("  Line one\nline two\r "), "Line oneline two");
    }

    #[tokio::test]
    async fn test_short_conversation_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path()).unwrap();

        let handle = store.save(None, &conversation(1), &[], false).await;

        assert!(handle.is_none());
        assert!(store.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_overwrite_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path()).unwrap();
        let editors = vec!["print(1)".to_string()];

        let first = store.save(None, &conversation(2), &editors, true).await.unwrap();
        assert!(first.ends_with("_Untitled chat.json"));

        let second = store
            .save(Some(&first), &conversation(3), &editors, true)
            .await
            .unwrap();
        assert_eq!(first, second);

        let snapshot = store.load(&first).unwrap();
        assert_eq!(snapshot.messages.len(), 7);
        assert_eq!(snapshot.python_canvases, editors);
        assert!(snapshot.multi_code_enabled);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_name_collisions_get_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path()).unwrap();

        let a = store.save(None, &conversation(2), &[], false).await.unwrap();
        let b = store.save(None, &conversation(2), &[], false).await.unwrap();
        let c = store.save(None, &conversation(2), &[], false).await.unwrap();

        assert!(b.ends_with("_Untitled chat_1.json"));
        assert!(c.ends_with("_Untitled chat_2.json"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_path_like_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path()).unwrap();
        assert!(matches!(store.load("../x.json"), Err(HistoryError::InvalidName(_))));
        assert!(matches!(store.delete(""), Err(HistoryError::InvalidName(_))));
    }

    #[test]
    fn test_delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path()).unwrap();
        let snapshot = HistorySnapshot {
            messages: conversation(2),
            python_canvases: Vec::new(),
            multi_code_enabled: false,
            saved_at: "2025-01-01T00:00:00+00:00".to_string(),
        };
        store.write("x.json", &snapshot).unwrap();
        store.delete("x.json").unwrap();
        assert!(store.list().unwrap().is_empty());
    }
}
