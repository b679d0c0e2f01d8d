//! Ollama `/api/chat` backend
//!
//! Ollama has no grounded search, so responses never carry citations and the
//! `web_search` flag is ignored. Structured output goes through the `format`
//! field, which accepts a JSON Schema. Streaming responses are NDJSON: one
//! JSON document per line, the last one with `done: true` and token counts.

use async_trait::async_trait;
use base64::Engine as _;
use futures_util::stream::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::lines::lines;
use super::{
    ChunkStream, Content, ContentRole, GenerateConfig, GenerateResponse, LlmError, LlmTransport,
    Part, StreamChunk,
};
use crate::transcript::TokenUsage;

const PROVIDER: &str = "ollama";

/// A message in an Ollama chat request or response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "system", "user", "assistant"
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            ..Self::default()
        }
    }

    fn from_content(content: &Content) -> Self {
        let role = match content.role {
            ContentRole::User => "user",
            ContentRole::Model => "assistant",
        };

        let mut text = String::new();
        let mut images = Vec::new();
        for part in &content.parts {
            match part {
                Part::Text(t) => text.push_str(t),
                Part::Blob { mime_type, data } if mime_type.starts_with("image/") => {
                    images.push(base64::engine::general_purpose::STANDARD.encode(data));
                }
                Part::Blob { mime_type, .. } => {
                    warn!(mime_type = %mime_type, "Ollama cannot take this attachment; skipping");
                }
            }
        }

        Self {
            role: role.to_string(),
            content: text,
            images: (!images.is_empty()).then_some(images),
            thinking: None,
        }
    }
}

/// One response document from /api/chat (whole reply or one stream line)
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub message: Option<ChatMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub prompt_eval_count: u64,
    #[serde(default)]
    pub eval_count: u64,
    #[serde(default)]
    pub error: Option<String>,
}

impl ChatResponse {
    fn usage(&self) -> Option<TokenUsage> {
        self.done
            .then(|| TokenUsage::new(self.prompt_eval_count, self.eval_count))
    }

    fn into_chunk(self) -> Result<StreamChunk, LlmError> {
        if let Some(error) = self.error {
            return Err(LlmError::Transport(error));
        }
        let usage = self.usage();
        let (text, thought) = match self.message {
            Some(m) => (
                Some(m.content).filter(|t| !t.is_empty()),
                m.thinking.filter(|t| !t.is_empty()),
            ),
            None => (None, None),
        };
        Ok(StreamChunk {
            text,
            thought,
            usage,
            citations: None,
        })
    }
}

/// Client for Ollama's /api/chat endpoint
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the Ollama server (e.g., "http://localhost:11434")
    /// * `model` - The model name (e.g., "qwen3")
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    /// Build the JSON body for /api/chat
    pub fn build_body(
        &self,
        contents: &[Content],
        config: &GenerateConfig,
        stream: bool,
    ) -> serde_json::Value {
        let mut messages = Vec::with_capacity(contents.len() + 1);
        if let Some(instruction) = &config.system_instruction {
            messages.push(ChatMessage::system(instruction.clone()));
        }
        messages.extend(contents.iter().map(ChatMessage::from_content));

        if config.web_search {
            debug!("Ollama has no grounded search; web_search ignored");
        }

        let mut options = serde_json::Map::new();
        if let Some(t) = config.temperature {
            options.insert("temperature".into(), serde_json::json!(t));
        }
        if let Some(n) = config.max_output_tokens {
            options.insert("num_predict".into(), serde_json::json!(n));
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
            "options": options,
        });

        if let Some(schema) = &config.response_schema {
            body["format"] = schema.clone();
        }
        if config.thinking.is_some() {
            body["think"] = serde_json::Value::Bool(true);
        }
        body
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, LlmError> {
        let response = self.client.post(self.endpoint()).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {e}>"));
            return Err(LlmError::Api {
                provider: PROVIDER,
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmTransport for OllamaClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        contents: &[Content],
        config: &GenerateConfig,
    ) -> Result<GenerateResponse, LlmError> {
        let body = self.build_body(contents, config, false);
        let text = self.post(&body).await?.text().await?;

        if text.is_empty() {
            return Err(LlmError::EmptyResponse(PROVIDER));
        }

        let chunk = serde_json::from_str::<ChatResponse>(&text)?.into_chunk()?;
        Ok(GenerateResponse {
            text: chunk.text.unwrap_or_default(),
            thoughts: chunk.thought.unwrap_or_default(),
            usage: chunk.usage,
            citations: Default::default(),
        })
    }

    async fn generate_stream(
        &self,
        contents: &[Content],
        config: &GenerateConfig,
    ) -> Result<ChunkStream, LlmError> {
        let body = self.build_body(contents, config, true);
        let bytes_stream = self.post(&body).await?.bytes_stream();

        // One NDJSON document per line; blank lines are keep-alives
        let chunks = lines(bytes_stream).filter_map(|line| async move {
            match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(
                    serde_json::from_str::<ChatResponse>(&line)
                        .map_err(LlmError::from)
                        .and_then(ChatResponse::into_chunk),
                ),
                Err(e) => Some(Err(e)),
            }
        });

        Ok(Box::pin(chunks))
    }
}
