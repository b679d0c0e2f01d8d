//! LLM transport contract and backends
//!
//! The agents only ever talk to a model through [`LlmTransport`], which has two
//! request shapes: a blocking `generate` and an incremental `generate_stream`.
//! Retries, backoff and authentication belong to the backend, not the agents.
//!
//! Backends:
//! - [`GeminiClient`] - Gemini REST API (grounded search, citations, thoughts)
//! - [`OllamaClient`] - Ollama `/api/chat` (local inference)

pub mod gemini;
pub mod lines;
pub mod ollama;
mod types;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::Stream;

pub use gemini::GeminiClient;
pub use ollama::OllamaClient;
pub use types::{
    Content, ContentRole, GenerateConfig, GenerateResponse, Part, StreamChunk, ThinkingLevel,
};

/// A stream of incremental response chunks
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, LlmError>> + Send>>;

/// Error type for transport operations
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{provider} API error (HTTP {status}): {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("Empty response from {0}")]
    EmptyResponse(&'static str),
    #[error("Missing API key for {0}")]
    MissingApiKey(&'static str),
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Interface every model backend implements.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    /// Provider name for logs and metrics
    fn name(&self) -> &'static str;

    /// Model identifier requests are sent to
    fn model(&self) -> &str;

    /// Send a request and wait for the complete response.
    async fn generate(
        &self,
        contents: &[Content],
        config: &GenerateConfig,
    ) -> Result<GenerateResponse, LlmError>;

    /// Send a request and consume the response incrementally.
    async fn generate_stream(
        &self,
        contents: &[Content],
        config: &GenerateConfig,
    ) -> Result<ChunkStream, LlmError>;
}
