//! Gemini REST backend
//!
//! Uses `models/{model}:generateContent` for blocking calls and
//! `models/{model}:streamGenerateContent?alt=sse` for streaming. This is the
//! only backend with grounded Google Search, so it is where citations come
//! from: each candidate's `groundingMetadata` is folded into a `CitationSet`.

use async_trait::async_trait;
use base64::Engine as _;
use futures_util::stream::StreamExt;
use serde::{Deserialize, Serialize};

use super::lines::{lines, sse_data};
use super::{
    ChunkStream, Content, ContentRole, GenerateConfig, GenerateResponse, LlmError, LlmTransport,
    Part, StreamChunk, ThinkingLevel,
};
use crate::transcript::{CitationSet, TokenUsage};

const PROVIDER: &str = "gemini";

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_json_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_level: &'static str,
    include_thoughts: bool,
}

impl From<&Part> for GeminiPart {
    fn from(part: &Part) -> Self {
        match part {
            Part::Text(text) => GeminiPart::Text { text: text.clone() },
            Part::Blob { mime_type, data } => GeminiPart::InlineData {
                inline_data: InlineData {
                    mime_type: mime_type.clone(),
                    data: base64::engine::general_purpose::STANDARD.encode(data),
                },
            },
        }
    }
}

impl From<&Content> for GeminiContent {
    fn from(content: &Content) -> Self {
        Self {
            role: Some(match content.role {
                ContentRole::User => "user",
                ContentRole::Model => "model",
            }),
            parts: content.parts.iter().map(GeminiPart::from).collect(),
        }
    }
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    /// `true` marks `text` as a thought; some API versions put the thought
    /// text itself here.
    #[serde(default)]
    thought: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    web_search_queries: Vec<String>,
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebSource>,
}

#[derive(Debug, Deserialize)]
struct WebSource {
    #[serde(default)]
    uri: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

impl GeminiResponse {
    /// Flatten the first candidate into a chunk.
    pub fn into_chunk(self) -> StreamChunk {
        let usage = self.usage_metadata.map(|u| TokenUsage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });

        let mut text = String::new();
        let mut thought = String::new();
        let mut citations = CitationSet::default();

        if let Some(candidate) = self.candidates.into_iter().next() {
            if let Some(meta) = candidate.grounding_metadata {
                for query in meta.web_search_queries {
                    citations.add_query(query);
                }
                for web in meta.grounding_chunks.into_iter().filter_map(|c| c.web) {
                    citations.add_source(web.title, web.uri);
                }
            }

            let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
            for part in parts {
                match part.thought {
                    Some(serde_json::Value::String(t)) if !t.is_empty() => thought.push_str(&t),
                    Some(serde_json::Value::Bool(true)) => {
                        thought.push_str(part.text.as_deref().unwrap_or_default())
                    }
                    _ => text.push_str(part.text.as_deref().unwrap_or_default()),
                }
            }
        }

        StreamChunk {
            text: (!text.is_empty()).then_some(text),
            thought: (!thought.is_empty()).then_some(thought),
            usage,
            citations: (!citations.is_empty()).then_some(citations),
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// Google Gemini API client
#[derive(Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_API_BASE.to_string(),
        }
    }

    /// Point the client at another endpoint (proxy, test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    /// Build the request body for the Gemini API.
    pub fn build_request(&self, contents: &[Content], config: &GenerateConfig) -> GeminiRequest {
        let system_instruction = config
            .system_instruction
            .as_ref()
            .filter(|s| !s.is_empty())
            .map(|s| GeminiContent {
                role: None,
                parts: vec![GeminiPart::Text { text: s.clone() }],
            });

        let tools = config
            .web_search
            .then(|| vec![serde_json::json!({ "googleSearch": {} })]);

        let thinking_config = config.thinking.map(|level| ThinkingConfig {
            thinking_level: match level {
                ThinkingLevel::Low => "LOW",
                ThinkingLevel::High => "HIGH",
            },
            include_thoughts: true,
        });

        GeminiRequest {
            contents: contents.iter().map(GeminiContent::from).collect(),
            system_instruction,
            tools,
            generation_config: GenerationConfig {
                temperature: config.temperature,
                max_output_tokens: config.max_output_tokens,
                response_mime_type: config
                    .response_schema
                    .as_ref()
                    .map(|_| "application/json"),
                response_json_schema: config.response_schema.clone(),
                thinking_config,
            },
        }
    }

    async fn post(&self, url: String, body: &GeminiRequest) -> Result<reqwest::Response, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingApiKey(PROVIDER));
        }

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

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
impl LlmTransport for GeminiClient {
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
        let body = self.build_request(contents, config);
        let text = self.post(self.url("generateContent"), &body).await?.text().await?;
        if text.is_empty() {
            return Err(LlmError::EmptyResponse(PROVIDER));
        }

        let chunk = serde_json::from_str::<GeminiResponse>(&text)?.into_chunk();
        Ok(GenerateResponse {
            text: chunk.text.unwrap_or_default(),
            thoughts: chunk.thought.unwrap_or_default(),
            usage: chunk.usage,
            citations: chunk.citations.unwrap_or_default(),
        })
    }

    async fn generate_stream(
        &self,
        contents: &[Content],
        config: &GenerateConfig,
    ) -> Result<ChunkStream, LlmError> {
        let body = self.build_request(contents, config);
        let bytes_stream = self
            .post(self.url("streamGenerateContent?alt=sse"), &body)
            .await?
            .bytes_stream();

        let chunks = lines(bytes_stream).filter_map(|line| async move {
            let line = match line {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };
            let data = sse_data(&line)?;
            if data.is_empty() || data == "[DONE]" {
                return None;
            }
            Some(
                serde_json::from_str::<GeminiResponse>(data)
                    .map(GeminiResponse::into_chunk)
                    .map_err(LlmError::from),
            )
        });

        Ok(Box::pin(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_shape() {
        let client = GeminiClient::new("key", "gemini-3-pro-preview");
        let contents = vec![
            Content::user(vec![Part::blob("application/pdf", vec![1, 2, 3]), Part::text("summarize")]),
            Content::model(vec![Part::text("ok")]),
        ];
        let config = GenerateConfig::default()
            .with_system_instruction("sys")
            .with_web_search(true)
            .with_thinking(Some(ThinkingLevel::High))
            .with_response_schema(serde_json::json!({"type": "object"}));

        let body = serde_json::to_value(client.build_request(&contents, &config)).unwrap();

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        assert!(body["systemInstruction"].get("role").is_none());
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["inlineData"]["mimeType"], "application/pdf");
        assert_eq!(body["contents"][0]["parts"][0]["inlineData"]["data"], "AQID");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["tools"][0]["googleSearch"], serde_json::json!({}));
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["thinkingConfig"]["thinkingLevel"], "HIGH");
        assert_eq!(body["generationConfig"]["thinkingConfig"]["includeThoughts"], true);
    }

    #[test]
    fn test_plain_request_omits_optional_fields() {
        let client = GeminiClient::new("key", "m");
        let body =
            serde_json::to_value(client.build_request(&[Content::user_text("hi")], &GenerateConfig::default()))
                .unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("systemInstruction").is_none());
        assert_eq!(body["generationConfig"], serde_json::json!({}));
    }

    #[test]
    fn test_response_splits_thoughts_and_collects_grounding() {
        let raw = r#"{
            "candidates": [{
                "content": {"parts": [
                    {"text": "thinking...", "thought": true},
                    {"text": "Answer "},
                    {"text": "done."}
                ]},
                "groundingMetadata": {
                    "webSearchQueries": ["q1", "q1"],
                    "groundingChunks": [
                        {"web": {"uri": "https://a", "title": "A"}},
                        {"web": {"uri": "https://a", "title": "A again"}},
                        {}
                    ]
                }
            }],
            "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 3, "totalTokenCount": 12}
        }"#;

        let chunk = serde_json::from_str::<GeminiResponse>(raw).unwrap().into_chunk();

        assert_eq!(chunk.text.as_deref(), Some("Answer done."));
        assert_eq!(chunk.thought.as_deref(), Some("thinking..."));
        assert_eq!(chunk.usage.unwrap().total_tokens, 12);
        let citations = chunk.citations.unwrap();
        assert_eq!(citations.queries, vec!["q1"]);
        assert_eq!(citations.sources.len(), 1);
        assert_eq!(citations.sources[0].title, "A");
    }

    #[test]
    fn test_empty_candidates_is_empty_chunk() {
        let chunk = serde_json::from_str::<GeminiResponse>("{}").unwrap().into_chunk();
        assert_eq!(chunk, StreamChunk::default());
    }
}
