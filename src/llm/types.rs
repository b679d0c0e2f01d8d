//! Request and response shapes shared by all backends

use crate::transcript::{CitationSet, TokenUsage};

/// Which side of the conversation a request content belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentRole {
    User,
    Model,
}

/// One piece of a request content
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    /// Binary payload such as an image or a PDF
    Blob { mime_type: String, data: Vec<u8> },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(text.into())
    }

    pub fn blob(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Part::Blob {
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text(t) => Some(t),
            Part::Blob { .. } => None,
        }
    }
}

/// A role-tagged list of parts
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub role: ContentRole,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: ContentRole::User,
            parts,
        }
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: ContentRole::Model,
            parts,
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![Part::text(text)])
    }

    /// Concatenated text of all text parts
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }
}

/// How hard the model should think before answering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingLevel {
    Low,
    High,
}

/// Per-request generation settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateConfig {
    pub system_instruction: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    /// JSON Schema the reply must conform to; implies a JSON response
    pub response_schema: Option<serde_json::Value>,
    /// Enable grounded web search where the backend supports it
    pub web_search: bool,
    /// Request thinking and have thought fragments returned
    pub thinking: Option<ThinkingLevel>,
}

impl GenerateConfig {
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_response_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.web_search = enabled;
        self
    }

    pub fn with_thinking(mut self, level: Option<ThinkingLevel>) -> Self {
        self.thinking = level;
        self
    }
}

/// Complete response from a blocking call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateResponse {
    /// Answer text, thought fragments excluded
    pub text: String,
    pub thoughts: String,
    pub usage: Option<TokenUsage>,
    pub citations: CitationSet,
}

impl GenerateResponse {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// One incremental piece of a streamed response.
///
/// `usage` is a running snapshot: the last one seen in a stream is the usage of
/// the whole call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    pub text: Option<String>,
    pub thought: Option<String>,
    pub usage: Option<TokenUsage>,
    pub citations: Option<CitationSet>,
}

impl StreamChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn thought(thought: impl Into<String>) -> Self {
        Self {
            thought: Some(thought.into()),
            ..Self::default()
        }
    }

    pub fn usage(usage: TokenUsage) -> Self {
        Self {
            usage: Some(usage),
            ..Self::default()
        }
    }
}
