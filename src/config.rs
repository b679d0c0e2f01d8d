//! Application configuration from the environment
//!
//! Values come from process environment variables, optionally seeded from
//! `*.env` files (see [`find_env_files`] and [`load_env_file`]).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::llm::{GeminiClient, LlmTransport, OllamaClient};
use crate::turn::MAX_OUTPUT_TOKENS;

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful and versatile AI assistant.
Your capabilities include:
1. **General Knowledge**: Answering questions on a wide range of topics.
2. **Coding**: Writing, debugging, and explaining code in various languages.
3. **Document Analysis**: Understanding and summarizing PDFs and text files.
4. **Image Understanding**: Analyzing images and diagrams.
5. **Data Analysis**: Executing Python code to analyze data and visualize results.

Always respond in a helpful, polite, and accurate manner.
When dealing with code, provide clean, efficient, and well-commented solutions.
";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("No API key set (GEMINI_API_KEY or GOOGLE_API_KEY)")]
    MissingApiKey,
    #[error("Failed to load env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
    #[error("Failed to read env directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Model backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Gemini,
    Ollama,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: Backend,
    pub gemini_model: String,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: Option<String>,
    pub ollama_host: String,
    pub ollama_model: String,
    /// Output token limit per call
    pub max_output_tokens: u32,
    /// Wall-clock limit for one code execution
    pub execution_timeout: Duration,
    /// Interpreter for code execution. Workers run isolated (`-I`), which
    /// hides user site-packages; set `PYTHON_USER_SITE=1` when pandas or
    /// matplotlib were installed with `pip install --user`.
    pub python_bin: String,
    pub python_user_site: bool,
    pub workspace_dir: PathBuf,
    pub history_dir: PathBuf,
    /// Pause between sub-calls of the research and reasoning agents
    pub pause: Duration,
    pub system_instruction: String,
    pub otlp_endpoint: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Gemini,
            gemini_model: "gemini-3-pro-preview".to_string(),
            gemini_api_key: None,
            gemini_base_url: None,
            ollama_host: "http://localhost:11434".to_string(),
            ollama_model: "qwen3".to_string(),
            max_output_tokens: MAX_OUTPUT_TOKENS,
            execution_timeout: Duration::from_secs(30),
            python_bin: "python3".to_string(),
            python_user_site: false,
            workspace_dir: PathBuf::from("temp_workspace"),
            history_dir: PathBuf::from("chat_log"),
            pause: Duration::from_millis(1000),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            otlp_endpoint: None,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

fn parse_flag(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key, value }),
    }
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`; unset or empty keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(value) = get("GPCHAT_BACKEND") {
            config.backend = match value.trim().to_ascii_lowercase().as_str() {
                "gemini" => Backend::Gemini,
                "ollama" => Backend::Ollama,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "GPCHAT_BACKEND",
                        value,
                    })
                }
            };
        }
        if let Some(value) = get("GEMINI_MODEL_ID") {
            config.gemini_model = value;
        }
        config.gemini_api_key = get("GEMINI_API_KEY").or_else(|| get("GOOGLE_API_KEY"));
        config.gemini_base_url = get("GEMINI_BASE_URL");
        if let Some(value) = get("OLLAMA_HOST") {
            config.ollama_host = value;
        }
        if let Some(value) = get("OLLAMA_MODEL") {
            config.ollama_model = value;
        }
        if let Some(value) = get("MAX_TOKEN") {
            let max: u32 = parse_number("MAX_TOKEN", value)?;
            config.max_output_tokens = max.min(MAX_OUTPUT_TOKENS);
        }
        if let Some(value) = get("EXECUTION_TIMEOUT") {
            config.execution_timeout = Duration::from_secs(parse_number("EXECUTION_TIMEOUT", value)?);
        }
        if let Some(value) = get("PYTHON_BIN") {
            config.python_bin = value;
        }
        if let Some(value) = get("PYTHON_USER_SITE") {
            config.python_user_site = parse_flag("PYTHON_USER_SITE", value)?;
        }
        if let Some(value) = get("GPCHAT_WORKSPACE_DIR") {
            config.workspace_dir = PathBuf::from(value);
        }
        if let Some(value) = get("GPCHAT_HISTORY_DIR") {
            config.history_dir = PathBuf::from(value);
        }
        if let Some(value) = get("GPCHAT_PAUSE_MS") {
            config.pause = Duration::from_millis(parse_number("GPCHAT_PAUSE_MS", value)?);
        }
        if let Some(value) = get("GPCHAT_SYSTEM_PROMPT") {
            config.system_instruction = value;
        }
        config.otlp_endpoint = get("OTEL_EXPORTER_OTLP_ENDPOINT");

        Ok(config)
    }

    /// Model identifier of the selected backend
    pub fn model(&self) -> &str {
        match self.backend {
            Backend::Gemini => &self.gemini_model,
            Backend::Ollama => &self.ollama_model,
        }
    }

    /// Construct the selected transport.
    pub fn build_transport(&self) -> Result<Arc<dyn LlmTransport>, ConfigError> {
        let transport: Arc<dyn LlmTransport> = match self.backend {
            Backend::Gemini => {
                let key = self
                    .gemini_api_key
                    .clone()
                    .ok_or(ConfigError::MissingApiKey)?;
                let mut client = GeminiClient::new(key, &self.gemini_model);
                if let Some(base) = &self.gemini_base_url {
                    client = client.with_base_url(base);
                }
                Arc::new(client)
            }
            Backend::Ollama => Arc::new(OllamaClient::new(&self.ollama_host, &self.ollama_model)),
        };
        info!(provider = transport.name(), model = transport.model(), "Transport ready");
        Ok(transport)
    }
}

/// `*.env` files in `dir`, sorted by name. A missing directory yields none.
pub fn find_env_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, ConfigError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "env"))
        .collect();
    files.sort();
    Ok(files)
}

/// Load one env file into the process environment, overriding existing keys.
pub fn load_env_file(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let path = path.as_ref();
    dotenvy::from_path_override(path).map_err(|source| ConfigError::EnvFile {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "Loaded env file");
    Ok(())
}
