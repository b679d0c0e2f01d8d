//! GP-Chat - conversational assistant core with agentic code execution
//!
//! This library holds the parts of an LLM chat front-end that coordinate more
//! than one model call per turn: automatic execution and repair of generated
//! Python code, a deep-research search loop and a deep-reasoning
//! brainstorm/critique pipeline.
//!
//! # Modules
//!
//! - `transcript` - conversation log, token usage, citations, history files
//! - `llm` - transport contract plus Gemini and Ollama backends
//! - `sandbox` - isolated Python worker with figure capture and timeouts
//! - `agent` - Code-Fix, Deep-Research and Deep-Reasoning agents
//! - `turn` - per-turn orchestration and session state
//! - `workspace` - per-session staging directory for uploaded files
//! - `config` - environment configuration
//! - `metrics` - Prometheus metrics for observability
//! - `tracing` - log and OpenTelemetry setup
//!
//! # Quick Start
//!
//! ```ignore
//! use gpchat::{AppConfig, EventSink, PythonSandbox, Session, TurnOrchestrator, TurnSettings};
//!
//! let config = AppConfig::from_env()?;
//! let orchestrator = TurnOrchestrator::new(config.build_transport()?, Arc::new(PythonSandbox::new()));
//! let mut session = Session::new(Some(&config.system_instruction));
//! let outcome = orchestrator
//!     .run_turn(&mut session, "plot y=x^2", &TurnSettings { auto_plot: true, ..Default::default() }, &EventSink::disabled())
//!     .await?;
//! ```

pub mod agent;
pub mod config;
pub mod llm;
pub mod metrics;
pub mod sandbox;
pub mod tracing;
pub mod transcript;
pub mod turn;
pub mod workspace;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentError, AgentEvent, EventSink};
pub use config::AppConfig;
pub use llm::{LlmError, LlmTransport};
pub use sandbox::{looks_like_failure, CodeRunner, ExecutionResult, PythonSandbox};
pub use transcript::{HistoryStore, Message, Role, TokenUsage, Transcript};
pub use turn::{Session, TurnError, TurnOrchestrator, TurnSettings};
pub use workspace::SessionWorkspace;
