//! Prometheus metrics for agent runs, model calls and code execution
//!
//! Collectors are registered in the default registry on first use.
//! [`gather_text`] renders everything in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Encoder,
    Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Agent Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Agent invocations by agent and outcome.
    ///
    /// Labels:
    /// - agent: "code_fix", "research", "reasoning", "plain"
    /// - outcome: "success", "exhausted", "no_code", "failed", ...
    pub static ref AGENT_RUNS: CounterVec = register_counter_vec!(
        "gpchat_agent_runs_total",
        "Agent invocations by agent and outcome",
        &["agent", "outcome"]
    ).expect("failed to register AGENT_RUNS metric");

    /// Loop iterations used per agent invocation.
    pub static ref AGENT_ITERATIONS: HistogramVec = register_histogram_vec!(
        "gpchat_agent_iterations",
        "Loop iterations per agent invocation",
        &["agent"],
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 8.0]
    ).expect("failed to register AGENT_ITERATIONS metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // LLM Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Model calls by phase and status.
    ///
    /// Labels:
    /// - phase: "fix", "evaluate", "search", "synthesize", "brainstorm", ...
    /// - status: "ok", "error"
    pub static ref LLM_CALLS: CounterVec = register_counter_vec!(
        "gpchat_llm_calls_total",
        "Model calls by phase and status",
        &["phase", "status"]
    ).expect("failed to register LLM_CALLS metric");

    /// Wall-clock latency of model calls, by phase.
    pub static ref LLM_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "gpchat_llm_call_duration_seconds",
        "Model call latency by phase",
        &["phase"],
        vec![0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).expect("failed to register LLM_CALL_DURATION metric");

    /// Tokens consumed, by direction ("input", "output").
    pub static ref TOKENS: CounterVec = register_counter_vec!(
        "gpchat_tokens_total",
        "Tokens consumed by direction",
        &["direction"]
    ).expect("failed to register TOKENS metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Sandbox Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Sandbox runs by status ("success", "error", "timeout").
    pub static ref CODE_EXECUTIONS: CounterVec = register_counter_vec!(
        "gpchat_code_executions_total",
        "Sandbox runs by status",
        &["status"]
    ).expect("failed to register CODE_EXECUTIONS metric");

    pub static ref CODE_EXECUTION_DURATION: Histogram = register_histogram!(
        "gpchat_code_execution_duration_seconds",
        "Sandbox run latency",
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]
    ).expect("failed to register CODE_EXECUTION_DURATION metric");
}

/// Record the token usage of one call.
pub fn record_tokens(usage: &crate::transcript::TokenUsage) {
    TOKENS.with_label_values(&["input"]).inc_by(usage.input_tokens as f64);
    TOKENS.with_label_values(&["output"]).inc_by(usage.output_tokens as f64);
}

/// Render all registered metrics in the Prometheus text format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        return format!("# failed to encode metrics: {e}\n");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
