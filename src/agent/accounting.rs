//! Usage and citation bookkeeping across the sub-calls of one agent run
//!
//! An agent may issue many model calls for a single turn. The caller only
//! ever sees the aggregate: summed input/output tokens and one merged
//! citation set.

use std::future::Future;
use std::time::Instant;

use tracing::debug;

use crate::llm::{GenerateResponse, LlmError};
use crate::metrics::{record_tokens, LLM_CALLS, LLM_CALL_DURATION};
use crate::transcript::{CitationSet, TokenUsage};

#[derive(Debug, Clone, Default)]
pub struct CallLedger {
    input_tokens: u64,
    output_tokens: u64,
    calls: usize,
    citations: CitationSet,
}

impl CallLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one completed call.
    pub fn record(&mut self, usage: Option<TokenUsage>, citations: Option<&CitationSet>) {
        self.calls += 1;
        if let Some(usage) = usage {
            self.input_tokens += usage.input_tokens;
            self.output_tokens += usage.output_tokens;
            record_tokens(&usage);
        }
        if let Some(citations) = citations {
            self.citations.merge(citations);
        }
    }

    pub fn record_response(&mut self, response: &GenerateResponse) {
        self.record(response.usage, Some(&response.citations));
    }

    /// Summed usage; `total_tokens` is recomputed as input + output.
    pub fn usage(&self) -> TokenUsage {
        TokenUsage::new(self.input_tokens, self.output_tokens)
    }

    pub fn citations(&self) -> &CitationSet {
        &self.citations
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn into_parts(self) -> (TokenUsage, CitationSet) {
        (self.usage(), self.citations)
    }
}

/// Time a model call and count it under `phase`.
pub async fn observe_call<T, F>(phase: &'static str, call: F) -> Result<T, LlmError>
where
    F: Future<Output = Result<T, LlmError>>,
{
    let start = Instant::now();
    let result = call.await;
    let elapsed = start.elapsed();

    LLM_CALL_DURATION
        .with_label_values(&[phase])
        .observe(elapsed.as_secs_f64());
    let status = if result.is_ok() { "ok" } else { "error" };
    LLM_CALLS.with_label_values(&[phase, status]).inc();
    debug!(phase, status, duration_ms = elapsed.as_millis() as u64, "Model call finished");

    result
}
