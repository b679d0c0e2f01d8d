//! Agent pipelines that turn one user request into one assistant answer
//!
//! Three agents share the same skeleton (a bounded loop of model calls whose
//! usage and citations are folded into one result):
//! - [`CodeFixAgent`] - run the code in a reply, ask for fixes on failure
//! - [`ResearchAgent`] - evaluate/search loop, then a grounded synthesis
//! - [`ReasoningAgent`] - brainstorm, critique each approach, integrate
//!
//! # Architecture
//!
//! ```text
//! TurnOrchestrator ─┬─ plain stream ──────────────────────────┐
//!                   ├─ ResearchAgent  (evaluate → search)* → synthesize
//!                   └─ ReasoningAgent  brainstorm → critique* → integrate
//!                                                              ↓
//!                                                   assistant message
//!                                                              ↓
//!                          CodeFixAgent (extract → execute → fix)* → result message
//! ```
//!
//! Sub-call failures are absorbed where they happen (degrade or skip). Only
//! a failed fix request or a failed final synthesis leaves an agent as
//! [`AgentError`].

pub mod accounting;
pub mod bounded;
pub mod code_fix;
pub mod events;
pub mod prompts;
pub mod reasoning;
pub mod research;
pub mod synthesis;
pub mod throttle;

pub use accounting::CallLedger;
pub use bounded::{run_bounded, BoundedPhase, Control, Cycle, LoopExit};
pub use code_fix::{
    extract_runnable_code, CodeFixAgent, CodeFixConfig, CodeFixContext, CodeFixOutcome,
    CodeFixReport, RetryState, SaveHook,
};
pub use events::{AgentEvent, EventSink};
pub use reasoning::{Approach, ReasoningAgent, ReasoningConfig, ReasoningReport};
pub use research::{ResearchAgent, ResearchConfig, ResearchReport, ResearchState};
pub use throttle::Throttle;

use crate::llm::{Content, GenerateConfig, LlmError};
use crate::transcript::{CitationSet, TokenUsage};

/// Number of trailing contents the planning calls look at
pub const PLANNING_CONTEXT: usize = 3;

/// Error type for agent runs
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The model call asking for corrected code failed
    #[error("Auto-fix generation failed: {0}")]
    FixRequest(#[source] LlmError),
    /// The final streamed answer of a multi-call agent failed
    #[error("{agent} synthesis failed: {source}")]
    Synthesis {
        agent: &'static str,
        #[source]
        source: LlmError,
    },
}

/// Input shared by the research and reasoning agents
#[derive(Debug, Clone, Copy)]
pub struct AgentRequest<'a> {
    /// Full conversation as request contents (last entry is the user turn)
    pub contents: &'a [Content],
    /// The conversation's system instruction ("" when none)
    pub system_instruction: &'a str,
    /// The turn's generation settings (max tokens, search, thinking)
    pub gen_config: &'a GenerateConfig,
}

impl<'a> AgentRequest<'a> {
    /// The last few contents, for cheap planning calls.
    pub fn recent(&self) -> &'a [Content] {
        let start = self.contents.len().saturating_sub(PLANNING_CONTEXT);
        &self.contents[start..]
    }
}

/// One finished answer of a multi-call agent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentReply {
    pub text: String,
    /// Sum over every sub-call the agent issued
    pub usage: TokenUsage,
    pub citations: CitationSet,
    pub thoughts: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_takes_last_three() {
        let contents: Vec<Content> = (0..5).map(|i| Content::user_text(i.to_string())).collect();
        let config = GenerateConfig::default();
        let request = AgentRequest {
            contents: &contents,
            system_instruction: "",
            gen_config: &config,
        };
        let recent = request.recent();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].text(), "2");

        let short = AgentRequest {
            contents: &contents[..1],
            ..request
        };
        assert_eq!(short.recent().len(), 1);
    }
}
