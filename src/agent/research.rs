//! Deep-Research Agent
//!
//! Phase 1 is a bounded evaluate-then-search loop: each cycle the model
//! judges whether the findings so far are sufficient and, if not, proposes up
//! to three new search queries, each of which is run as one grounded call.
//! Phase 2 streams a final answer whose system instruction carries every
//! finding verbatim.
//!
//! A failing evaluate or search call only ends phase 1; a failing synthesis
//! fails the whole run.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Duration;
use tracing::{info, info_span, warn, Instrument};

use super::accounting::{observe_call, CallLedger};
use super::bounded::{run_bounded, BoundedPhase, Control, Cycle};
use super::events::{preview, EventSink};
use super::synthesis::stream_reply;
use super::throttle::{Throttle, DEFAULT_PAUSE};
use super::{prompts, AgentError, AgentReply, AgentRequest};
use crate::llm::{Content, GenerateConfig, LlmTransport};
use crate::metrics::{AGENT_ITERATIONS, AGENT_RUNS};
use crate::transcript::CitationSet;

const SUFFICIENT: &str = "sufficient";

#[derive(Debug, Clone)]
pub struct ResearchConfig {
    pub max_cycles: usize,
    pub max_queries_per_cycle: usize,
    /// Pause between successive model calls
    pub pause: Duration,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_cycles: 3,
            max_queries_per_cycle: 3,
            pause: DEFAULT_PAUSE,
        }
    }
}

/// What the research loop has gathered. Only ever grows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResearchState {
    /// Last cycle that started (1-based)
    pub cycle: usize,
    pub max_cycles: usize,
    pub accumulated_findings: Vec<String>,
    pub executed_queries: HashSet<String>,
    pub citations: CitationSet,
}

/// Structured reply of the evaluate call
#[derive(Debug, Deserialize)]
struct Evaluation {
    status: String,
    next_queries: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Clone)]
pub struct ResearchReport {
    pub reply: AgentReply,
    pub state: ResearchState,
}

pub struct ResearchAgent {
    transport: Arc<dyn LlmTransport>,
    config: ResearchConfig,
}

struct ResearchLoop<'a> {
    transport: &'a dyn LlmTransport,
    request: AgentRequest<'a>,
    events: &'a EventSink,
    max_queries: usize,
    throttle: &'a mut Throttle,
    ledger: &'a mut CallLedger,
    state: ResearchState,
}

impl ResearchLoop<'_> {
    async fn evaluate(&mut self, cycle: Cycle) -> Option<Evaluation> {
        let knowledge = if self.state.accumulated_findings.is_empty() {
            prompts::NO_FINDINGS_YET.to_string()
        } else {
            self.state.accumulated_findings.join("\n\n")
        };

        let mut contents = self.request.recent().to_vec();
        contents.push(Content::user_text(prompts::research_evaluation(&knowledge)));
        let config = GenerateConfig::default()
            .with_response_schema(prompts::research_evaluation_schema())
            .with_temperature(0.2);

        self.throttle.ready().await;
        let response = match observe_call("evaluate", self.transport.generate(&contents, &config)).await {
            Ok(response) => response,
            Err(e) => {
                warn!(cycle = cycle.number(), error = %e, "Research evaluation failed");
                return None;
            }
        };
        self.ledger.record_response(&response);

        match serde_json::from_str::<Evaluation>(&response.text) {
            Ok(evaluation) => Some(evaluation),
            Err(e) => {
                warn!(cycle = cycle.number(), error = %e, "Malformed research evaluation");
                None
            }
        }
    }

    /// New queries only, in proposal order, capped per cycle.
    fn select_queries(&self, proposed: Vec<String>) -> Vec<String> {
        let mut selected: Vec<String> = Vec::new();
        for query in proposed {
            let query = query.trim().to_string();
            if query.is_empty()
                || self.state.executed_queries.contains(&query)
                || selected.contains(&query)
            {
                continue;
            }
            selected.push(query);
            if selected.len() == self.max_queries {
                break;
            }
        }
        selected
    }
}

#[async_trait]
impl<'a> BoundedPhase for ResearchLoop<'a> {
    type Output = ();
    type Error = std::convert::Infallible;

    async fn step(&mut self, cycle: Cycle) -> Result<Control<()>, Self::Error> {
        self.state.cycle = cycle.number();
        self.events.status(format!(
            "Research cycle {}/{}...",
            cycle.number(),
            cycle.budget
        ));

        // Plan / evaluate
        let Some(evaluation) = self.evaluate(cycle).await else {
            self.events
                .thought("An error occurred during the research cycle; moving on to synthesis.");
            return Ok(Control::Finish(()));
        };

        self.events.thought(format!(
            "[Cycle {}] Reasoning: {}",
            cycle.number(),
            evaluation.reasoning
        ));
        info!(cycle = cycle.number(), status = %evaluation.status, reasoning = %evaluation.reasoning, "Research evaluation");

        if evaluation.status == SUFFICIENT || evaluation.next_queries.is_empty() {
            self.events
                .thought("Information judged sufficient; ending the research loop.");
            return Ok(Control::Finish(()));
        }

        let queries = self.select_queries(evaluation.next_queries);
        if queries.is_empty() {
            self.events
                .thought("No new search queries; ending the research loop.");
            return Ok(Control::Finish(()));
        }

        // Execute
        let search_config = GenerateConfig::default()
            .with_temperature(0.1)
            .with_web_search(true);

        for query in queries {
            self.state.executed_queries.insert(query.clone());
            self.events.thought(format!("Searching: `{query}`"));

            let contents = [Content::user_text(prompts::research_search(&query))];
            self.throttle.ready().await;
            let response =
                match observe_call("search", self.transport.generate(&contents, &search_config)).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(query = %query, error = %e, "Research search failed");
                        self.events.thought(
                            "An error occurred during the research cycle; moving on to synthesis.",
                        );
                        return Ok(Control::Finish(()));
                    }
                };

            self.ledger.record_response(&response);
            self.state.citations.merge(&response.citations);
            self.state
                .accumulated_findings
                .push(prompts::research_finding(&query, &response.text));
            self.events
                .thought(format!("  Result: {}", preview(&response.text, 100)));
        }

        Ok(Control::Continue)
    }
}

impl ResearchAgent {
    pub fn new(transport: Arc<dyn LlmTransport>, config: ResearchConfig) -> Self {
        Self { transport, config }
    }

    pub async fn run(
        &self,
        request: AgentRequest<'_>,
        events: &EventSink,
    ) -> Result<ResearchReport, AgentError> {
        let span = info_span!(
            "deep_research",
            max_cycles = self.config.max_cycles,
            otel.name = "deep_research"
        );

        async {
            info!("Starting deep research");
            let mut throttle = Throttle::new(self.config.pause);
            let mut ledger = CallLedger::new();

            // Phase 1: dynamic research
            let mut phase = ResearchLoop {
                transport: self.transport.as_ref(),
                request,
                events,
                max_queries: self.config.max_queries_per_cycle,
                throttle: &mut throttle,
                ledger: &mut ledger,
                state: ResearchState {
                    max_cycles: self.config.max_cycles,
                    ..ResearchState::default()
                },
            };
            let exit = match run_bounded(&mut phase, self.config.max_cycles).await {
                Ok(exit) => exit,
                Err(never) => match never {},
            };
            AGENT_ITERATIONS
                .with_label_values(&["research"])
                .observe(exit.iterations() as f64);
            let state = phase.state;

            // Phase 2: synthesis
            events.status("Integrating findings into the final answer...");
            let compiled = if state.accumulated_findings.is_empty() {
                prompts::NO_FINDINGS.to_string()
            } else {
                state.accumulated_findings.join("\n\n")
            };
            let config = GenerateConfig {
                system_instruction: Some(prompts::research_synthesis(
                    request.system_instruction,
                    &compiled,
                )),
                temperature: Some(0.3),
                max_output_tokens: request.gen_config.max_output_tokens,
                response_schema: None,
                web_search: request.gen_config.web_search,
                thinking: request.gen_config.thinking,
            };

            throttle.ready().await;
            let streamed =
                match stream_reply(self.transport.as_ref(), "synthesize", request.contents, &config, events)
                    .await
                {
                    Ok(streamed) => streamed,
                    Err(source) => {
                        warn!(error = %source, "Research synthesis failed");
                        AGENT_RUNS.with_label_values(&["research", "failed"]).inc();
                        return Err(AgentError::Synthesis {
                            agent: "research",
                            source,
                        });
                    }
                };
            ledger.record(streamed.usage, Some(&streamed.citations));

            let (usage, citations) = ledger.into_parts();
            AGENT_RUNS.with_label_values(&["research", "success"]).inc();
            info!(
                cycles = state.cycle,
                queries = state.executed_queries.len(),
                findings = state.accumulated_findings.len(),
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Deep research finished"
            );

            Ok(ResearchReport {
                reply: AgentReply {
                    text: streamed.text,
                    usage,
                    citations,
                    thoughts: streamed.thoughts,
                },
                state,
            })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_requires_status_and_queries() {
        let ok: Evaluation =
            serde_json::from_str(r#"{"status":"needs_more_info","next_queries":["a"]}"#).unwrap();
        assert_eq!(ok.next_queries, vec!["a"]);
        assert!(ok.reasoning.is_empty());

        assert!(serde_json::from_str::<Evaluation>(r#"{"status":"sufficient"}"#).is_err());
        assert!(serde_json::from_str::<Evaluation>("not json").is_err());
    }

    #[test]
    fn test_default_config() {
        let config = ResearchConfig::default();
        assert_eq!(config.max_cycles, 3);
        assert_eq!(config.max_queries_per_cycle, 3);
        assert_eq!(config.pause, Duration::from_secs(1));
    }
}
