//! Deep-Reasoning Agent
//!
//! Brainstorm up to three distinct approaches, elaborate and self-critique
//! each one, then stream one integrated answer built on those critiques.

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
use crate::llm::{Content, GenerateConfig, LlmTransport, ThinkingLevel};
use crate::metrics::{AGENT_ITERATIONS, AGENT_RUNS};

#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    pub max_approaches: usize,
    /// Pause between successive model calls
    pub pause: Duration,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            max_approaches: 3,
            pause: DEFAULT_PAUSE,
        }
    }
}

/// One candidate strategy from the brainstorm
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Approach {
    pub name: String,
    pub description: String,
}

impl Approach {
    fn fallback() -> Self {
        Self {
            name: prompts::FALLBACK_APPROACH_NAME.to_string(),
            description: prompts::FALLBACK_APPROACH_DESCRIPTION.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Brainstorm {
    approaches: Vec<Approach>,
}

#[derive(Debug, Clone)]
pub struct ReasoningReport {
    pub reply: AgentReply,
    pub approaches: Vec<Approach>,
    /// Labeled elaboration + critique blocks, in approach order
    pub critiques: Vec<String>,
}

pub struct ReasoningAgent {
    transport: Arc<dyn LlmTransport>,
    config: ReasoningConfig,
}

/// Settings shared by every reasoning sub-call
fn phase_config(request: &AgentRequest<'_>, temperature: f32) -> GenerateConfig {
    GenerateConfig::default()
        .with_temperature(temperature)
        .with_thinking(Some(ThinkingLevel::High))
        .with_web_search(request.gen_config.web_search)
}

struct CritiqueLoop<'a> {
    transport: &'a dyn LlmTransport,
    request: AgentRequest<'a>,
    events: &'a EventSink,
    approaches: &'a [Approach],
    throttle: &'a mut Throttle,
    ledger: &'a mut CallLedger,
    critiques: Vec<String>,
}

#[async_trait]
impl<'a> BoundedPhase for CritiqueLoop<'a> {
    type Output = ();
    type Error = std::convert::Infallible;

    async fn step(&mut self, cycle: Cycle) -> Result<Control<()>, Self::Error> {
        let Some(approach) = self.approaches.get(cycle.index) else {
            return Ok(Control::Finish(()));
        };
        self.events.status(format!(
            "Examining and critiquing approach {}/{}...",
            cycle.number(),
            cycle.budget
        ));
        self.events
            .thought(format!("Examining: {}", approach.name));

        let mut contents = self.request.contents.to_vec();
        contents.push(Content::user_text(prompts::critique(
            &approach.name,
            &approach.description,
        )));
        let config = phase_config(&self.request, 0.2);

        self.throttle.ready().await;
        match observe_call("critique", self.transport.generate(&contents, &config)).await {
            Ok(response) => {
                self.ledger.record_response(&response);
                self.critiques
                    .push(prompts::critique_block(&approach.name, &response.text));
                self.events
                    .thought(format!("  Assessment: {}", preview(&response.text, 120)));
            }
            Err(e) => {
                warn!(approach = %approach.name, error = %e, "Critique failed; skipping approach");
                self.events
                    .thought("  Skipped after an error.");
            }
        }
        Ok(Control::Continue)
    }
}

impl ReasoningAgent {
    pub fn new(transport: Arc<dyn LlmTransport>, config: ReasoningConfig) -> Self {
        Self { transport, config }
    }

    async fn brainstorm(
        &self,
        request: &AgentRequest<'_>,
        events: &EventSink,
        throttle: &mut Throttle,
        ledger: &mut CallLedger,
    ) -> Vec<Approach> {
        events.status("Devising approaches from several angles (brainstorming)...");

        let mut contents = request.recent().to_vec();
        contents.push(Content::user_text(prompts::BRAINSTORM));
        let config = phase_config(request, 0.4).with_response_schema(prompts::brainstorm_schema());

        throttle.ready().await;
        let parsed = match observe_call("brainstorm", self.transport.generate(&contents, &config)).await {
            Ok(response) => {
                ledger.record_response(&response);
                serde_json::from_str::<Brainstorm>(&response.text).map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        };

        let approaches: Vec<Approach> = match parsed {
            Ok(b) if !b.approaches.is_empty() => b
                .approaches
                .into_iter()
                .take(self.config.max_approaches)
                .collect(),
            Ok(_) => {
                warn!("Brainstorm returned no approaches; using the default approach");
                vec![Approach::fallback()]
            }
            Err(e) => {
                warn!(error = %e, "Brainstorm failed; using the default approach");
                events.thought("Could not generate approaches; continuing with standard reasoning.");
                vec![Approach::fallback()]
            }
        };

        for (i, approach) in approaches.iter().enumerate() {
            events.thought(format!(
                "Approach {} [{}]: {}",
                i + 1,
                approach.name,
                approach.description
            ));
        }
        approaches
    }

    pub async fn run(
        &self,
        request: AgentRequest<'_>,
        events: &EventSink,
    ) -> Result<ReasoningReport, AgentError> {
        let span = info_span!("deep_reasoning", otel.name = "deep_reasoning");

        async {
            info!("Starting deep reasoning");
            let mut throttle = Throttle::new(self.config.pause);
            let mut ledger = CallLedger::new();

            // Phase 1: brainstorm
            let approaches = self
                .brainstorm(&request, events, &mut throttle, &mut ledger)
                .await;

            // Phase 2: elaborate and critique each approach
            let mut phase = CritiqueLoop {
                transport: self.transport.as_ref(),
                request,
                events,
                approaches: &approaches,
                throttle: &mut throttle,
                ledger: &mut ledger,
                critiques: Vec::new(),
            };
            let exit = match run_bounded(&mut phase, approaches.len()).await {
                Ok(exit) => exit,
                Err(never) => match never {},
            };
            AGENT_ITERATIONS
                .with_label_values(&["reasoning"])
                .observe(exit.iterations() as f64);
            let critiques = phase.critiques;

            // Phase 3: integrate
            events.status("Integrating all reasoning into the final answer...");
            let config = GenerateConfig {
                system_instruction: Some(prompts::reasoning_integration(
                    request.system_instruction,
                    &critiques.join("\n\n"),
                )),
                max_output_tokens: request.gen_config.max_output_tokens,
                ..phase_config(&request, 0.3)
            };

            throttle.ready().await;
            let streamed =
                match stream_reply(self.transport.as_ref(), "integrate", request.contents, &config, events)
                    .await
                {
                    Ok(streamed) => streamed,
                    Err(source) => {
                        warn!(error = %source, "Reasoning integration failed");
                        AGENT_RUNS.with_label_values(&["reasoning", "failed"]).inc();
                        return Err(AgentError::Synthesis {
                            agent: "reasoning",
                            source,
                        });
                    }
                };
            ledger.record(streamed.usage, Some(&streamed.citations));

            let (usage, citations) = ledger.into_parts();
            AGENT_RUNS.with_label_values(&["reasoning", "success"]).inc();
            info!(
                approaches = approaches.len(),
                critiques = critiques.len(),
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Deep reasoning finished"
            );

            Ok(ReasoningReport {
                reply: AgentReply {
                    text: streamed.text,
                    usage,
                    citations,
                    thoughts: streamed.thoughts,
                },
                approaches,
                critiques,
            })
        }
        .instrument(span)
        .await
    }
}
