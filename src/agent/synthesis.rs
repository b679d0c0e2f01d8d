//! Streamed completion consumer
//!
//! Used for plain turns, research synthesis and reasoning integration. Text
//! deltas and thought fragments are forwarded to the observer as they arrive;
//! nothing here branches on partial data.

use futures_util::stream::StreamExt;

use super::accounting::observe_call;
use super::events::EventSink;
use crate::llm::{ChunkStream, Content, GenerateConfig, LlmError, LlmTransport};
use crate::transcript::{CitationSet, TokenUsage};

/// Everything one streamed call produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamedReply {
    pub text: String,
    pub thoughts: String,
    /// Last usage snapshot seen in the stream
    pub usage: Option<TokenUsage>,
    pub citations: CitationSet,
}

/// Drain a chunk stream, forwarding text and thoughts to `events`.
///
/// A mid-stream error aborts the whole call.
pub async fn consume_stream(
    mut stream: ChunkStream,
    events: &EventSink,
) -> Result<StreamedReply, LlmError> {
    let mut reply = StreamedReply::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;

        if let Some(usage) = chunk.usage {
            reply.usage = Some(usage);
        }
        if let Some(citations) = &chunk.citations {
            for query in &citations.queries {
                if !reply.citations.queries.contains(query) {
                    events.thought(format!("Action (Google Search): `{query}`"));
                }
            }
            reply.citations.merge(citations);
        }
        if let Some(thought) = chunk.thought {
            events.thought(thought.clone());
            reply.thoughts.push_str(&thought);
        }
        if let Some(text) = chunk.text {
            events.text(text.clone());
            reply.text.push_str(&text);
        }
    }

    Ok(reply)
}

/// Open a stream on `transport` and drain it.
pub async fn stream_reply(
    transport: &dyn LlmTransport,
    phase: &'static str,
    contents: &[Content],
    config: &GenerateConfig,
    events: &EventSink,
) -> Result<StreamedReply, LlmError> {
    observe_call(phase, async {
        let stream = transport.generate_stream(contents, config).await?;
        consume_stream(stream, events).await
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::AgentEvent;
    use crate::llm::StreamChunk;
    use futures_util::stream;

    #[tokio::test]
    async fn test_thoughts_stay_out_of_text_and_last_usage_wins() {
        let mut grounding = CitationSet::default();
        grounding.add_source("Docs", "https://docs");
        grounding.add_query("rust streams");

        let chunks = vec![
            Ok(StreamChunk::thought("considering...")),
            Ok(StreamChunk::text("Hello ")),
            Ok(StreamChunk {
                text: Some("world".into()),
                usage: Some(TokenUsage::new(10, 1)),
                citations: Some(grounding),
                ..StreamChunk::default()
            }),
            Ok(StreamChunk::usage(TokenUsage::new(10, 4))),
        ];
        let (sink, mut rx) = EventSink::channel();

        let reply = consume_stream(Box::pin(stream::iter(chunks)), &sink)
            .await
            .unwrap();

        assert_eq!(reply.text, "Hello world");
        assert_eq!(reply.thoughts, "considering...");
        assert_eq!(reply.usage, Some(TokenUsage::new(10, 4)));
        assert_eq!(reply.citations.sources.len(), 1);

        let mut deltas = String::new();
        while let Ok(event) = rx.try_recv() {
            if let AgentEvent::TextDelta(t) = event {
                deltas.push_str(&t);
            }
        }
        assert_eq!(deltas, "Hello world");
    }

    #[tokio::test]
    async fn test_mid_stream_error_is_fatal() {
        let chunks = vec![
            Ok(StreamChunk::text("partial")),
            Err(LlmError::Transport("connection reset".into())),
        ];
        let result = consume_stream(Box::pin(stream::iter(chunks)), &EventSink::disabled()).await;
        assert!(matches!(result, Err(LlmError::Transport(_))));
    }
}
