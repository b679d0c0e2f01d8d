//! Progress events surfaced to whoever is watching a turn
//!
//! Agents never print. They push [`AgentEvent`]s into an [`EventSink`]; the
//! front-end decides how to show them. A sink without a receiver drops events.

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Short phase label ("Research cycle 1/3", "Running code", ...)
    Status(String),
    /// Reasoning narration or model thought fragments; never part of the answer
    Thought(String),
    /// Incremental answer text
    TextDelta(String),
    /// Captured output of a sandbox run
    ExecutionOutput { text: String, images: usize },
    /// Something went wrong but the turn goes on
    Warning(String),
    /// The turn or agent failed
    Error(String),
}

/// Cloneable handle agents write events into
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<AgentEvent>>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<AgentEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink plus the receiving end
    pub fn channel() -> (Self, UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self::new(tx), rx)
    }

    /// A sink that drops everything
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.tx {
            // Receiver gone means nobody is watching anymore
            let _ = tx.send(event);
        }
    }

    pub fn status(&self, text: impl Into<String>) {
        self.emit(AgentEvent::Status(text.into()));
    }

    pub fn thought(&self, text: impl Into<String>) {
        self.emit(AgentEvent::Thought(text.into()));
    }

    pub fn text(&self, text: impl Into<String>) {
        self.emit(AgentEvent::TextDelta(text.into()));
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.emit(AgentEvent::Warning(text.into()));
    }

    pub fn error(&self, text: impl Into<String>) {
        self.emit(AgentEvent::Error(text.into()));
    }
}

/// First `max_chars` characters on one line, with "..." when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() > max_chars {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{cut}...")
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.status("a");
        sink.text("b");
        assert_eq!(rx.try_recv().unwrap(), AgentEvent::Status("a".into()));
        assert_eq!(rx.try_recv().unwrap(), AgentEvent::TextDelta("b".into()));
    }

    #[test]
    fn test_disabled_sink_and_dropped_receiver_are_silent() {
        EventSink::disabled().warning("nobody listens");
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.thought("still fine");
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("short\ntext", 100), "short text");
        assert_eq!(preview("abcdef", 3), "abc...");
    }
}
