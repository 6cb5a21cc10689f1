//! Trace recorder capability: spans around model and tool calls.
//!
//! The recorder is optional and carried on the run context; `None` means
//! tracing is disabled and every operation is skipped. Concrete recorders
//! (OTLP exporters, test collectors) live with the embedding application.

use serde_json::Value;

/// One open span. `set` is fluent so call sites can chain attributes.
pub trait SpanHandle: Send {
    fn set(&mut self, key: &str, value: Value) -> &mut dyn SpanHandle;
    fn end(&mut self);
}

/// Records spans and point events for agent runs.
pub trait TraceRecorder: Send + Sync {
    fn start_span(&self, name: &str) -> Box<dyn SpanHandle>;
    fn record_event(&self, name: &str, attributes: Value);
}

/// Span that ignores everything; handed out when a recorder has nothing to do.
pub struct NoopSpan;

impl SpanHandle for NoopSpan {
    fn set(&mut self, _key: &str, _value: Value) -> &mut dyn SpanHandle {
        self
    }

    fn end(&mut self) {}
}
