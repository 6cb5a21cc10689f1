//! Event kind + flat event record.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of one lifecycle event. Serialized in snake_case, e.g. `on_tool_start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A model call is about to start for this iteration.
    OnChatModelStart,
    /// One text delta from the model stream.
    OnChatModelStream,
    /// The model call for this iteration finished.
    OnChatModelEnd,
    /// One tool execution is starting.
    OnToolStart,
    /// One tool execution finished (success or tool-level error).
    OnToolEnd,
    /// Terminal: the run completed normally.
    Done,
    /// Terminal: the run failed fatally or was cancelled.
    Error,
}

impl EventKind {
    /// Whether this kind terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Done | EventKind::Error)
    }
}

/// One stream event: kind plus optional envelope fields.
///
/// `name` carries the tool name for tool events; `run_id` and `thread_id`
/// identify the run and conversation; `data` is a kind-specific JSON payload
/// (text delta, tool input, tool output, error message).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub event: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "runId", default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(rename = "threadId", default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl AgentEvent {
    /// Creates an event of the given kind with no envelope fields set.
    pub fn new(event: EventKind) -> Self {
        Self {
            event,
            name: None,
            run_id: None,
            data: None,
            thread_id: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        self.event.is_terminal()
    }

    /// Terminal `done` event.
    pub fn done() -> Self {
        Self::new(EventKind::Done)
    }

    /// Terminal `error` event carrying a message in `data.message`.
    pub fn error(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::new(EventKind::Error).with_data(serde_json::json!({ "message": message }))
    }
}
