//! Per-thread agent state: history, todos, written files, run-scoped tools.
//!
//! [`AgentState`] is owned by the thread store and borrowed by the loop for the
//! duration of one run. The tool registry is rebuilt by the BeforeAgent phase
//! on every loop entry and is never serialized; everything else round-trips
//! through JSON with keys `thread_id`, `messages`, `todos`, `files`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::message::Message;
use crate::tools::ToolRegistry;

/// Status of one todo entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Done,
}

impl Default for TodoStatus {
    fn default() -> Self {
        TodoStatus::Pending
    }
}

/// One todo entry; the list is only ever replaced wholesale by `write_todos`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub status: TodoStatus,
}

/// State of one conversation thread.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AgentState {
    pub thread_id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub todos: Vec<Todo>,
    /// Path → content for files the agent wrote during this thread's lifetime.
    #[serde(default)]
    pub files: HashMap<String, String>,
    /// Run-scoped tools installed by the BeforeAgent phase. Never persisted.
    #[serde(skip)]
    pub tools: ToolRegistry,
}

impl AgentState {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            ..Default::default()
        }
    }
}

/// Shared handle to the state of the running thread.
///
/// The loop task is the only writer of `messages`; tools and tool-call
/// wrappers lock briefly to replace `todos` or record `files`.
pub type SharedState = Arc<Mutex<AgentState>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCall;
    use serde_json::Map;

    /// Serialize/deserialize round-trips everything but the tool registry.
    #[test]
    fn state_round_trips_without_tools() {
        let mut state = AgentState::new("t1");
        state.messages.push(Message::user("hi"));
        state
            .messages
            .push(Message::assistant("", vec![ToolCall::new("c1", "add", Map::new())]));
        state.messages.push(Message::tool("c1", "add", "5"));
        state.todos.push(Todo {
            id: "1".into(),
            title: "first".into(),
            status: TodoStatus::InProgress,
        });
        state.files.insert("/tmp/a.txt".into(), "hello".into());

        let json = serde_json::to_string(&state).unwrap();
        let back: AgentState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.thread_id, "t1");
        assert_eq!(back.messages, state.messages);
        assert_eq!(back.todos, state.todos);
        assert_eq!(back.files, state.files);
        assert!(back.tools.is_empty());
    }

    /// The persisted layout uses the documented top-level keys and no tools key.
    #[test]
    fn persisted_layout_keys() {
        let state = AgentState::new("t2");
        let v = serde_json::to_value(&state).unwrap();
        let obj = v.as_object().unwrap();
        assert!(obj.contains_key("thread_id"));
        assert!(obj.contains_key("messages"));
        assert!(obj.contains_key("todos"));
        assert!(obj.contains_key("files"));
        assert!(!obj.contains_key("tools"));
    }

    /// Todo status serializes in snake_case.
    #[test]
    fn todo_status_snake_case() {
        let v = serde_json::to_value(TodoStatus::InProgress).unwrap();
        assert_eq!(v, serde_json::json!("in_progress"));
    }
}
