//! Model client abstraction consumed by the loop and the summarization pass.
//!
//! The loop drives [`ModelClient::stream`], consuming [`StreamChunk`]s from a
//! bounded channel: text deltas accumulate into assistant content, tool-call
//! fragments accumulate per model-assigned index until the stream ends. The
//! summarization middleware uses the synchronous [`ModelClient::call`].
//!
//! Implementations close the chunk channel on exit (dropping the sender) and
//! abort promptly when the cancellation token fires.

mod mock;

pub use mock::{MockModel, ScriptedTurn};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::message::{Message, ToolCall};
use crate::tools::ToolSchema;

/// One request to the model service.
#[derive(Clone, Debug, Default)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// System prompt carried out-of-band from the message sequence.
    pub system_prompt: String,
    pub tools: Vec<ToolSchema>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

/// One completed model turn: assistant text plus any tool calls.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelResponse {
    /// A turn with no content and no tool calls is terminal for the loop.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.tool_calls.is_empty()
    }
}

/// Partial tool call from one streaming chunk. Arguments arrive as JSON
/// fragments across chunks, keyed by the model-assigned `index`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolCallFragment {
    pub index: Option<u32>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

/// One chunk of a streaming response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamChunk {
    pub delta: Option<String>,
    pub tool_call: Option<ToolCallFragment>,
    /// Terminal marker; after this the producer closes the channel.
    pub done: bool,
}

impl StreamChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: Some(delta.into()),
            ..Default::default()
        }
    }

    pub fn fragment(fragment: ToolCallFragment) -> Self {
        Self {
            tool_call: Some(fragment),
            ..Default::default()
        }
    }

    pub fn end() -> Self {
        Self {
            done: true,
            ..Default::default()
        }
    }
}

/// Client for a language-model service.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Synchronous completion; used by the summarization pass.
    async fn call(&self, cancel: CancellationToken, request: ModelRequest)
        -> Result<ModelResponse, AgentError>;

    /// Streaming completion: writes chunks into `tx` and closes it on exit.
    async fn stream(
        &self,
        cancel: CancellationToken,
        request: ModelRequest,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<(), AgentError>;
}

/// Parses an assembled argument-fragment buffer into an argument map.
/// An empty buffer parses as the empty map.
pub fn parse_arguments(raw: &str) -> Result<serde_json::Map<String, Value>, AgentError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(AgentError::Model(format!(
            "tool arguments are not an object: {}",
            other
        ))),
        Err(e) => Err(AgentError::Model(format!("tool arguments parse error: {}", e))),
    }
}
