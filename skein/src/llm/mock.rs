//! Scripted model client for tests and examples.
//!
//! A [`MockModel`] replays a fixed sequence of turns: each `stream` call pops
//! the next script entry and emits its chunks; each `call` pops the next entry
//! and returns it whole. Requests beyond the script replay the last entry.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::llm::{
    ModelClient, ModelRequest, ModelResponse, StreamChunk, ToolCallFragment,
};
use crate::message::ToolCall;

/// One scripted turn.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    /// When set, the turn fails instead of producing output.
    pub error: Option<String>,
}

impl ScriptedTurn {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_tool_call(mut self, call: ToolCall) -> Self {
        self.tool_calls.push(call);
        self
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Scripted [`ModelClient`]. Also records every request it receives so tests
/// can assert on what the loop actually sent.
pub struct MockModel {
    script: Mutex<Vec<ScriptedTurn>>,
    cursor: Mutex<usize>,
    pub requests: Arc<Mutex<Vec<ModelRequest>>>,
}

impl MockModel {
    pub fn new(script: Vec<ScriptedTurn>) -> Self {
        Self {
            script: Mutex::new(script),
            cursor: Mutex::new(0),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Single-turn mock that always answers with plain text.
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(vec![ScriptedTurn::text(content)])
    }

    fn next_turn(&self) -> ScriptedTurn {
        let script = self.script.lock().unwrap();
        let mut cursor = self.cursor.lock().unwrap();
        let turn = script
            .get(*cursor)
            .or_else(|| script.last())
            .cloned()
            .unwrap_or_default();
        *cursor += 1;
        turn
    }
}

#[async_trait]
impl ModelClient for MockModel {
    async fn call(
        &self,
        _cancel: CancellationToken,
        request: ModelRequest,
    ) -> Result<ModelResponse, AgentError> {
        self.requests.lock().unwrap().push(request);
        let turn = self.next_turn();
        if let Some(message) = turn.error {
            return Err(AgentError::Model(message));
        }
        Ok(ModelResponse {
            content: turn.content,
            tool_calls: turn.tool_calls,
        })
    }

    async fn stream(
        &self,
        cancel: CancellationToken,
        request: ModelRequest,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<(), AgentError> {
        self.requests.lock().unwrap().push(request);
        let turn = self.next_turn();
        if let Some(message) = turn.error {
            return Err(AgentError::Model(message));
        }
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled("model stream".into()));
        }
        if !turn.content.is_empty() {
            let _ = tx.send(StreamChunk::text(turn.content)).await;
        }
        for (index, call) in turn.tool_calls.iter().enumerate() {
            let raw = if call.raw_arguments.is_empty() {
                serde_json::to_string(&call.args).unwrap_or_default()
            } else {
                call.raw_arguments.clone()
            };
            // Split the argument text in two to exercise fragment accumulation.
            let mut mid = raw.len() / 2;
            while mid > 0 && !raw.is_char_boundary(mid) {
                mid -= 1;
            }
            let (head, tail) = raw.split_at(mid);
            let _ = tx
                .send(StreamChunk::fragment(ToolCallFragment {
                    index: Some(index as u32),
                    id: Some(call.id.clone()),
                    name: Some(call.name.clone()),
                    arguments: head.to_string(),
                }))
                .await;
            if !tail.is_empty() {
                let _ = tx
                    .send(StreamChunk::fragment(ToolCallFragment {
                        index: Some(index as u32),
                        id: None,
                        name: None,
                        arguments: tail.to_string(),
                    }))
                    .await;
            }
        }
        let _ = tx.send(StreamChunk::end()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    /// call() replays the script and then repeats the last turn.
    #[tokio::test]
    async fn call_replays_script() {
        let mock = MockModel::new(vec![ScriptedTurn::text("one"), ScriptedTurn::text("two")]);
        let cancel = CancellationToken::new();
        let r1 = mock.call(cancel.clone(), ModelRequest::default()).await.unwrap();
        let r2 = mock.call(cancel.clone(), ModelRequest::default()).await.unwrap();
        let r3 = mock.call(cancel, ModelRequest::default()).await.unwrap();
        assert_eq!(r1.content, "one");
        assert_eq!(r2.content, "two");
        assert_eq!(r3.content, "two");
    }

    /// stream() emits text, split tool-call fragments, and a terminal chunk.
    #[tokio::test]
    async fn stream_emits_fragments_and_end() {
        let mut args = Map::new();
        args.insert("a".into(), serde_json::json!(2));
        let call = ToolCall::new("c1", "add", args).with_raw_arguments("{\"a\":2}");
        let mock = MockModel::new(vec![ScriptedTurn::text("x").with_tool_call(call)]);

        let (tx, mut rx) = mpsc::channel(16);
        mock.stream(CancellationToken::new(), ModelRequest::default(), tx)
            .await
            .unwrap();

        let mut text = String::new();
        let mut fragments = Vec::new();
        let mut done = false;
        while let Some(chunk) = rx.recv().await {
            if let Some(delta) = chunk.delta {
                text.push_str(&delta);
            }
            if let Some(f) = chunk.tool_call {
                fragments.push(f);
            }
            if chunk.done {
                done = true;
            }
        }
        assert_eq!(text, "x");
        assert!(done);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].name.as_deref(), Some("add"));
        assert!(fragments[1].name.is_none());
        let assembled: String = fragments.iter().map(|f| f.arguments.as_str()).collect();
        assert_eq!(assembled, "{\"a\":2}");
    }

    /// A failing turn surfaces as a model error.
    #[tokio::test]
    async fn failing_turn_errors() {
        let mock = MockModel::new(vec![ScriptedTurn::failing("boom")]);
        let (tx, _rx) = mpsc::channel(4);
        let err = mock
            .stream(CancellationToken::new(), ModelRequest::default(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Model(_)));
    }
}
