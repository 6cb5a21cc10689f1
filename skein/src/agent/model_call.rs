//! Innermost model operation: drive one streaming completion.
//!
//! Translates the (possibly middleware-transformed) message snapshot into a
//! model request, spawns the stream producer, and consumes chunks from a
//! bounded channel: text deltas accumulate into content and are re-emitted as
//! `on_chat_model_stream` events; tool-call fragments accumulate per
//! model-assigned index and are parsed once the stream ends. Tool calls are
//! produced only from actually accumulated fragments, so a model that stops
//! without calling tools never yields an empty call record.

use std::collections::BTreeMap;
use std::sync::Arc;

use run_event::{AgentEvent, EventKind};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::llm::{parse_arguments, ModelClient, ModelRequest, ModelResponse};
use crate::message::{Message, Role, ToolCall};
use crate::middleware::ModelNext;
use crate::tools::ToolSchema;

/// Buffer size for the stream-chunk channel between producer and loop.
const CHUNK_BUFFER: usize = 64;

/// Everything the innermost operation needs, captured by value.
#[derive(Clone)]
pub(crate) struct ModelCallParams {
    pub client: Arc<dyn ModelClient>,
    pub model: String,
    pub tools: Vec<ToolSchema>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub cancel: CancellationToken,
    pub events: mpsc::Sender<AgentEvent>,
    pub run_id: String,
    pub thread_id: String,
}

/// Builds the innermost continuation for the model-call onion ring.
pub(crate) fn innermost(params: ModelCallParams) -> ModelNext {
    Box::new(move |messages| Box::pin(stream_turn(params, messages)))
}

#[derive(Default)]
struct FragmentAccumulator {
    id: String,
    name: String,
    arguments: String,
}

async fn stream_turn(
    params: ModelCallParams,
    mut messages: Vec<Message>,
) -> Result<ModelResponse, AgentError> {
    // A leading system message travels out-of-band on the request.
    let system_prompt = match messages.first() {
        Some(m) if m.role == Role::System => messages.remove(0).content,
        _ => String::new(),
    };
    let request = ModelRequest {
        model: params.model.clone(),
        messages,
        system_prompt,
        tools: params.tools.clone(),
        max_tokens: params.max_tokens,
        temperature: params.temperature,
    };

    let (tx, mut rx) = mpsc::channel(CHUNK_BUFFER);
    let client = Arc::clone(&params.client);
    let cancel = params.cancel.clone();
    let producer = tokio::spawn(async move { client.stream(cancel, request, tx).await });

    let mut content = String::new();
    let mut fragments: BTreeMap<u32, FragmentAccumulator> = BTreeMap::new();
    while let Some(chunk) = rx.recv().await {
        if let Some(delta) = chunk.delta {
            if !delta.is_empty() {
                content.push_str(&delta);
                let _ = params
                    .events
                    .send(
                        AgentEvent::new(EventKind::OnChatModelStream)
                            .with_run_id(&params.run_id)
                            .with_thread_id(&params.thread_id)
                            .with_data(json!({ "chunk": delta })),
                    )
                    .await;
            }
        }
        if let Some(fragment) = chunk.tool_call {
            let slot = fragments
                .entry(fragment.index.unwrap_or(0))
                .or_default();
            if let Some(id) = fragment.id.filter(|s| !s.is_empty()) {
                slot.id = id;
            }
            if let Some(name) = fragment.name.filter(|s| !s.is_empty()) {
                slot.name = name;
            }
            slot.arguments.push_str(&fragment.arguments);
        }
        // chunk.done marks the terminal record; the producer closes the
        // channel right after, which ends this loop.
    }

    producer
        .await
        .map_err(|e| AgentError::Internal(format!("model stream task: {e}")))??;

    let mut tool_calls = Vec::with_capacity(fragments.len());
    for (_, accumulated) in fragments {
        let args = parse_arguments(&accumulated.arguments)?;
        tool_calls.push(
            ToolCall::new(accumulated.id, accumulated.name, args)
                .with_raw_arguments(accumulated.arguments),
        );
    }
    Ok(ModelResponse {
        content,
        tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockModel, ScriptedTurn};

    fn params(client: Arc<dyn ModelClient>, events: mpsc::Sender<AgentEvent>) -> ModelCallParams {
        ModelCallParams {
            client,
            model: "test-model".into(),
            tools: vec![],
            max_tokens: 512,
            temperature: None,
            cancel: CancellationToken::new(),
            events,
            run_id: "r1".into(),
            thread_id: "t1".into(),
        }
    }

    /// Text deltas accumulate into content and re-emit as stream events.
    #[tokio::test]
    async fn text_deltas_accumulate_and_emit() {
        let (tx, mut rx) = mpsc::channel(64);
        let client = Arc::new(MockModel::text("hello"));
        let next = innermost(params(client, tx));
        let out = next(vec![Message::user("hi")]).await.unwrap();
        assert_eq!(out.content, "hello");
        assert!(out.tool_calls.is_empty());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event, EventKind::OnChatModelStream);
        assert_eq!(event.data.unwrap()["chunk"], "hello");
    }

    /// Split argument fragments reassemble into one parsed tool call.
    #[tokio::test]
    async fn fragments_reassemble_into_tool_calls() {
        let mut args = serde_json::Map::new();
        args.insert("a".into(), json!(2));
        args.insert("b".into(), json!(3));
        let call = ToolCall::new("c1", "add", args).with_raw_arguments("{\"a\":2,\"b\":3}");
        let client = Arc::new(MockModel::new(vec![ScriptedTurn::text("").with_tool_call(call)]));

        let (tx, _rx) = mpsc::channel(64);
        let next = innermost(params(client, tx));
        let out = next(vec![Message::user("add")]).await.unwrap();
        assert_eq!(out.tool_calls.len(), 1);
        let call = &out.tool_calls[0];
        assert_eq!(call.id, "c1");
        assert_eq!(call.name, "add");
        assert_eq!(call.args.get("a").unwrap(), 2);
        assert_eq!(call.raw_arguments, "{\"a\":2,\"b\":3}");
    }

    /// A leading system message is lifted out-of-band onto the request.
    #[tokio::test]
    async fn leading_system_message_goes_out_of_band() {
        let client = Arc::new(MockModel::text("ok"));
        let (tx, _rx) = mpsc::channel(64);
        let next = innermost(params(Arc::clone(&client) as _, tx));
        next(vec![Message::system("be terse"), Message::user("hi")])
            .await
            .unwrap();

        let requests = client.requests.lock().unwrap();
        assert_eq!(requests[0].system_prompt, "be terse");
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[0].messages[0].content, "hi");
    }

    /// A producer error is fatal for the turn.
    #[tokio::test]
    async fn producer_error_is_fatal() {
        let client = Arc::new(MockModel::new(vec![ScriptedTurn::failing("upstream 500")]));
        let (tx, _rx) = mpsc::channel(64);
        let next = innermost(params(client, tx));
        let err = next(vec![Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, AgentError::Model(_)));
    }
}
