//! Tracing middleware: spans around model and tool calls.
//!
//! Uses the [`TraceRecorder`](crate::trace::TraceRecorder) carried on the run
//! context; with no recorder attached every operation is a no-op. Output
//! previews are capped at 500 characters.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::RunContext;
use crate::error::AgentError;
use crate::llm::ModelResponse;
use crate::message::{Message, ToolCall};
use crate::middleware::{AgentMiddleware, ModelNext, Phase, ToolNext};
use crate::tools::ToolResult;

const PREVIEW_CHARS: usize = 500;

/// Middleware recording `llm.call` and `tool.call` spans.
#[derive(Default)]
pub struct TracingMiddleware;

impl TracingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

#[async_trait]
impl AgentMiddleware for TracingMiddleware {
    fn name(&self) -> &str {
        "tracing"
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::WrapModelCall, Phase::WrapToolCall]
    }

    async fn wrap_model_call(
        &self,
        ctx: &RunContext,
        messages: Vec<Message>,
        next: ModelNext,
    ) -> Result<ModelResponse, AgentError> {
        let Some(recorder) = ctx.trace.as_ref() else {
            return next(messages).await;
        };
        let mut span = recorder.start_span("llm.call");
        let content_length: usize = messages.iter().map(|m| m.content.len()).sum();
        span.set("message_count", json!(messages.len()))
            .set("content_length", json!(content_length));

        let result = next(messages).await;
        match &result {
            Ok(response) => {
                span.set("tool_call_count", json!(response.tool_calls.len()))
                    .set("output_preview", json!(preview(&response.content)));
            }
            Err(e) => {
                span.set("error", json!(e.to_string()));
            }
        }
        span.end();
        result
    }

    async fn wrap_tool_call(&self, ctx: &RunContext, call: ToolCall, next: ToolNext) -> ToolResult {
        let Some(recorder) = ctx.trace.as_ref() else {
            return next(call).await;
        };
        let mut span = recorder.start_span("tool.call");
        span.set("tool_name", json!(call.name))
            .set("call_id", json!(call.id))
            .set(
                "arguments",
                json!(serde_json::to_string(&call.args).unwrap_or_default()),
            );

        let result = next(call).await;
        span.set("output_length", json!(result.output.len()))
            .set("output_preview", json!(preview(&result.output)));
        if !result.error.is_empty() {
            span.set("error", Value::String(result.error.clone()));
        }
        span.end();
        result
    }
}
