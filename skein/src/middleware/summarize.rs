//! Summarization middleware: compacts the request when it nears the context
//! window.
//!
//! Triggers strictly above 85% of the configured window (token estimate, not a
//! real tokenizer). The oldest messages are summarized through a synchronous
//! model call and replaced by a single synthetic assistant message; the most
//! recent `max(2, ⌈len/10⌉)` messages are kept verbatim. A failed
//! summarization call degrades to passing the original request through.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::RunContext;
use crate::error::AgentError;
use crate::llm::{ModelClient, ModelRequest, ModelResponse};
use crate::message::{chain, Message};
use crate::middleware::{AgentMiddleware, ModelNext, Phase};
use crate::state::AgentState;

/// Default context window when none is configured.
pub const DEFAULT_CONTEXT_WINDOW: u32 = 128_000;
/// Fraction of the window above which compaction starts.
const TRIGGER_RATIO: f64 = 0.85;
/// Cap applied to `content` arguments of old write/edit calls.
const OLD_CONTENT_ARG_CAP: usize = 2_000;

const SUMMARY_PROMPT: &str = "Summarize the conversation so far in at most 2000 words. \
Keep decisions, open questions, file paths, and tool outcomes that later turns may rely on. \
Write plain prose, no preamble.";

/// Middleware that keeps requests inside the model's context window.
pub struct SummarizationMiddleware {
    model: Arc<dyn ModelClient>,
    model_id: String,
    context_window: u32,
    summary_max_tokens: u32,
}

impl SummarizationMiddleware {
    pub fn new(model: Arc<dyn ModelClient>, model_id: impl Into<String>) -> Self {
        Self {
            model,
            model_id: model_id.into(),
            context_window: DEFAULT_CONTEXT_WINDOW,
            summary_max_tokens: 4_096,
        }
    }

    pub fn with_context_window(mut self, context_window: u32) -> Self {
        self.context_window = context_window.max(1);
        self
    }

    fn over_threshold(&self, messages: &[Message]) -> bool {
        chain::estimate_tokens(messages) as f64 > TRIGGER_RATIO * self.context_window as f64
    }
}

/// Number of trailing messages kept verbatim.
fn recent_len(total: usize) -> usize {
    std::cmp::max(2, total.div_ceil(10))
}

/// Caps `content` arguments of write_file/edit_file calls in-place.
fn cap_file_content_args(messages: &mut [Message]) {
    for message in messages {
        for call in &mut message.tool_calls {
            if call.name != "write_file" && call.name != "edit_file" {
                continue;
            }
            if let Some(Value::String(content)) = call.args.get_mut("content") {
                if content.chars().count() > OLD_CONTENT_ARG_CAP {
                    *content = content.chars().take(OLD_CONTENT_ARG_CAP).collect();
                }
            }
        }
    }
}

#[async_trait]
impl AgentMiddleware for SummarizationMiddleware {
    fn name(&self) -> &str {
        "summarization"
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::WrapModelCall]
    }

    async fn wrap_model_call(
        &self,
        ctx: &RunContext,
        messages: Vec<Message>,
        next: ModelNext,
    ) -> Result<ModelResponse, AgentError> {
        if !self.over_threshold(&messages) || messages.len() < 3 {
            return next(messages).await;
        }

        let keep = recent_len(messages.len());
        let split = messages.len() - keep;
        let mut old = messages[..split].to_vec();
        let recent = &messages[split..];
        cap_file_content_args(&mut old);

        let request = ModelRequest {
            model: self.model_id.clone(),
            messages: old,
            system_prompt: SUMMARY_PROMPT.to_string(),
            tools: Vec::new(),
            max_tokens: self.summary_max_tokens,
            temperature: None,
        };
        match self.model.call(ctx.cancel.clone(), request).await {
            Ok(summary) => {
                debug!(
                    kept = keep,
                    summarized = split,
                    "compacted request before model call"
                );
                let mut compacted = Vec::with_capacity(keep + 1);
                compacted.push(Message::assistant(summary.content, Vec::new()));
                compacted.extend_from_slice(recent);
                next(compacted).await
            }
            Err(e) => {
                warn!(error = %e, "summarization failed; sending original request");
                next(messages).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockModel, ScriptedTurn};
    use crate::message::ToolCall;
    use std::sync::Mutex;

    fn padded(role_content: &str, len: usize) -> Message {
        Message::user(format!("{}{}", role_content, "x".repeat(len)))
    }

    fn capture_next(sink: Arc<Mutex<Vec<Vec<Message>>>>) -> ModelNext {
        Box::new(move |messages| {
            sink.lock().unwrap().push(messages);
            Box::pin(async {
                Ok(ModelResponse {
                    content: "primary".into(),
                    tool_calls: vec![],
                })
            })
        })
    }

    /// Exactly 85% of the window does not trigger; strictly above does.
    #[tokio::test]
    async fn threshold_is_strictly_above_85_percent() {
        let mock = Arc::new(MockModel::new(vec![ScriptedTurn::text("SUMMARY")]));
        let mw = SummarizationMiddleware::new(Arc::clone(&mock) as Arc<dyn ModelClient>, "m")
            .with_context_window(100);
        let ctx = RunContext::detached("t");

        // 85 tokens estimated: 10 messages of 34 chars = 8 tokens each, plus
        // one of 20 chars = 5. Total = 85. Not strictly greater.
        let mut at = vec![];
        for _ in 0..10 {
            at.push(padded("", 34));
        }
        at.push(padded("", 20));
        assert_eq!(chain::estimate_tokens(&at), 85);

        let sink = Arc::new(Mutex::new(Vec::new()));
        mw.wrap_model_call(&ctx, at.clone(), capture_next(Arc::clone(&sink)))
            .await
            .unwrap();
        assert_eq!(sink.lock().unwrap()[0].len(), at.len(), "no compaction at 85%");
        assert!(mock.requests.lock().unwrap().is_empty());

        // One more token pushes it over.
        at.push(padded("", 4));
        let sink = Arc::new(Mutex::new(Vec::new()));
        mw.wrap_model_call(&ctx, at.clone(), capture_next(Arc::clone(&sink)))
            .await
            .unwrap();
        let seen = &sink.lock().unwrap()[0];
        assert!(seen.len() < at.len(), "compaction above 85%");
    }

    /// Compaction keeps max(2, ⌈len/10⌉) recent messages behind the summary.
    #[tokio::test]
    async fn compaction_shape() {
        let mock = Arc::new(MockModel::new(vec![ScriptedTurn::text("SUMMARY")]));
        let mw = SummarizationMiddleware::new(Arc::clone(&mock) as Arc<dyn ModelClient>, "m")
            .with_context_window(10);
        let ctx = RunContext::detached("t");

        let messages: Vec<Message> = (0..25).map(|i| padded(&format!("m{i}-"), 40)).collect();
        let sink = Arc::new(Mutex::new(Vec::new()));
        mw.wrap_model_call(&ctx, messages.clone(), capture_next(Arc::clone(&sink)))
            .await
            .unwrap();

        let seen = sink.lock().unwrap();
        let compacted = &seen[0];
        // 25 messages -> keep ceil(25/10) = 3 recent, 1 summary in front.
        assert_eq!(compacted.len(), 4);
        assert_eq!(compacted[0].content, "SUMMARY");
        assert_eq!(compacted[0].role, crate::message::Role::Assistant);
        assert_eq!(compacted[1].content, messages[22].content);
        assert_eq!(compacted[3].content, messages[24].content);

        // The summarization call saw only the old prefix.
        let requests = mock.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages.len(), 22);
        assert!(requests[0].system_prompt.contains("2000 words"));
    }

    /// recent_len bottoms out at 2.
    #[test]
    fn recent_len_floor() {
        assert_eq!(recent_len(3), 2);
        assert_eq!(recent_len(10), 2);
        assert_eq!(recent_len(25), 3);
        assert_eq!(recent_len(100), 10);
    }

    /// Old write_file content arguments are capped before summarization.
    #[tokio::test]
    async fn old_file_content_args_are_capped() {
        let mock = Arc::new(MockModel::new(vec![ScriptedTurn::text("SUMMARY")]));
        let mw = SummarizationMiddleware::new(Arc::clone(&mock) as Arc<dyn ModelClient>, "m")
            .with_context_window(10);
        let ctx = RunContext::detached("t");

        let mut args = serde_json::Map::new();
        args.insert("path".into(), Value::from("big.txt"));
        args.insert("content".into(), Value::from("z".repeat(5_000)));
        let call = ToolCall::new("c1", "write_file", args).with_raw_arguments("x".repeat(400));

        let mut messages = vec![Message::assistant("", vec![call])];
        for i in 0..10 {
            messages.push(padded(&format!("m{i}-"), 40));
        }

        let sink = Arc::new(Mutex::new(Vec::new()));
        mw.wrap_model_call(&ctx, messages, capture_next(Arc::clone(&sink)))
            .await
            .unwrap();

        let requests = mock.requests.lock().unwrap();
        let old = &requests[0].messages;
        let capped = old[0].tool_calls[0]
            .args
            .get("content")
            .and_then(Value::as_str)
            .unwrap();
        assert_eq!(capped.len(), 2_000);
    }

    /// A failing summarization call falls back to the original request.
    #[tokio::test]
    async fn failure_degrades_to_passthrough() {
        let mock = Arc::new(MockModel::new(vec![ScriptedTurn::failing("rate limited")]));
        let mw = SummarizationMiddleware::new(Arc::clone(&mock) as Arc<dyn ModelClient>, "m")
            .with_context_window(10);
        let ctx = RunContext::detached("t");

        let messages: Vec<Message> = (0..12).map(|i| padded(&format!("m{i}-"), 40)).collect();
        let sink = Arc::new(Mutex::new(Vec::new()));
        let out = mw
            .wrap_model_call(&ctx, messages.clone(), capture_next(Arc::clone(&sink)))
            .await
            .unwrap();
        assert_eq!(out.content, "primary");
        assert_eq!(sink.lock().unwrap()[0], messages);
    }
}
