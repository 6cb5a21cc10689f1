//! Function-wrapped tool: delegates to an in-process async closure.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::context::RunContext;
use crate::error::ToolError;
use crate::tools::Tool;

type ToolFn = dyn Fn(Map<String, Value>, RunContext) -> Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send>>
    + Send
    + Sync;

/// Tool backed by an async closure. No serialization between loop and body.
pub struct FuncTool {
    name: String,
    description: String,
    parameters: Value,
    body: Arc<ToolFn>,
}

impl FuncTool {
    /// Wraps `body` as a tool. The closure receives the parsed argument map
    /// and a clone of the run context.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        body: F,
    ) -> Self
    where
        F: Fn(Map<String, Value>, RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            body: Arc::new(move |args, ctx| Box::pin(body(args, ctx))),
        }
    }
}

#[async_trait]
impl Tool for FuncTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn call(&self, args: Map<String, Value>, ctx: &RunContext) -> Result<String, ToolError> {
        (self.body)(args, ctx.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// The closure sees the argument map and its result becomes the output.
    #[tokio::test]
    async fn func_tool_passes_args_through() {
        let tool = FuncTool::new(
            "add",
            "adds two integers",
            json!({
                "type": "object",
                "properties": { "a": { "type": "integer" }, "b": { "type": "integer" } },
                "required": ["a", "b"]
            }),
            |args, _ctx| async move {
                let a = args.get("a").and_then(Value::as_i64).ok_or_else(|| {
                    ToolError::InvalidInput("missing 'a'".into())
                })?;
                let b = args.get("b").and_then(Value::as_i64).ok_or_else(|| {
                    ToolError::InvalidInput("missing 'b'".into())
                })?;
                Ok((a + b).to_string())
            },
        );
        let ctx = RunContext::detached("t");
        let mut args = Map::new();
        args.insert("a".into(), json!(2));
        args.insert("b".into(), json!(3));
        assert_eq!(tool.call(args, &ctx).await.unwrap(), "5");

        let err = tool.call(Map::new(), &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    /// The closure can observe cancellation through the context.
    #[tokio::test]
    async fn func_tool_sees_cancellation() {
        let tool = FuncTool::new("probe", "reports cancellation", json!({"type": "object"}), |_args, ctx| async move {
            if ctx.cancel.is_cancelled() {
                Err(ToolError::Cancelled)
            } else {
                Ok("alive".into())
            }
        });
        let ctx = RunContext::detached("t");
        assert_eq!(tool.call(Map::new(), &ctx).await.unwrap(), "alive");
        ctx.cancel.cancel();
        assert!(matches!(tool.call(Map::new(), &ctx).await, Err(ToolError::Cancelled)));
    }
}
