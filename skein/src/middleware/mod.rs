//! Middleware contract: four phases with two composition disciplines.
//!
//! `before_agent` and `modify_request` run sequentially in registration order;
//! `wrap_model_call` and `wrap_tool_call` compose as an onion ring where the
//! first-registered middleware is the outermost wrapper: with registration
//! order `[M0, M1, .., Mn]` and innermost operation `f`, the composed call is
//! `M0(M1(..Mn(f)..))`.
//!
//! All four phase methods default to pass-through, so a middleware overrides
//! only the phases it declares in [`AgentMiddleware::phases`]. A wrapper either
//! invokes `next` (possibly with transformed input) and returns its result
//! (possibly transformed), or short-circuits by returning without calling
//! `next`.

mod filesystem;
mod memory;
mod skills;
mod summarize;
mod todos;
mod tracing;

pub use filesystem::{FilesystemMiddleware, TOOL_OUTPUT_TRUNCATE_LIMIT};
pub use memory::MemoryMiddleware;
pub use skills::SkillsMiddleware;
pub use summarize::{SummarizationMiddleware, DEFAULT_CONTEXT_WINDOW};
pub use todos::TodoListMiddleware;
pub use self::tracing::TracingMiddleware;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::RunContext;
use crate::error::AgentError;
use crate::llm::ModelResponse;
use crate::message::{Message, ToolCall};
use crate::state::AgentState;
use crate::tools::ToolResult;

/// The four middleware phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    BeforeAgent,
    ModifyRequest,
    WrapModelCall,
    WrapToolCall,
}

/// Continuation for the model-call onion ring.
pub type ModelNext = Box<
    dyn FnOnce(
            Vec<Message>,
        ) -> Pin<Box<dyn Future<Output = Result<ModelResponse, AgentError>> + Send>>
        + Send,
>;

/// Continuation for the tool-call onion ring. Tool failures are folded into
/// the [`ToolResult`] rather than surfaced as errors.
pub type ToolNext =
    Box<dyn FnOnce(ToolCall) -> Pin<Box<dyn Future<Output = ToolResult> + Send>> + Send>;

/// One middleware. Implementations override the phases they declare; the
/// defaults are no-op, identity, and invoke-`next`.
#[async_trait]
pub trait AgentMiddleware: Send + Sync {
    /// Stable name, used in overrides, error messages, and logs.
    fn name(&self) -> &str;

    /// Phases this middleware participates in; the loop skips the rest.
    fn phases(&self) -> &'static [Phase];

    /// Sequential, once per run. May install tools, load files, initialize
    /// its own fields.
    async fn before_agent(&self, _state: &mut AgentState) -> Result<(), AgentError> {
        Ok(())
    }

    /// Sequential, once per iteration. Output of middleware *i* feeds
    /// middleware *i*+1.
    async fn modify_request(&self, messages: Vec<Message>) -> Result<Vec<Message>, AgentError> {
        Ok(messages)
    }

    /// Onion-ring, once per iteration.
    async fn wrap_model_call(
        &self,
        _ctx: &RunContext,
        messages: Vec<Message>,
        next: ModelNext,
    ) -> Result<ModelResponse, AgentError> {
        next(messages).await
    }

    /// Onion-ring, once per tool execution.
    async fn wrap_tool_call(&self, _ctx: &RunContext, call: ToolCall, next: ToolNext) -> ToolResult {
        next(call).await
    }
}

/// Builds the model-call onion around `innermost`; first-registered outermost.
/// Middleware not declaring [`Phase::WrapModelCall`] is skipped.
pub fn compose_model_call(
    middleware: &[Arc<dyn AgentMiddleware>],
    ctx: &RunContext,
    innermost: ModelNext,
) -> ModelNext {
    let mut next = innermost;
    for mw in middleware.iter().rev() {
        if !mw.phases().contains(&Phase::WrapModelCall) {
            continue;
        }
        let mw = Arc::clone(mw);
        let ctx = ctx.clone();
        let inner = next;
        next = Box::new(move |messages| {
            Box::pin(async move { mw.wrap_model_call(&ctx, messages, inner).await })
        });
    }
    next
}

/// Builds the tool-call onion around `innermost`; first-registered outermost.
/// Middleware not declaring [`Phase::WrapToolCall`] is skipped.
pub fn compose_tool_call(
    middleware: &[Arc<dyn AgentMiddleware>],
    ctx: &RunContext,
    innermost: ToolNext,
) -> ToolNext {
    let mut next = innermost;
    for mw in middleware.iter().rev() {
        if !mw.phases().contains(&Phase::WrapToolCall) {
            continue;
        }
        let mw = Arc::clone(mw);
        let ctx = ctx.clone();
        let inner = next;
        next = Box::new(move |call| {
            Box::pin(async move { mw.wrap_tool_call(&ctx, call, inner).await })
        });
    }
    next
}
