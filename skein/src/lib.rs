//! # Skein
//!
//! An agent execution core: a bounded driver that alternates between calling a
//! language-model service and executing the tools the model requests, streaming
//! lifecycle events to the caller and keeping per-conversation state across
//! requests.
//!
//! ## Design principles
//!
//! - **One loop, four middleware phases**: setup (`before_agent`), request
//!   shaping (`modify_request`), and two onion-ring wrappers around the model
//!   call and every tool call. First-registered middleware is outermost.
//! - **Typed history with a trust boundary**: externally submitted messages
//!   pass a stricter validator than internally generated ones, so callers can
//!   never inject fabricated assistant output or tool results.
//! - **Parallel tools, deterministic history**: tool calls of one iteration run
//!   concurrently; results append in original call order behind a barrier.
//! - **State outlives the run**: a keyed in-memory store with TTL eviction owns
//!   every thread's state; the loop borrows it for one run and persists it on
//!   every exit path.
//!
//! ## Main modules
//!
//! - [`agent`]: [`Agent`], the loop itself, and its builder.
//! - [`message`]: [`Message`], [`Role`], [`ToolCall`], [`MessageChain`].
//! - [`middleware`]: [`AgentMiddleware`] plus the pre-built middleware
//!   (todos, filesystem, memory, skills, summarization, tracing).
//! - [`tools`]: [`Tool`], [`FuncTool`], [`HttpCallbackTool`], [`ToolRegistry`].
//! - [`llm`]: [`ModelClient`], request/chunk types, [`MockModel`].
//! - [`sandbox`]: [`Sandbox`] capability and [`LocalSandbox`].
//! - [`store`]: [`ThreadStore`] with its TTL reaper.
//! - [`registry`]: [`Registry`], [`AgentConfig`], [`MiddlewareOverrides`].
//! - [`trace`]: [`TraceRecorder`] / [`SpanHandle`] capability.
//!
//! Events are emitted using the [`run_event`] protocol crate; key types are
//! re-exported at the crate root.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use skein::{Agent, MockModel, Message, ThreadStore};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), skein::AgentError> {
//! let model = Arc::new(MockModel::text("hello"));
//! let store = ThreadStore::new();
//! let agent = Agent::builder(model, store).model_id("test-model").build();
//!
//! let state = agent
//!     .invoke(CancellationToken::new(), vec![Message::user("hi")], "thread-1")
//!     .await?;
//! println!("{}", state.messages.last().unwrap().content);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod context;
pub mod error;
pub mod llm;
pub mod message;
pub mod middleware;
pub mod registry;
pub mod sandbox;
pub mod state;
pub mod store;
pub mod tools;
pub mod trace;

pub use agent::{Agent, AgentBuilder, DEFAULT_MAX_ITERATIONS, EVENT_BUFFER};
pub use context::RunContext;
pub use error::{AgentError, SandboxError, ToolError};
pub use llm::{
    MockModel, ModelClient, ModelRequest, ModelResponse, ScriptedTurn, StreamChunk,
    ToolCallFragment,
};
pub use message::{Message, MessageChain, Role, ToolCall};
pub use middleware::{
    AgentMiddleware, FilesystemMiddleware, MemoryMiddleware, ModelNext, Phase, SkillsMiddleware,
    SummarizationMiddleware, TodoListMiddleware, ToolNext, TracingMiddleware,
};
pub use registry::{AgentConfig, BackendConfig, MiddlewareOverrides, Registry, RegistryError};
pub use run_event::{AgentEvent, EventKind};
pub use sandbox::{FileEntry, GrepMatch, LocalSandbox, Sandbox};
pub use state::{AgentState, SharedState, Todo, TodoStatus};
pub use store::ThreadStore;
pub use tools::{FuncTool, HttpCallbackTool, Tool, ToolRegistry, ToolResult, ToolSchema};
pub use trace::{SpanHandle, TraceRecorder};

/// When running `cargo test -p skein`, initializes tracing from `RUST_LOG` so
/// unit tests in `src/**` can print logs with `--nocapture`.
#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}
