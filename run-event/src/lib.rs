//! Lifecycle event protocol for agent runs.
//!
//! One agent run emits a strictly ordered stream of [`AgentEvent`] records over a
//! channel: per iteration `on_chat_model_start`, zero or more
//! `on_chat_model_stream`, `on_chat_model_end`, then per requested tool one
//! `on_tool_start`/`on_tool_end` pair (tool pairs from the same iteration may
//! interleave with each other). The stream ends with exactly one terminal event,
//! `done` or `error`, after which the channel is closed.
//!
//! The wire shape is a flat record `{event, name?, runId?, data?, threadId?}`;
//! optional fields are omitted when unset.

mod event;

pub use event::{AgentEvent, EventKind};
