//! Memory middleware: injects durable agent memory into the system message.
//!
//! Configured memory documents are read through the sandbox once per run;
//! missing files are skipped silently. When the request's first message is a
//! system message, the loaded content is appended inside an `<agent_memory>`
//! block with fixed guidance; otherwise the request passes through untouched.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::AgentError;
use crate::message::{Message, Role};
use crate::middleware::{AgentMiddleware, Phase};
use crate::sandbox::Sandbox;
use crate::state::AgentState;

const MEMORY_SEPARATOR: &str = "\n\n---\n\n";
const MEMORY_GUIDANCE: &str = "Treat agent_memory as durable context from earlier sessions. \
Prefer it over guessing; update your answers when it contradicts assumptions.";

/// Middleware that loads memory documents and exposes them to the model.
pub struct MemoryMiddleware {
    sandbox: Arc<dyn Sandbox>,
    paths: Vec<String>,
    content: RwLock<String>,
}

impl MemoryMiddleware {
    pub fn new(sandbox: Arc<dyn Sandbox>, paths: Vec<String>) -> Self {
        Self {
            sandbox,
            paths,
            content: RwLock::new(String::new()),
        }
    }
}

#[async_trait]
impl AgentMiddleware for MemoryMiddleware {
    fn name(&self) -> &str {
        "memory"
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::BeforeAgent, Phase::ModifyRequest]
    }

    async fn before_agent(&self, _state: &mut AgentState) -> Result<(), AgentError> {
        let mut documents = Vec::new();
        for path in &self.paths {
            match self.sandbox.read_file(path).await {
                Ok(text) => documents.push(text),
                Err(e) => {
                    debug!(path = %path, error = %e, "skipping unreadable memory document");
                }
            }
        }
        *self.content.write().await = documents.join(MEMORY_SEPARATOR);
        Ok(())
    }

    async fn modify_request(&self, mut messages: Vec<Message>) -> Result<Vec<Message>, AgentError> {
        let content = self.content.read().await;
        if content.is_empty() {
            return Ok(messages);
        }
        match messages.first_mut() {
            Some(first) if first.role == Role::System => {
                first.content.push_str(&format!(
                    "\n<agent_memory>\n{}\n</agent_memory>\n{}",
                    content, MEMORY_GUIDANCE
                ));
                Ok(messages)
            }
            _ => Ok(messages),
        }
    }
}
