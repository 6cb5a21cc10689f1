//! Tool contract: the uniform interface the loop executes against.
//!
//! Every tool exposes a name, a description, a JSON-schema parameter object,
//! and an async call taking the run context and an argument map. Two concrete
//! variants ship here: [`FuncTool`] (in-process closure, zero serialization
//! cost) and [`HttpCallbackTool`] (forwarded to an external service).
//!
//! Tool names within one run are unique; on collision between an agent-level
//! tool and one registered into the state by middleware, the state-registered
//! tool wins.

mod func;
mod http;

pub use func::FuncTool;
pub use http::HttpCallbackTool;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::RunContext;
use crate::error::ToolError;

/// A single callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within one run; the model addresses the tool by it.
    fn name(&self) -> &str;

    /// Description advertised to the model.
    fn description(&self) -> &str;

    /// JSON-schema object for the argument map.
    fn parameters(&self) -> Value;

    /// Executes the tool. The output string's encoding is tool-defined
    /// (commonly JSON text). Honors `ctx.cancel` promptly where it can.
    async fn call(&self, args: Map<String, Value>, ctx: &RunContext) -> Result<String, ToolError>;
}

/// Schema advertised to the model for one tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSchema {
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters(),
        }
    }
}

/// Result of executing one tool call. Success means `error` is empty.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Correlation id of the call this result answers.
    pub call_id: String,
    pub name: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            output: output.into(),
            error: String::new(),
        }
    }

    pub fn failure(
        call_id: impl Into<String>,
        name: impl Into<String>,
        output: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            output: output.into(),
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }
}

/// Name → tool map living on the thread state for the duration of one run.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, replacing any prior tool of the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn Tool>)> {
        self.tools.iter()
    }

    /// Merges `base` under this registry: entries here shadow `base` on
    /// collision. Returns the combined map.
    pub fn merged_over(&self, base: &HashMap<String, Arc<dyn Tool>>) -> HashMap<String, Arc<dyn Tool>> {
        let mut merged = base.clone();
        for (name, tool) in &self.tools {
            merged.insert(name.clone(), Arc::clone(tool));
        }
        merged
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.names()).finish()
    }
}
