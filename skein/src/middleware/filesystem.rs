//! Filesystem middleware: sandbox-backed tools plus output hygiene.
//!
//! Installs seven tools delegating to the [`Sandbox`] capability. Around every
//! tool call it truncates oversized outputs (except for the file tools, whose
//! output the model must see whole) and mirrors written file content into
//! `state.files` so the thread records what the agent produced.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::context::RunContext;
use crate::error::{AgentError, ToolError};
use crate::middleware::{AgentMiddleware, Phase, ToolNext};
use crate::message::ToolCall;
use crate::sandbox::Sandbox;
use crate::state::AgentState;
use crate::tools::{FuncTool, Tool, ToolResult};

/// Outputs longer than this (in characters) get truncated.
pub const TOOL_OUTPUT_TRUNCATE_LIMIT: usize = 80_000;
/// Characters kept from each end of a truncated output.
const TRUNCATE_KEEP: usize = 2_000;
/// Cap on grep matches per call.
const GREP_MATCH_CAP: usize = 200;
/// Cap on glob results per call.
const GLOB_RESULT_CAP: usize = 100;

/// Tools whose output is never truncated.
static TRUNCATION_EXEMPT: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["ls", "glob", "grep", "read_file", "edit_file", "write_file"]
        .into_iter()
        .collect()
});

/// Middleware exposing a sandbox to the model as tools.
pub struct FilesystemMiddleware {
    sandbox: Arc<dyn Sandbox>,
}

impl FilesystemMiddleware {
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self { sandbox }
    }
}

fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidInput(format!("missing '{}'", key)))
}

fn optional_str<'a>(args: &'a Map<String, Value>, key: &str, default: &'a str) -> &'a str {
    args.get(key).and_then(Value::as_str).unwrap_or(default)
}

fn path_schema(extra: &[(&str, Value)]) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert("path".into(), json!({ "type": "string" }));
    for (k, v) in extra {
        properties.insert((*k).into(), v.clone());
    }
    json!({ "type": "object", "properties": properties, "required": ["path"] })
}

fn ls_tool(sandbox: Arc<dyn Sandbox>) -> Arc<dyn Tool> {
    Arc::new(FuncTool::new(
        "ls",
        "List the entries of a directory.",
        path_schema(&[]),
        move |args, _ctx| {
            let sandbox = Arc::clone(&sandbox);
            async move {
                let path = required_str(&args, "path")?;
                let entries = sandbox.ls(path).await?;
                serde_json::to_string(&entries)
                    .map_err(|e| ToolError::Execution(e.to_string()))
            }
        },
    ))
}

fn read_file_tool(sandbox: Arc<dyn Sandbox>) -> Arc<dyn Tool> {
    Arc::new(FuncTool::new(
        "read_file",
        "Read a file. Binary content is returned base64-encoded.",
        path_schema(&[]),
        move |args, _ctx| {
            let sandbox = Arc::clone(&sandbox);
            async move {
                let path = required_str(&args, "path")?;
                Ok(sandbox.read_file(path).await?)
            }
        },
    ))
}

fn write_file_tool(sandbox: Arc<dyn Sandbox>) -> Arc<dyn Tool> {
    Arc::new(FuncTool::new(
        "write_file",
        "Write a file, creating it and any parent directories as needed.",
        path_schema(&[("content", json!({ "type": "string" }))]),
        move |args, _ctx| {
            let sandbox = Arc::clone(&sandbox);
            async move {
                let path = required_str(&args, "path")?;
                let content = required_str(&args, "content")?;
                sandbox.write_file(path, content).await?;
                Ok(format!("Wrote {} bytes to {}", content.len(), path))
            }
        },
    ))
}

fn edit_file_tool(sandbox: Arc<dyn Sandbox>) -> Arc<dyn Tool> {
    Arc::new(FuncTool::new(
        "edit_file",
        "Replace the first occurrence of old_text with new_text in a file. \
         Fails when old_text is absent.",
        path_schema(&[
            ("old_text", json!({ "type": "string" })),
            ("new_text", json!({ "type": "string" })),
        ]),
        move |args, _ctx| {
            let sandbox = Arc::clone(&sandbox);
            async move {
                let path = required_str(&args, "path")?;
                let old_text = required_str(&args, "old_text")?;
                let new_text = required_str(&args, "new_text")?;
                sandbox.edit_file(path, old_text, new_text).await?;
                Ok(format!("Edited {}", path))
            }
        },
    ))
}

fn glob_tool(sandbox: Arc<dyn Sandbox>) -> Arc<dyn Tool> {
    Arc::new(FuncTool::new(
        "glob",
        "Find files by filename pattern under a directory.",
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "path": { "type": "string" }
            },
            "required": ["pattern"]
        }),
        move |args, _ctx| {
            let sandbox = Arc::clone(&sandbox);
            async move {
                let pattern = required_str(&args, "pattern")?;
                let path = optional_str(&args, "path", ".");
                let mut files = sandbox.glob(pattern, path).await?;
                let truncated = files.len() > GLOB_RESULT_CAP;
                files.truncate(GLOB_RESULT_CAP);
                serde_json::to_string(&json!({ "files": files, "truncated": truncated }))
                    .map_err(|e| ToolError::Execution(e.to_string()))
            }
        },
    ))
}

fn grep_tool(sandbox: Arc<dyn Sandbox>) -> Arc<dyn Tool> {
    Arc::new(FuncTool::new(
        "grep",
        "Search file contents by regular expression under a directory.",
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "path": { "type": "string" }
            },
            "required": ["pattern"]
        }),
        move |args, _ctx| {
            let sandbox = Arc::clone(&sandbox);
            async move {
                let pattern = required_str(&args, "pattern")?;
                let path = optional_str(&args, "path", ".");
                let mut matches = sandbox.grep(pattern, path).await?;
                let truncated = matches.len() > GREP_MATCH_CAP;
                matches.truncate(GREP_MATCH_CAP);
                serde_json::to_string(&json!({ "matches": matches, "truncated": truncated }))
                    .map_err(|e| ToolError::Execution(e.to_string()))
            }
        },
    ))
}

fn execute_tool(sandbox: Arc<dyn Sandbox>) -> Arc<dyn Tool> {
    Arc::new(FuncTool::new(
        "execute",
        "Run a shell command and return its combined output.",
        json!({
            "type": "object",
            "properties": { "command": { "type": "string" } },
            "required": ["command"]
        }),
        move |args, _ctx| {
            let sandbox = Arc::clone(&sandbox);
            async move {
                let command = required_str(&args, "command")?;
                Ok(sandbox.exec(command).await?)
            }
        },
    ))
}

/// Truncates `output` to head + marker + tail when it exceeds the limit.
fn truncate_output(output: &str) -> Option<String> {
    let total = output.chars().count();
    if total <= TOOL_OUTPUT_TRUNCATE_LIMIT {
        return None;
    }
    let prefix: String = output.chars().take(TRUNCATE_KEEP).collect();
    let suffix: String = output.chars().skip(total - TRUNCATE_KEEP).collect();
    Some(format!(
        "{}\n\n... (truncated {} characters) ...\n\n{}",
        prefix,
        total - 2 * TRUNCATE_KEEP,
        suffix
    ))
}

#[async_trait]
impl AgentMiddleware for FilesystemMiddleware {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::BeforeAgent, Phase::WrapToolCall]
    }

    async fn before_agent(&self, state: &mut AgentState) -> Result<(), AgentError> {
        for tool in [
            ls_tool(Arc::clone(&self.sandbox)),
            read_file_tool(Arc::clone(&self.sandbox)),
            write_file_tool(Arc::clone(&self.sandbox)),
            edit_file_tool(Arc::clone(&self.sandbox)),
            glob_tool(Arc::clone(&self.sandbox)),
            grep_tool(Arc::clone(&self.sandbox)),
            execute_tool(Arc::clone(&self.sandbox)),
        ] {
            state.tools.register(tool);
        }
        Ok(())
    }

    async fn wrap_tool_call(&self, ctx: &RunContext, call: ToolCall, next: ToolNext) -> ToolResult {
        let name = call.name.clone();
        let args = call.args.clone();
        let mut result = next(call).await;

        if result.is_success() {
            // Record what the agent wrote, keyed by path.
            match name.as_str() {
                "write_file" => {
                    if let (Some(path), Some(content)) = (
                        args.get("path").and_then(Value::as_str),
                        args.get("content").and_then(Value::as_str),
                    ) {
                        let mut state = ctx.state.lock().await;
                        state.files.insert(path.to_string(), content.to_string());
                    }
                }
                "edit_file" => {
                    if let Some(path) = args.get("path").and_then(Value::as_str) {
                        if let Ok(content) = self.sandbox.read_file(path).await {
                            let mut state = ctx.state.lock().await;
                            state.files.insert(path.to_string(), content);
                        }
                    }
                }
                _ => {}
            }
        }

        if !TRUNCATION_EXEMPT.contains(name.as_str()) {
            if let Some(shorter) = truncate_output(&result.output) {
                debug!(tool = %name, from = result.output.len(), to = shorter.len(), "truncated tool output");
                result.output = shorter;
            }
        }
        result
    }
}
