//! Todo-list middleware: installs a `write_todos` tool that replaces the
//! thread's todo list wholesale.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::context::RunContext;
use crate::error::{AgentError, ToolError};
use crate::middleware::{AgentMiddleware, Phase};
use crate::state::{AgentState, Todo, TodoStatus};
use crate::tools::{FuncTool, Tool};

/// Tool name for replacing the todo list.
pub const TOOL_WRITE_TODOS: &str = "write_todos";

/// Middleware that keeps the thread's todo list reachable from the model.
#[derive(Default)]
pub struct TodoListMiddleware;

impl TodoListMiddleware {
    pub fn new() -> Self {
        Self
    }
}

fn parse_status(raw: &str) -> Result<TodoStatus, ToolError> {
    match raw {
        "pending" => Ok(TodoStatus::Pending),
        "in_progress" => Ok(TodoStatus::InProgress),
        "done" => Ok(TodoStatus::Done),
        other => Err(ToolError::InvalidInput(format!(
            "unknown status '{}' (use pending, in_progress, or done)",
            other
        ))),
    }
}

fn parse_todos(args: &Map<String, Value>) -> Result<Vec<Todo>, ToolError> {
    let arr = args
        .get("todos")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ToolError::InvalidInput("missing or invalid 'todos' array".to_string()))?;
    let mut out = Vec::with_capacity(arr.len());
    for (i, v) in arr.iter().enumerate() {
        let obj = v
            .as_object()
            .ok_or_else(|| ToolError::InvalidInput(format!("todos[{}] must be an object", i)))?;
        let id = obj
            .get("id")
            .and_then(|x| x.as_str())
            .map(String::from)
            .ok_or_else(|| ToolError::InvalidInput(format!("todos[{}] missing 'id'", i)))?;
        let title = obj
            .get("title")
            .and_then(|x| x.as_str())
            .map(String::from)
            .ok_or_else(|| ToolError::InvalidInput(format!("todos[{}] missing 'title'", i)))?;
        let status = match obj.get("status").and_then(|x| x.as_str()) {
            Some(raw) => parse_status(raw)?,
            None => TodoStatus::Pending,
        };
        out.push(Todo { id, title, status });
    }
    Ok(out)
}

fn write_todos_tool() -> Arc<dyn Tool> {
    Arc::new(FuncTool::new(
        TOOL_WRITE_TODOS,
        "Replace the whole todo list. Pass every todo, not just changed ones; \
         omitted todos are removed.",
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "title": { "type": "string" },
                            "status": { "type": "string", "enum": ["pending", "in_progress", "done"] }
                        },
                        "required": ["id", "title"]
                    }
                }
            },
            "required": ["todos"]
        }),
        |args, ctx: RunContext| async move {
            let todos = parse_todos(&args)?;
            let count = todos.len();
            let open = todos.iter().filter(|t| t.status != TodoStatus::Done).count();
            let mut state = ctx.state.lock().await;
            state.todos = todos;
            Ok(format!("{} todos ({} open)", count, open))
        },
    ))
}

#[async_trait]
impl AgentMiddleware for TodoListMiddleware {
    fn name(&self) -> &str {
        "todos"
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::BeforeAgent]
    }

    async fn before_agent(&self, state: &mut AgentState) -> Result<(), AgentError> {
        // The todo slice default-initializes with the state; registering the
        // tool is what makes it reachable.
        state.tools.register(write_todos_tool());
        Ok(())
    }
}
