//! HTTP-callback tool: forwards the call to an external service.
//!
//! The call posts `{"name": ..., "args": {...}}` as JSON and returns the
//! response body verbatim as the tool output. Non-2xx statuses and transport
//! failures surface as [`ToolError::Transport`].

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::context::RunContext;
use crate::error::ToolError;
use crate::tools::Tool;

/// Tool whose body lives behind an HTTP endpoint.
pub struct HttpCallbackTool {
    name: String,
    description: String,
    parameters: Value,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpCallbackTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Tool for HttpCallbackTool {
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
        let body = json!({ "name": self.name, "args": Value::Object(args) });
        let request = self.client.post(&self.endpoint).json(&body).send();
        let response = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
            r = request => r.map_err(|e| ToolError::Transport(e.to_string()))?,
        };
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(ToolError::Transport(format!(
                "callback returned {}: {}",
                status, text
            )));
        }
        Ok(text)
    }
}
