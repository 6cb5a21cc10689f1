//! Error types for the execution core.
//!
//! [`AgentError`] covers fatal run errors (they terminate the loop and surface
//! as a terminal `error` event). [`ToolError`] covers per-tool failures, which
//! are never fatal: the loop folds them into a tool-role message so the model
//! can observe and recover.

/// Fatal error from an agent run or one of its phases.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// A message violated a history invariant, or externally submitted input
    /// failed the trust-boundary check.
    #[error("invalid message at index {index}: {reason}")]
    InvalidMessage { index: usize, reason: String },

    /// A before_agent phase failed; the loop never entered iteration.
    #[error("middleware '{name}' setup failed: {message}")]
    MiddlewareSetup { name: String, message: String },

    /// A modify_request phase failed.
    #[error("middleware '{name}' request modification failed: {message}")]
    RequestModification { name: String, message: String },

    /// Model streaming, transport, or response parsing failed.
    #[error("model call failed: {0}")]
    Model(String),

    /// The run's cancellation token fired or its deadline expired.
    #[error("run cancelled: {0}")]
    Cancelled(String),

    /// Internal invariant breakage (poisoned channel, join failure).
    #[error("internal: {0}")]
    Internal(String),
}

/// Error from executing a single tool. Never fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Arguments did not match the tool's schema or were missing.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The tool body ran and failed.
    #[error("{0}")]
    Execution(String),

    /// Transport-level failure (HTTP callback, sandbox daemon).
    #[error("transport: {0}")]
    Transport(String),

    /// The run was cancelled while the tool executed.
    #[error("cancelled")]
    Cancelled,
}

/// Error from a sandbox operation.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("io: {0}")]
    Io(String),
}

impl From<SandboxError> for ToolError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::InvalidArgument(m) => ToolError::InvalidInput(m),
            other => ToolError::Execution(other.to_string()),
        }
    }
}
