//! Per-run context handed to tools and middleware wrappers.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::state::{AgentState, SharedState};
use crate::trace::TraceRecorder;

/// Everything a tool or wrapper may touch during one run: identifiers, the
/// cancellation token, the shared thread state, and the optional trace
/// recorder. Cheap to clone; all heavy fields are behind `Arc`.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub thread_id: String,
    pub cancel: CancellationToken,
    pub state: SharedState,
    pub trace: Option<Arc<dyn TraceRecorder>>,
}

impl RunContext {
    /// Context over a fresh state; used by tests and by callers that execute
    /// tools outside a full loop run.
    pub fn detached(thread_id: impl Into<String>) -> Self {
        let thread_id = thread_id.into();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.clone(),
            cancel: CancellationToken::new(),
            state: Arc::new(Mutex::new(AgentState::new(thread_id))),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: Arc<dyn TraceRecorder>) -> Self {
        self.trace = Some(trace);
        self
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("thread_id", &self.thread_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("traced", &self.trace.is_some())
            .finish()
    }
}
