//! The agent loop: alternate model calls and tool execution, stream events,
//! persist per-thread state.
//!
//! One run: load (or create) the thread state, append the submitted messages,
//! run the BeforeAgent sweep, then iterate model ↔ tools up to the iteration
//! cap. Each iteration snapshots the history (ModifyRequest middleware can
//! never corrupt the authoritative copy), composes the model-call onion around
//! the streaming innermost operation, and appends the assistant turn. When the
//! model requested tools, every call runs on its own task and results append
//! in original call order after the barrier. State is persisted on
//! every exit path and the event channel always ends with one terminal event.

mod model_call;

use std::collections::HashMap;
use std::sync::Arc;

use run_event::{AgentEvent, EventKind};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::context::RunContext;
use crate::error::AgentError;
use crate::llm::ModelClient;
use crate::message::{chain, Message, Role, ToolCall};
use crate::middleware::{
    compose_model_call, compose_tool_call, AgentMiddleware, Phase, ToolNext,
};
use crate::state::{AgentState, SharedState};
use crate::store::ThreadStore;
use crate::tools::{Tool, ToolRegistry, ToolResult, ToolSchema};
use crate::trace::TraceRecorder;

/// Default bound on loop iterations per run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 25;
/// Buffer size of the output event channel.
pub const EVENT_BUFFER: usize = 64;

/// A configured agent: model, middleware stack, tools, thread store.
pub struct Agent {
    model: Arc<dyn ModelClient>,
    model_id: String,
    system_prompt: String,
    middleware: Vec<Arc<dyn AgentMiddleware>>,
    tools: HashMap<String, Arc<dyn Tool>>,
    advertised: Vec<String>,
    max_iterations: u32,
    max_tokens: u32,
    temperature: Option<f32>,
    store: Arc<ThreadStore>,
    trace: Option<Arc<dyn TraceRecorder>>,
}

/// Builder for [`Agent`].
pub struct AgentBuilder {
    model: Arc<dyn ModelClient>,
    model_id: String,
    system_prompt: String,
    middleware: Vec<Arc<dyn AgentMiddleware>>,
    tools: HashMap<String, Arc<dyn Tool>>,
    advertised: Vec<String>,
    max_iterations: u32,
    max_tokens: u32,
    temperature: Option<f32>,
    store: Arc<ThreadStore>,
    trace: Option<Arc<dyn TraceRecorder>>,
}

impl Agent {
    pub fn builder(model: Arc<dyn ModelClient>, store: Arc<ThreadStore>) -> AgentBuilder {
        AgentBuilder {
            model,
            model_id: String::new(),
            system_prompt: String::new(),
            middleware: Vec::new(),
            tools: HashMap::new(),
            advertised: Vec::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tokens: 4_096,
            temperature: None,
            store,
            trace: None,
        }
    }

    /// Creates the bounded event channel a caller pairs with [`Agent::run`].
    pub fn event_channel() -> (mpsc::Sender<AgentEvent>, mpsc::Receiver<AgentEvent>) {
        mpsc::channel(EVENT_BUFFER)
    }

    /// Wraps an event receiver as a `Stream` for SSE/WebSocket façades.
    pub fn event_stream(rx: mpsc::Receiver<AgentEvent>) -> ReceiverStream<AgentEvent> {
        ReceiverStream::new(rx)
    }

    /// Non-streaming variant: runs the loop, draining events internally, and
    /// returns the final state.
    pub async fn invoke(
        &self,
        cancel: CancellationToken,
        messages: Vec<Message>,
        thread_id: &str,
    ) -> Result<AgentState, AgentError> {
        let (tx, mut rx) = Self::event_channel();
        let run = self.run(cancel, messages, thread_id, tx);
        let drain = async {
            while rx.recv().await.is_some() {}
        };
        let (result, ()) = tokio::join!(run, drain);
        result
    }

    /// Runs the loop, emitting events into `events` until one terminal event;
    /// the channel closes when the sender drops on return.
    ///
    /// Submitted messages cross the trust boundary here: any non-empty
    /// submission must pass the user-input validator, and a failure surfaces
    /// as an error return before the loop starts, never on the event stream.
    /// An empty submission is valid and continues the prior conversation.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        messages: Vec<Message>,
        thread_id: &str,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<AgentState, AgentError> {
        if !messages.is_empty() {
            chain::validate_user_input(&messages)?;
        }
        let run_id = Uuid::new_v4().to_string();
        debug!(run_id = %run_id, thread_id = %thread_id, submitted = messages.len(), "agent run starting");

        let mut state = self.store.load_or_create(thread_id);
        state.messages.extend(messages);
        // The registry holds only tools installed by this run's setup sweep.
        state.tools = ToolRegistry::new();

        if let Err(e) = self.before_agent_sweep(&mut state).await {
            self.store.save(thread_id, state);
            let _ = events
                .send(
                    AgentEvent::error(e.to_string())
                        .with_run_id(&run_id)
                        .with_thread_id(thread_id),
                )
                .await;
            return Err(e);
        }

        let merged = state.tools.merged_over(&self.tools);
        let schemas = self.advertised_schemas(&merged);

        let shared: SharedState = Arc::new(Mutex::new(state));
        let ctx = RunContext {
            run_id: run_id.clone(),
            thread_id: thread_id.to_string(),
            cancel,
            state: Arc::clone(&shared),
            trace: self.trace.clone(),
        };

        let outcome = self.iterate(&ctx, &merged, &schemas, &events).await;

        let final_state = shared.lock().await.clone();
        self.store.save(thread_id, final_state.clone());

        match outcome {
            Ok(()) => {
                let _ = events
                    .send(AgentEvent::done().with_run_id(&run_id).with_thread_id(thread_id))
                    .await;
                debug!(run_id = %run_id, messages = final_state.messages.len(), "agent run done");
                Ok(final_state)
            }
            Err(e) => {
                let _ = events
                    .send(
                        AgentEvent::error(e.to_string())
                            .with_run_id(&run_id)
                            .with_thread_id(thread_id),
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn before_agent_sweep(&self, state: &mut AgentState) -> Result<(), AgentError> {
        for mw in &self.middleware {
            if !mw.phases().contains(&Phase::BeforeAgent) {
                continue;
            }
            mw.before_agent(state)
                .await
                .map_err(|e| AgentError::MiddlewareSetup {
                    name: mw.name().to_string(),
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Schemas advertised to the model: the merged tool map, intersected with
    /// the configured tool-name list when one is set. Sorted for determinism.
    fn advertised_schemas(&self, merged: &HashMap<String, Arc<dyn Tool>>) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = merged
            .values()
            .filter(|tool| {
                self.advertised.is_empty() || self.advertised.iter().any(|n| n == tool.name())
            })
            .map(|tool| ToolSchema::of(tool.as_ref()))
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    async fn iterate(
        &self,
        ctx: &RunContext,
        merged: &HashMap<String, Arc<dyn Tool>>,
        schemas: &[ToolSchema],
        events: &mpsc::Sender<AgentEvent>,
    ) -> Result<(), AgentError> {
        for iteration in 0..self.max_iterations {
            if ctx.cancel.is_cancelled() {
                return Err(AgentError::Cancelled("cancellation requested".into()));
            }

            // Snapshot: middleware transforms a copy, never the history.
            let mut msgs = ctx.state.lock().await.messages.clone();
            if !self.system_prompt.is_empty()
                && msgs.first().map(|m| m.role) != Some(Role::System)
            {
                msgs.insert(0, Message::system(self.system_prompt.clone()));
            }

            for mw in &self.middleware {
                if !mw.phases().contains(&Phase::ModifyRequest) {
                    continue;
                }
                msgs = mw
                    .modify_request(msgs)
                    .await
                    .map_err(|e| AgentError::RequestModification {
                        name: mw.name().to_string(),
                        message: e.to_string(),
                    })?;
            }

            let _ = events
                .send(
                    AgentEvent::new(EventKind::OnChatModelStart)
                        .with_run_id(&ctx.run_id)
                        .with_thread_id(&ctx.thread_id)
                        .with_data(json!({ "iteration": iteration })),
                )
                .await;

            let innermost = model_call::innermost(model_call::ModelCallParams {
                client: Arc::clone(&self.model),
                model: self.model_id.clone(),
                tools: schemas.to_vec(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                cancel: ctx.cancel.clone(),
                events: events.clone(),
                run_id: ctx.run_id.clone(),
                thread_id: ctx.thread_id.clone(),
            });
            let composed = compose_model_call(&self.middleware, ctx, innermost);
            let response = composed(msgs).await?;

            let _ = events
                .send(
                    AgentEvent::new(EventKind::OnChatModelEnd)
                        .with_run_id(&ctx.run_id)
                        .with_thread_id(&ctx.thread_id)
                        .with_data(json!({
                            "content": response.content,
                            "tool_calls": response.tool_calls.len(),
                        })),
                )
                .await;

            if response.is_empty() {
                // Nothing actionable; appending would break the assistant
                // invariant, so the turn ends here.
                break;
            }

            ctx.state
                .lock()
                .await
                .messages
                .push(Message::assistant(
                    response.content.clone(),
                    response.tool_calls.clone(),
                ));

            if response.tool_calls.is_empty() {
                break;
            }

            let results = self
                .execute_tool_calls(ctx, merged, events, response.tool_calls)
                .await;
            let mut state = ctx.state.lock().await;
            for result in results {
                state
                    .messages
                    .push(Message::tool(result.call_id, result.name, result.output));
            }
            debug!(iteration, messages = state.messages.len(), "iteration complete");
        }
        Ok(())
    }

    /// Runs every call of one iteration on its own task and returns the
    /// results in original call order. Always waits for every task, also
    /// under cancellation.
    async fn execute_tool_calls(
        &self,
        ctx: &RunContext,
        merged: &HashMap<String, Arc<dyn Tool>>,
        events: &mpsc::Sender<AgentEvent>,
        calls: Vec<ToolCall>,
    ) -> Vec<ToolResult> {
        let mut identities = Vec::with_capacity(calls.len());
        let mut handles = Vec::with_capacity(calls.len());
        for call in calls {
            identities.push((call.id.clone(), call.name.clone()));
            let ctx = ctx.clone();
            let events = events.clone();
            let tools = merged.clone();
            let middleware = self.middleware.clone();
            handles.push(tokio::spawn(async move {
                run_one_tool_call(ctx, tools, middleware, events, call).await
            }));
        }

        // Barrier: every spawned task finishes before results are read, in
        // original call order.
        let joined = futures::future::join_all(handles).await;
        identities
            .into_iter()
            .zip(joined)
            .map(|((call_id, name), joined)| match joined {
                Ok(result) => result,
                Err(e) => {
                    let message = format!("tool task failed: {e}");
                    ToolResult::failure(call_id, name, format!("Error: {message}"), message)
                }
            })
            .collect()
    }
}

/// One tool call: emit start, run the wrap_tool_call onion around the lookup
/// and execution, emit end.
async fn run_one_tool_call(
    ctx: RunContext,
    tools: HashMap<String, Arc<dyn Tool>>,
    middleware: Vec<Arc<dyn AgentMiddleware>>,
    events: mpsc::Sender<AgentEvent>,
    call: ToolCall,
) -> ToolResult {
    let _ = events
        .send(
            AgentEvent::new(EventKind::OnToolStart)
                .with_name(&call.name)
                .with_run_id(&ctx.run_id)
                .with_thread_id(&ctx.thread_id)
                .with_data(json!({ "id": call.id, "input": call.args })),
        )
        .await;

    let innermost: ToolNext = {
        let ctx = ctx.clone();
        Box::new(move |call: ToolCall| {
            Box::pin(async move {
                let Some(tool) = tools.get(&call.name) else {
                    return ToolResult::failure(
                        call.id,
                        call.name.clone(),
                        format!("Error: tool \"{}\" not found", call.name),
                        format!("unknown tool: {}", call.name),
                    );
                };
                match tool.call(call.args.clone(), &ctx).await {
                    Ok(output) => ToolResult::success(call.id, call.name, output),
                    Err(e) => {
                        let message = e.to_string();
                        ToolResult::failure(
                            call.id,
                            call.name,
                            format!("Error: {message}"),
                            message,
                        )
                    }
                }
            })
        })
    };
    let composed = compose_tool_call(&middleware, &ctx, innermost);
    let result = composed(call).await;

    let _ = events
        .send(
            AgentEvent::new(EventKind::OnToolEnd)
                .with_name(&result.name)
                .with_run_id(&ctx.run_id)
                .with_thread_id(&ctx.thread_id)
                .with_data(json!({ "id": result.call_id, "output": result.output })),
        )
        .await;
    result
}

impl AgentBuilder {
    pub fn model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Appends one middleware; registration order is composition order.
    pub fn middleware(mut self, mw: Arc<dyn AgentMiddleware>) -> Self {
        self.middleware.push(mw);
        self
    }

    pub fn middleware_stack(mut self, stack: Vec<Arc<dyn AgentMiddleware>>) -> Self {
        self.middleware = stack;
        self
    }

    /// Installs an agent-level tool. State-registered tools shadow these.
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    /// Restricts the schemas advertised to the model to these names.
    pub fn advertise(mut self, names: Vec<String>) -> Self {
        self.advertised = names;
        self
    }

    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn trace(mut self, trace: Arc<dyn TraceRecorder>) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn build(self) -> Agent {
        Agent {
            model: self.model,
            model_id: self.model_id,
            system_prompt: self.system_prompt,
            middleware: self.middleware,
            tools: self.tools,
            advertised: self.advertised,
            max_iterations: self.max_iterations,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            store: self.store,
            trace: self.trace,
        }
    }
}
