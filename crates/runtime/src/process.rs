//! Agent processes: one long-lived conversation per agent.
//!
//! A [`Process`] owns its history, metrics, and status, and drives the
//! LLM↔tool loop for each `send`. Status moves monotonically from
//! pending through running to a terminal state; a terminal process
//! refuses further sends.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use parking_lot::Mutex;
use rcore::{AgentDef, Ctx, Error, Message, Result, encode_tool_result, encode_tool_use};
use serde_json::Value;
use tools::Registry;
use ulid::Ulid;

use crate::provider::{Completion, Provider, ProviderRequest, StreamEvent, ToolCall, Usage};
use crate::store::{CALLER_KEY, Store};
use crate::stream::Publisher;

/// LLM loop iteration cap per send.
pub const MAX_ITERATIONS: u32 = 50;

/// Messages of history kept in the model's context window.
pub const HISTORY_WINDOW: usize = 100;

/// Process lifecycle status. Progresses monotonically; the last three
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Spawned, no send yet.
    Pending,
    /// At least one send started.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Timed out before finishing.
    Timeout,
}

impl Status {
    /// Whether the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }
}

/// Per-process counters.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    /// LLM loop iterations across all sends.
    pub iterations: u64,
    /// Accumulated token usage and cost.
    pub usage: Usage,
    /// Tool calls dispatched.
    pub tool_calls: u64,
    /// Tool errors recovered inside the loop.
    pub errors: u64,
    /// Timestamp of the last LLM turn.
    pub last_active: Option<DateTime<Utc>>,
}

/// A terminal transition, handed to the orchestrator's hook.
#[derive(Debug, Clone)]
pub enum TerminalEvent {
    /// The process completed with a result.
    Completed(String),
    /// The process failed.
    Failed(String),
}

type TerminalHook = Arc<dyn Fn(&Process, &TerminalEvent) + Send + Sync>;

struct State {
    status: Status,
    metrics: Metrics,
    history: Vec<Message>,
    cancel: Option<Ctx>,
}

/// How a process is assembled; filled by the orchestrator.
pub struct ProcessSpec {
    /// Resolved agent definition (extends and defaults applied).
    pub agent: AgentDef,
    /// Task description for observability.
    pub task: String,
    /// Additional system prompt blocks (team, blackboard, knowledge).
    pub system_extra: String,
    /// Narrowed registry for this agent.
    pub registry: Registry,
    /// The LLM provider.
    pub provider: Arc<dyn Provider>,
    /// Optional persistence collaborator.
    pub store: Option<Arc<dyn Store>>,
    /// Parent process, for the spawn tree.
    pub parent: Option<Ulid>,
    /// Depth in the spawn tree.
    pub depth: u32,
}

/// A running instance of an agent.
pub struct Process {
    id: Ulid,
    agent: AgentDef,
    task: String,
    started: DateTime<Utc>,
    parent: Option<Ulid>,
    depth: u32,
    system_extra: String,
    registry: Registry,
    provider: Arc<dyn Provider>,
    store: Option<Arc<dyn Store>>,
    state: Mutex<State>,
    send_gate: tokio::sync::Mutex<()>,
    terminal_hook: Mutex<Option<TerminalHook>>,
}

impl Process {
    /// Create a process from its spec.
    pub fn new(spec: ProcessSpec) -> Arc<Self> {
        Arc::new(Self {
            id: Ulid::new(),
            agent: spec.agent,
            task: spec.task,
            started: Utc::now(),
            parent: spec.parent,
            depth: spec.depth,
            system_extra: spec.system_extra,
            registry: spec.registry,
            provider: spec.provider,
            store: spec.store,
            state: Mutex::new(State {
                status: Status::Pending,
                metrics: Metrics::default(),
                history: Vec::new(),
                cancel: None,
            }),
            send_gate: tokio::sync::Mutex::new(()),
            terminal_hook: Mutex::new(None),
        })
    }

    /// Unique process id.
    pub fn id(&self) -> Ulid {
        self.id
    }

    /// The agent definition this process runs.
    pub fn agent(&self) -> &AgentDef {
        &self.agent
    }

    /// Task description.
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Spawn timestamp.
    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }

    /// Parent process id, if spawned by another process.
    pub fn parent_id(&self) -> Option<Ulid> {
        self.parent
    }

    /// Depth in the spawn tree.
    pub fn spawn_depth(&self) -> u32 {
        self.depth
    }

    /// Current status.
    pub fn status(&self) -> Status {
        self.state.lock().status
    }

    /// Snapshot of the metrics.
    pub fn metrics(&self) -> Metrics {
        self.state.lock().metrics.clone()
    }

    /// Snapshot of the conversation history.
    pub fn history(&self) -> Vec<Message> {
        self.state.lock().history.clone()
    }

    /// Replace an empty history with persisted messages.
    pub fn hydrate(&self, messages: Vec<Message>) {
        let mut state = self.state.lock();
        if state.history.is_empty() {
            state.history = messages;
        }
    }

    /// Seed the history directly (tests and delegation fixtures).
    pub fn preload(&self, messages: Vec<Message>) {
        self.state.lock().history = messages;
    }

    pub(crate) fn set_terminal_hook(&self, hook: TerminalHook) {
        *self.terminal_hook.lock() = Some(hook);
    }

    /// A spec re-creating this process fresh (supervision restarts).
    pub(crate) fn respawn_spec(&self) -> ProcessSpec {
        ProcessSpec {
            agent: self.agent.clone(),
            task: self.task.clone(),
            system_extra: self.system_extra.clone(),
            registry: self.registry.clone(),
            provider: self.provider.clone(),
            store: self.store.clone(),
            parent: self.parent,
            depth: self.depth,
        }
    }

    /// Send a message and run the LLM loop to a final answer.
    pub async fn send(&self, ctx: &Ctx, message: &str) -> Result<String> {
        self.ensure_running()?;
        let _gate = self.send_gate.lock().await;
        self.ensure_running()?;
        self.state.lock().cancel = Some(ctx.clone());

        let result = self.run_loop(ctx, message).await;

        self.state.lock().cancel = None;
        if let Err(err) = &result
            && matches!(
                err,
                Error::Upstream(_)
                    | Error::RateLimited
                    | Error::MaxIterationsExceeded(_)
                    | Error::BudgetExceeded { .. }
            )
        {
            self.fail(err);
        }
        result
    }

    /// Send without waiting: returns a cancellable handle.
    pub fn send_async(self: &Arc<Self>, message: impl Into<String>) -> SendHandle {
        let ctx = Ctx::background();
        let process = self.clone();
        let message = message.into();
        let task_ctx = ctx.clone();
        let task = tokio::spawn(async move { process.send(&task_ctx, &message).await });
        SendHandle { ctx, task }
    }

    /// Send with streaming delivery.
    ///
    /// The returned handle outlives any subscriber; dropping consumers
    /// does not stop the send. Only the handle's own cancel does.
    pub fn send_stream(self: &Arc<Self>, message: impl Into<String>) -> StreamHandle {
        let ctx = Ctx::background();
        let publisher: Publisher<StreamEvent> = Publisher::new();
        let process = self.clone();
        let message = message.into();
        let task_ctx = ctx.clone();
        let task_publisher = publisher.clone();
        tokio::spawn(async move {
            if let Err(err) = process.run_stream(&task_ctx, &message, &task_publisher).await {
                tracing::warn!(process = %process.id, error = %err, "stream send failed");
            }
            task_publisher.finish();
        });
        StreamHandle { ctx, publisher }
    }

    /// Mark the process completed. Idempotent after the first terminal
    /// transition; fires the orchestrator hook exactly once.
    pub fn complete(&self, result: impl Into<String>) {
        let result = result.into();
        if !self.transition(Status::Completed) {
            return;
        }
        self.fire(TerminalEvent::Completed(result));
    }

    /// Mark the process failed. Idempotent like [`complete`](Self::complete).
    pub fn fail(&self, error: &Error) {
        if !self.transition(Status::Failed) {
            return;
        }
        self.fire(TerminalEvent::Failed(error.to_string()));
    }

    /// Mark the process timed out.
    pub fn timeout(&self) {
        if !self.transition(Status::Timeout) {
            return;
        }
        self.fire(TerminalEvent::Failed("timeout".into()));
    }

    /// Cancel any in-flight send and quietly finish the process.
    pub fn stop(&self) {
        let cancel = self.state.lock().cancel.clone();
        if let Some(ctx) = cancel {
            ctx.cancel();
        }
        self.transition(Status::Completed);
    }

    fn transition(&self, to: Status) -> bool {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return false;
        }
        tracing::debug!(process = %self.id, agent = %self.agent.name, ?to, "status transition");
        state.status = to;
        true
    }

    fn fire(&self, event: TerminalEvent) {
        let hook = self.terminal_hook.lock().clone();
        if let Some(hook) = hook {
            hook(self, &event);
        }
    }

    fn ensure_running(&self) -> Result<()> {
        let mut state = self.state.lock();
        match state.status {
            Status::Pending => {
                state.status = Status::Running;
                Ok(())
            }
            Status::Running => Ok(()),
            _ => Err(Error::ProcessNotRunning(self.agent.name.clone())),
        }
    }

    fn append(&self, message: Message) {
        if let Some(store) = &self.store {
            store.insert_chat_message(&self.agent.name, message.role, &message.content);
        }
        self.state.lock().history.push(message);
    }

    /// The capped context window sent to the model.
    fn window(&self) -> Vec<Message> {
        let state = self.state.lock();
        let skip = state.history.len().saturating_sub(HISTORY_WINDOW);
        state.history[skip..].to_vec()
    }

    /// Assemble the system prompt: agent prompt, wiring blocks, and
    /// content of skills matched against the incoming message.
    fn system_prompt(&self, query: &str) -> String {
        let mut prompt = self.agent.system.clone();
        if !self.system_extra.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&self.system_extra);
        }
        if let Some(skills) = self.registry.skills() {
            for skill in skills.matched(query) {
                prompt.push_str("\n\n");
                prompt.push_str(&skill.content);
            }
        }
        prompt
    }

    fn record_usage(&self, usage: &Usage) -> Result<()> {
        let mut state = self.state.lock();
        state.metrics.iterations += 1;
        state.metrics.usage.add(usage);
        state.metrics.last_active = Some(Utc::now());
        if let Some(cap) = self.agent.budget_cap()?
            && state.metrics.usage.cost > cap
        {
            return Err(Error::BudgetExceeded {
                spent: state.metrics.usage.cost,
                cap,
            });
        }
        Ok(())
    }

    async fn run_loop(&self, ctx: &Ctx, user_message: &str) -> Result<String> {
        self.append(Message::user(user_message));
        let tool_ctx = ctx.with_value(CALLER_KEY, self.agent.name.clone());
        let system = self.system_prompt(user_message);
        let tools = self.registry.schemas(user_message);

        for _ in 0..MAX_ITERATIONS {
            let mut messages = vec![Message::system(system.clone())];
            messages.extend(self.window());
            let request = ProviderRequest {
                model: self.agent.model.clone(),
                temperature: self.agent.temperature,
                messages,
                tools: tools.clone(),
            };

            let completion = self.complete_with_retry(ctx, request).await?;
            self.record_usage(&completion.usage)?;

            if completion.tool_calls.is_empty() {
                self.append(Message::assistant(completion.content.clone()));
                return Ok(completion.content);
            }

            self.append(Message::assistant(assistant_with_calls(&completion)));
            let results = self.dispatch(&tool_ctx, &completion.tool_calls).await;
            self.append(Message::user(results));
        }

        Err(Error::MaxIterationsExceeded(MAX_ITERATIONS))
    }

    async fn run_stream(
        &self,
        ctx: &Ctx,
        user_message: &str,
        publisher: &Publisher<StreamEvent>,
    ) -> Result<String> {
        self.ensure_running()?;
        let _gate = self.send_gate.lock().await;
        self.ensure_running()?;

        self.append(Message::user(user_message));
        let tool_ctx = ctx.with_value(CALLER_KEY, self.agent.name.clone());
        let system = self.system_prompt(user_message);
        let tools = self.registry.schemas(user_message);

        for _ in 0..MAX_ITERATIONS {
            let mut messages = vec![Message::system(system.clone())];
            messages.extend(self.window());
            let request = ProviderRequest {
                model: self.agent.model.clone(),
                temperature: self.agent.temperature,
                messages,
                tools: tools.clone(),
            };

            // Accumulate content deltas and tool-call argument
            // fragments until the provider finishes the turn.
            let mut content = String::new();
            let mut partial: Vec<(String, String, String)> = Vec::new();
            let mut usage = Usage::default();
            {
                let mut stream = self.provider.stream(ctx, request);
                while let Some(event) = stream.next().await {
                    if let Some(err) = ctx.err() {
                        return Err(err);
                    }
                    let event = event?;
                    match &event {
                        StreamEvent::Content(delta) => content.push_str(delta),
                        StreamEvent::ToolCallStart { index, id, name } => {
                            if partial.len() <= *index {
                                partial.resize(*index + 1, Default::default());
                            }
                            partial[*index].0 = id.clone();
                            partial[*index].1 = name.clone();
                        }
                        StreamEvent::ToolCallDelta { index, fragment } => {
                            if let Some(slot) = partial.get_mut(*index) {
                                slot.2.push_str(fragment);
                            }
                        }
                        StreamEvent::Finished { usage: u } => usage.add(u),
                    }
                    publisher.publish(event);
                }
            }

            self.record_usage(&usage)?;
            let tool_calls: Vec<ToolCall> = partial
                .into_iter()
                .map(|(id, name, args)| ToolCall {
                    id,
                    name,
                    arguments: serde_json::from_str(&args)
                        .unwrap_or(Value::Object(Default::default())),
                })
                .collect();

            if tool_calls.is_empty() {
                self.append(Message::assistant(content.clone()));
                return Ok(content);
            }

            let completion = Completion {
                content,
                tool_calls,
                usage,
            };
            self.append(Message::assistant(assistant_with_calls(&completion)));
            let results = self.dispatch(&tool_ctx, &completion.tool_calls).await;
            self.append(Message::user(results));
        }

        Err(Error::MaxIterationsExceeded(MAX_ITERATIONS))
    }

    /// Execute each tool call, recovering failures into result
    /// envelopes the model can react to.
    async fn dispatch(&self, ctx: &Ctx, calls: &[ToolCall]) -> String {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let output = match self
                .registry
                .execute(ctx, &call.name, call.arguments.clone())
                .await
            {
                Ok(output) => output,
                Err(err) => {
                    tracing::warn!(tool = %call.name, error = %err, "tool call failed");
                    self.state.lock().metrics.errors += 1;
                    format!("Error: {err}")
                }
            };
            self.state.lock().metrics.tool_calls += 1;
            results.push(encode_tool_result(&call.id, &call.name, &output));
        }
        results.join("\n")
    }

    async fn complete_with_retry(
        &self,
        ctx: &Ctx,
        request: ProviderRequest,
    ) -> Result<Completion> {
        let retry = self.agent.retry.clone();
        let attempts = retry.as_ref().map(|r| r.attempts).unwrap_or(0);
        let mut attempt = 0u32;
        let mut request = request;
        let mut tried_fallback = false;

        loop {
            let result = ctx.run(self.provider.complete(ctx, request.clone())).await;
            match result {
                Ok(completion) => return Ok(completion),
                Err(err @ (Error::Upstream(_) | Error::RateLimited)) => {
                    if let Some(retry) = retry.as_ref().filter(|_| attempt < attempts) {
                        attempt += 1;
                        let delay = retry.backoff.delay(retry.delay, attempt);
                        tracing::warn!(
                            agent = %self.agent.name,
                            attempt,
                            error = %err,
                            "LLM call failed, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    } else if !tried_fallback
                        && let Some(fallback) = &self.agent.fallback_model
                    {
                        tracing::warn!(
                            agent = %self.agent.name,
                            fallback = %fallback,
                            "switching to fallback model"
                        );
                        request.model = fallback.clone();
                        tried_fallback = true;
                    } else {
                        return Err(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Render the assistant message carrying tool-call envelopes.
fn assistant_with_calls(completion: &Completion) -> String {
    let mut content = completion.content.clone();
    for call in &completion.tool_calls {
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str(&encode_tool_use(&call.id, &call.name, &call.arguments));
    }
    content
}

/// A cancellable one-shot send.
pub struct SendHandle {
    ctx: Ctx,
    task: tokio::task::JoinHandle<Result<String>>,
}

impl SendHandle {
    /// Cancel the in-flight send.
    pub fn cancel(&self) {
        self.ctx.cancel();
    }

    /// Wait for the final response.
    pub async fn wait(self) -> Result<String> {
        self.task
            .await
            .map_err(|e| Error::Upstream(format!("send task panicked: {e}")))?
    }
}

/// A server-side stream of one send.
pub struct StreamHandle {
    ctx: Ctx,
    publisher: Publisher<StreamEvent>,
}

impl StreamHandle {
    /// Attach a subscriber: history replay, then live events.
    pub fn subscribe(&self) -> tokio::sync::mpsc::Receiver<StreamEvent> {
        self.publisher.subscribe()
    }

    /// Cancel the stream itself (not just one subscriber).
    pub fn cancel(&self) {
        self.ctx.cancel();
    }

    /// Whether the stream has finished.
    pub fn is_finished(&self) -> bool {
        self.publisher.is_finished()
    }
}
