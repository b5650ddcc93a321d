//! # Runner (orientation)
//!
//! The `Runner` drives a run across an [`AgentGraph`]: it calls the model for
//! the active agent, executes tool calls through each agent's [`ToolRouter`],
//! performs handoffs, and applies guardrails at the input and output
//! checkpoints. Every step appends to one ordered history, which is returned
//! in the [`RunResult`] (or in the partial result of a [`RunError`]).
//!
//! A turn is one model invocation. The model's response decides the next step:
//!
//! - a call to a handoff tool switches the active agent. Only the first
//!   handoff call is honoured and any other calls in the same response are
//!   discarded unexecuted;
//! - ordinary tool calls run (concurrently unless disabled), and their results
//!   are recorded in call order before the next turn;
//! - otherwise the content is the agent's final output. It is parsed against
//!   the agent's output schema and checked by its output guardrails.
//!
//! ```rust
//! use tower_agents::{Agent, AgentGraph, Handoff, RunContext, Runner};
//! use tower_agents::model::{ModelResponse, ScriptedModel};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let graph: AgentGraph = AgentGraph::new([
//!     Agent::new("triage", "Route by language.").with_handoff(Handoff::to("french")),
//!     Agent::new("french", "Reply in French."),
//! ])?;
//! let model = ScriptedModel::new()
//!     .respond("triage", ModelResponse::tool_call("transfer_to_french", serde_json::json!({})))
//!     .respond("french", ModelResponse::text("Bonjour !"));
//!
//! let runner = Runner::new(graph, model.into_service());
//! let result = runner.run("triage", "Bonjour", &RunContext::new(())).await?;
//! assert_eq!(result.last_agent, "french");
//! assert_eq!(result.final_text(), Some("Bonjour !"));
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tower::{BoxError, ServiceExt};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::agent::Agent;
use crate::context::RunContext;
use crate::error::{AgentsError, Result, RunError};
use crate::graph::AgentGraph;
use crate::guardrail::{GuardrailCheck, GuardrailEngine};
use crate::handoff::HandoffRouter;
use crate::items::{ConversationItem, ItemHelpers, RunInput};
use crate::memory::Session;
use crate::model::{ModelRequest, ModelResponse, ModelSvc, ToolCallRequest};
use crate::result::RunResult;
use crate::shared::SharedService;
use crate::streaming::{collect_chunks, EventSender, RunEvent, StreamingModel, StreamingRun};
use crate::tool::{ToolDef, ToolErrorPolicy, ToolExecutionError, ToolHandler, ToolInvocation};
use crate::usage::UsageStats;

/// Configuration for a run.
///
/// ```rust
/// use tower_agents::runner::RunConfig;
/// use tower_agents::tool::ToolErrorPolicy;
///
/// let config = RunConfig::default()
///     .with_max_turns(5)
///     .with_max_concurrency(2)
///     .with_tool_error_policy(ToolErrorPolicy::Fatal);
/// assert_eq!(config.max_turns, 5);
/// assert!(config.parallel_tools);
/// ```
#[derive(Clone)]
pub struct RunConfig {
    /// Model invocations allowed before the run fails with `MaxTurnsExceeded`.
    pub max_turns: usize,

    /// Whether to execute the tool calls of one turn concurrently.
    /// Defaults to true.
    pub parallel_tools: bool,

    /// Optional cap on concurrently executing tool calls.
    pub max_concurrency: Option<usize>,

    /// Whether a failing tool aborts the run or is reported back to the model.
    pub tool_error_policy: ToolErrorPolicy,

    /// Model name used when the active agent does not set one.
    pub default_model: Option<String>,

    /// Session to load history from and persist new items to.
    pub session: Option<Arc<dyn Session>>,
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("max_turns", &self.max_turns)
            .field("parallel_tools", &self.parallel_tools)
            .field("max_concurrency", &self.max_concurrency)
            .field("tool_error_policy", &self.tool_error_policy)
            .field("default_model", &self.default_model)
            .field("session", &self.session.as_ref().map(|s| s.session_id().to_string()))
            .finish()
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            parallel_tools: true,
            max_concurrency: None,
            tool_error_policy: ToolErrorPolicy::Recover,
            default_model: None,
            session: None,
        }
    }
}

impl RunConfig {
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Toggle parallel execution of tool calls within a single turn.
    pub fn with_parallel_tools(mut self, enabled: bool) -> Self {
        self.parallel_tools = enabled;
        self
    }

    /// Set maximum number of concurrent tool calls when running in parallel.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    pub fn with_tool_error_policy(mut self, policy: ToolErrorPolicy) -> Self {
        self.tool_error_policy = policy;
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_session(mut self, session: Arc<dyn Session>) -> Self {
        self.session = Some(session);
        self
    }
}

/// What the active agent's response asks for.
enum NextStep {
    FinalOutput {
        content: String,
    },
    RunTools {
        message: Option<String>,
        calls: Vec<ToolCallRequest>,
    },
    Handoff {
        message: Option<String>,
        call: ToolCallRequest,
        target: String,
    },
}

/// Mutable state of one run.
struct RunState {
    run_id: String,
    history: Vec<ConversationItem>,
    input_len: usize,
    current: String,
    final_output: Value,
    usage: UsageStats,
    turns: usize,
    input_checks: Vec<GuardrailCheck>,
    output_checks: Vec<GuardrailCheck>,
    events: Option<EventSender>,
}

impl RunState {
    fn new(run_id: String, start: &str, events: Option<EventSender>) -> Self {
        Self {
            run_id,
            history: Vec::new(),
            input_len: 0,
            current: start.to_string(),
            final_output: Value::Null,
            usage: UsageStats::new(),
            turns: 0,
            input_checks: Vec::new(),
            output_checks: Vec::new(),
            events,
        }
    }

    fn push(&mut self, item: ConversationItem) {
        self.emit(RunEvent::ItemAppended(item.clone()));
        self.history.push(item);
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn snapshot(&self) -> RunResult {
        RunResult {
            run_id: self.run_id.clone(),
            history: self.history.clone(),
            input_len: self.input_len,
            final_output: self.final_output.clone(),
            last_agent: self.current.clone(),
            usage: self.usage.clone(),
            turns: self.turns,
            input_guardrail_results: self.input_checks.clone(),
            output_guardrail_results: self.output_checks.clone(),
        }
    }
}

/// Executes agents from an [`AgentGraph`] against one model backend.
///
/// The runner is cheap to clone and can drive many runs concurrently. Runs
/// share nothing but the graph, the backend, and whatever the caller puts in
/// the [`RunContext`].
pub struct Runner<C = ()> {
    graph: AgentGraph<C>,
    model: Arc<SharedService<ModelSvc>>,
    streaming: Option<Arc<dyn StreamingModel>>,
    config: RunConfig,
}

impl<C> Clone for Runner<C> {
    fn clone(&self) -> Self {
        Self {
            graph: self.graph.clone(),
            model: self.model.clone(),
            streaming: self.streaming.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C> std::fmt::Debug for Runner<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("graph", &self.graph)
            .field("streaming", &self.streaming.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl<C> Runner<C> {
    pub fn new(graph: AgentGraph<C>, model: ModelSvc) -> Self {
        Self {
            graph,
            model: Arc::new(SharedService::new(model)),
            streaming: None,
            config: RunConfig::default(),
        }
    }

    /// Runner over a single agent.
    pub fn for_agent(agent: Agent<C>, model: ModelSvc) -> Result<Self> {
        Ok(Self::new(AgentGraph::single(agent)?, model))
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Backend used for [`run_streamed`](Self::run_streamed). Without one,
    /// streamed runs call the regular backend and emit each response as a
    /// single delta.
    pub fn with_streaming_model(mut self, model: Arc<dyn StreamingModel>) -> Self {
        self.streaming = Some(model);
        self
    }

    /// Wraps the model backend with a Tower layer (timeouts, rate limits, ...).
    pub fn layer_model<L>(mut self, layer: L) -> Self
    where
        L: tower::Layer<ModelSvc>,
        L::Service: tower::Service<ModelRequest, Response = ModelResponse, Error = BoxError>
            + Clone
            + Send
            + 'static,
        <L::Service as tower::Service<ModelRequest>>::Future: Send + 'static,
    {
        let wrapped = ModelSvc::new(layer.layer(self.model.get()));
        self.model = Arc::new(SharedService::new(wrapped));
        self
    }

    pub fn graph(&self) -> &AgentGraph<C> {
        &self.graph
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }
}

impl<C: Send + Sync + 'static> Runner<C> {
    /// Runs the workflow starting at agent `start` until an agent produces a
    /// final output or the run fails.
    pub async fn run(
        &self,
        start: &str,
        input: impl Into<RunInput>,
        context: &RunContext<C>,
    ) -> std::result::Result<RunResult, RunError> {
        let input = input.into().into_items();
        let run_id = Uuid::new_v4().to_string();
        self.execute(run_id, start, input, context, None).await
    }

    /// Executes a run and blocks until the result is available.
    ///
    /// Creates a new Tokio runtime; must not be called from within one.
    pub fn run_sync(
        &self,
        start: &str,
        input: impl Into<RunInput>,
        context: &RunContext<C>,
    ) -> std::result::Result<RunResult, RunError> {
        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| RunError::new(AgentsError::Io(e), RunResult::empty(start)))?;
        runtime.block_on(self.run(start, input, context))
    }

    /// Runs in a background task and returns a stream of [`RunEvent`]s.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn run_streamed(
        &self,
        start: &str,
        input: impl Into<RunInput>,
        context: &RunContext<C>,
    ) -> StreamingRun {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let run_id = Uuid::new_v4().to_string();
        let runner = self.clone();
        let start = start.to_string();
        let input = input.into().into_items();
        let context = context.clone();
        let id = run_id.clone();

        let handle = tokio::spawn(async move {
            let outcome = runner
                .execute(id, &start, input, &context, Some(tx.clone()))
                .await;
            let terminal = match &outcome {
                Ok(result) => RunEvent::Completed(Box::new(result.clone())),
                Err(err) => RunEvent::Failed {
                    error: err.to_string(),
                },
            };
            let _ = tx.send(terminal);
            outcome
        });
        StreamingRun::new(run_id, rx, handle)
    }

    /// Exposes agent `agent` as a tool. The tool takes `{"input": "..."}`,
    /// runs a nested workflow with the caller's context, and returns that
    /// run's final output. Nothing from the nested history leaks into the
    /// caller's history.
    pub fn as_tool(
        &self,
        agent: &str,
        tool_name: impl Into<String>,
        description: impl Into<String>,
    ) -> ToolDef<C> {
        let runner = self.clone();
        let agent = agent.to_string();
        let handler: ToolHandler<C> = Arc::new(move |args: Value, ctx: RunContext<C>| {
            let runner = runner.clone();
            let agent = agent.clone();
            Box::pin(async move {
                let input = args
                    .get("input")
                    .and_then(Value::as_str)
                    .ok_or("missing string field 'input'")?
                    .to_string();
                let result = runner.run(&agent, input, &ctx).await?;
                Ok(result.final_output)
            })
        });
        ToolDef::from_handler(
            tool_name,
            description,
            json!({
                "type": "object",
                "properties": {
                    "input": {"type": "string", "description": "The input for the agent"}
                },
                "required": ["input"],
                "additionalProperties": false
            }),
            handler,
        )
    }

    async fn execute(
        &self,
        run_id: String,
        start: &str,
        input: Vec<ConversationItem>,
        context: &RunContext<C>,
        events: Option<EventSender>,
    ) -> std::result::Result<RunResult, RunError> {
        let span = info_span!("run", run_id = %run_id, agent = %start);
        async move {
            info!(input_items = input.len(), "Starting agent run");
            let mut state = RunState::new(run_id, start, events);

            if let Some(session) = &self.config.session {
                match session.get_items(None).await {
                    Ok(stored) => state.history = stored,
                    Err(err) => return Err(RunError::new(err, state.snapshot())),
                }
            }
            state.history.extend(input.iter().cloned());
            state.input_len = state.history.len();

            if let Err(err) = self.run_loop(&mut state, &input, context).await {
                warn!(error = %err, turns = state.turns, agent = %state.current, "Run failed");
                return Err(RunError::new(err, state.snapshot()));
            }

            if let Some(session) = &self.config.session {
                let mut to_store = input;
                to_store.extend(state.history[state.input_len..].iter().cloned());
                if let Err(err) = session.add_items(to_store).await {
                    return Err(RunError::new(err, state.snapshot()));
                }
            }

            debug!("Run history:\n{}", ItemHelpers::transcript(&state.history));
            debug!("Run usage:\n{}", state.usage.summary());
            info!(turns = state.turns, agent = %state.current, "Run completed");
            Ok(state.snapshot())
        }
        .instrument(span)
        .await
    }

    /// The turn loop. Every recorded item is already in `state` when an error is returned.
    async fn run_loop(
        &self,
        state: &mut RunState,
        input: &[ConversationItem],
        context: &RunContext<C>,
    ) -> Result<()> {
        let mut agent = self.graph.resolve(&state.current)?;
        state.emit(RunEvent::AgentStarted {
            agent: agent.name().to_string(),
        });

        if !agent.input_guardrails().is_empty() {
            let checks =
                GuardrailEngine::evaluate_input(agent.input_guardrails(), input, context).await;
            let tripped = GuardrailEngine::first_trip(&checks).map(|c| c.to_error(None));
            state.input_checks = checks;
            if let Some(err) = tripped {
                return Err(err);
            }
        }

        // Filtered history handed to the current agent, and where its unfiltered tail starts.
        let mut handed_over: Option<(Vec<ConversationItem>, usize)> = None;
        loop {
            state.turns += 1;
            if state.turns > self.config.max_turns {
                state.turns -= 1;
                return Err(AgentsError::MaxTurnsExceeded {
                    max_turns: self.config.max_turns,
                });
            }
            debug!(turn = state.turns, agent = %agent.name(), "Starting turn");

            let history = match &handed_over {
                Some((prefix, from)) => prefix
                    .iter()
                    .chain(&state.history[*from..])
                    .cloned()
                    .collect(),
                None => state.history.clone(),
            };
            let request = self.build_request(&agent, history, context);
            let model_name = request
                .settings
                .model
                .clone()
                .unwrap_or_else(|| "default".to_string());
            let response = self.call_model(request, state).await?;
            state.usage.record(&model_name, agent.name(), response.usage.clone());
            debug!(
                turn = state.turns,
                tool_calls = response.tool_calls.len(),
                has_content = response.has_content(),
                "Model responded"
            );

            match classify(&agent, response, state.turns)? {
                NextStep::FinalOutput { content } => {
                    let output = agent.output_schema().parse(&content).map_err(|message| {
                        AgentsError::ModelBehavior {
                            message: format!("agent '{}': {}", agent.name(), message),
                        }
                    })?;

                    if !agent.output_guardrails().is_empty() {
                        let checks = GuardrailEngine::evaluate_output(
                            agent.output_guardrails(),
                            &output,
                            context,
                        )
                        .await;
                        let tripped = GuardrailEngine::first_trip(&checks)
                            .map(|c| c.to_error(Some(output.clone())));
                        state.output_checks.extend(checks);
                        if let Some(err) = tripped {
                            return Err(err);
                        }
                    }

                    state.push(ConversationItem::agent_output(agent.name(), output.clone()));
                    state.final_output = output;
                    return Ok(());
                }

                NextStep::RunTools { message, calls } => {
                    if let Some(text) = message {
                        state.push(ConversationItem::agent_text(agent.name(), text));
                    }
                    for call in &calls {
                        state.push(tool_call_item(agent.name(), call));
                    }

                    let outcomes = self.execute_tools(&agent, &calls, context).await;

                    let mut fatal = None;
                    for (call, outcome) in calls.iter().zip(outcomes) {
                        match outcome {
                            Ok(output) => state.push(ConversationItem::ToolResult {
                                call_id: call.id.clone(),
                                name: call.name.clone(),
                                output,
                                error: None,
                            }),
                            Err(err) => {
                                warn!(tool = %call.name, call_id = %call.id, error = %err, "Tool call failed");
                                state.push(ConversationItem::ToolResult {
                                    call_id: call.id.clone(),
                                    name: call.name.clone(),
                                    output: Value::Null,
                                    error: Some(err.to_string()),
                                });
                                if self.config.tool_error_policy == ToolErrorPolicy::Fatal
                                    && fatal.is_none()
                                {
                                    fatal = Some(err);
                                }
                            }
                        }
                    }
                    if let Some(err) = fatal {
                        return Err(AgentsError::ToolExecution(err));
                    }
                }

                NextStep::Handoff {
                    message,
                    call,
                    target,
                } => {
                    if let Some(text) = message {
                        state.push(ConversationItem::agent_text(agent.name(), text));
                    }
                    let next = self.graph.resolve(&target)?;
                    let record = HandoffRouter::transfer(
                        &agent,
                        &call.name,
                        &next,
                        context,
                        call.arguments.clone(),
                    )
                    .await?;

                    state.push(tool_call_item(agent.name(), &call));
                    state.push(ConversationItem::ToolResult {
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        output: json!({ "assistant": next.name() }),
                        error: None,
                    });
                    state.push(record);
                    state.emit(RunEvent::Handoff {
                        source: agent.name().to_string(),
                        target: next.name().to_string(),
                    });

                    handed_over = agent
                        .handoff_for_tool(&call.name)
                        .and_then(|h| h.input_filter())
                        .map(|filter| (filter(state.history.as_slice()), state.history.len()));
                    state.current = next.name().to_string();
                    agent = next;
                    state.emit(RunEvent::AgentStarted {
                        agent: agent.name().to_string(),
                    });
                }
            }
        }
    }

    fn build_request(
        &self,
        agent: &Agent<C>,
        history: Vec<ConversationItem>,
        context: &RunContext<C>,
    ) -> ModelRequest {
        let mut tools: Vec<_> = agent.tools().iter().map(ToolDef::spec).collect();
        tools.extend(agent.handoffs().iter().map(|h| {
            let target_description = self
                .graph
                .get(h.target())
                .and_then(|target| target.handoff_description());
            h.spec(target_description)
        }));

        let mut settings = agent.settings().clone();
        if settings.model.is_none() {
            settings.model = self.config.default_model.clone();
        }

        ModelRequest {
            agent: agent.name().to_string(),
            instructions: agent.render_instructions(context),
            output_schema: agent.output_schema().json_schema().cloned(),
            tools,
            history,
            settings,
        }
    }

    async fn call_model(&self, request: ModelRequest, state: &RunState) -> Result<ModelResponse> {
        let agent = request.agent.clone();
        match (&self.streaming, &state.events) {
            (Some(streaming), Some(tx)) => {
                let chunks = streaming
                    .stream(request)
                    .await
                    .map_err(|e| AgentsError::Model(e.to_string()))?;
                collect_chunks(chunks, |delta| {
                    let _ = tx.send(RunEvent::TextDelta {
                        agent: agent.clone(),
                        delta: delta.to_string(),
                    });
                })
                .await
                .map_err(|e| AgentsError::Model(e.to_string()))
            }
            _ => {
                let response = self
                    .model
                    .get()
                    .oneshot(request)
                    .await
                    .map_err(|e| AgentsError::Model(e.to_string()))?;
                if let Some(content) = response.content.as_ref().filter(|c| !c.is_empty()) {
                    state.emit(RunEvent::TextDelta {
                        agent,
                        delta: content.clone(),
                    });
                }
                Ok(response)
            }
        }
    }

    /// Executes one turn's tool calls. Outcomes are returned in call order
    /// regardless of completion order.
    async fn execute_tools(
        &self,
        agent: &Agent<C>,
        calls: &[ToolCallRequest],
        context: &RunContext<C>,
    ) -> Vec<std::result::Result<Value, ToolExecutionError>> {
        let router = agent.tool_router();
        let limiter = self
            .config
            .max_concurrency
            .map(|n| Arc::new(Semaphore::new(n.max(1))));

        let run_one = |call: &ToolCallRequest| {
            let router = router.clone();
            let limiter = limiter.clone();
            let invocation = ToolInvocation {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                context: context.clone(),
            };
            let span = info_span!("tool", name = %call.name, call_id = %call.id);
            async move {
                let _permit = match limiter {
                    Some(sem) => sem.acquire_owned().await.ok(),
                    None => None,
                };
                router.invoke(invocation).await.map(|out| out.result)
            }
            .instrument(span)
        };

        if self.config.parallel_tools {
            join_all(calls.iter().map(&run_one)).await
        } else {
            let mut outcomes = Vec::with_capacity(calls.len());
            for call in calls {
                outcomes.push(run_one(call).await);
            }
            outcomes
        }
    }
}

fn tool_call_item(agent: &str, call: &ToolCallRequest) -> ConversationItem {
    ConversationItem::ToolCall {
        call_id: call.id.clone(),
        agent: agent.to_string(),
        name: call.name.clone(),
        arguments: call.arguments.clone(),
    }
}

fn classify<C>(agent: &Agent<C>, response: ModelResponse, turn: usize) -> Result<NextStep> {
    let ModelResponse {
        content,
        tool_calls,
        ..
    } = response;
    let message = content.filter(|c| !c.is_empty());

    let mut calls = tool_calls;
    for (index, call) in calls.iter_mut().enumerate() {
        if call.id.is_empty() {
            call.id = format!("call_{}_{}", turn, index);
        }
    }

    if let Some(position) = calls
        .iter()
        .position(|c| agent.handoff_for_tool(&c.name).is_some())
    {
        let dropped = calls.len() - 1;
        let call = calls.swap_remove(position);
        let target = agent
            .handoff_for_tool(&call.name)
            .map(|h| h.target().to_string())
            .unwrap_or_default();
        if dropped > 0 {
            debug!(dropped, target = %target, "Handoff pre-empts other tool calls");
        }
        return Ok(NextStep::Handoff {
            message,
            call,
            target,
        });
    }

    if !calls.is_empty() {
        return Ok(NextStep::RunTools { message, calls });
    }

    match message {
        Some(content) => Ok(NextStep::FinalOutput { content }),
        None => Err(AgentsError::ModelBehavior {
            message: format!(
                "agent '{}' returned neither output nor tool calls",
                agent.name()
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::Handoff;
    use crate::model::ScriptedModel;
    use crate::tool::{tool_fn, tool_typed, tool_with_context};
    use pretty_assertions::assert_eq;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct AddArgs {
        a: i64,
        b: i64,
    }

    fn ctx() -> RunContext<()> {
        RunContext::new(())
    }

    fn calculator() -> ToolDef<()> {
        tool_typed("add", "Add two numbers", |args: AddArgs| async move {
            Ok::<_, BoxError>(json!(args.a + args.b))
        })
    }

    #[tokio::test]
    async fn test_simple_run() {
        let model = ScriptedModel::new().respond("echo", ModelResponse::text("hello"));
        let runner = Runner::for_agent(Agent::new("echo", "Echo."), model.clone().into_service()).unwrap();

        let result = runner.run("echo", "hello", &ctx()).await.unwrap();
        assert_eq!(result.final_output, json!("hello"));
        assert_eq!(result.turns, 1);
        assert_eq!(
            result.history,
            vec![
                ConversationItem::user("hello"),
                ConversationItem::agent_text("echo", "hello"),
            ]
        );
        assert_eq!(model.requests()[0].instructions, "Echo.");
    }

    #[tokio::test]
    async fn test_run_with_tools() {
        let model = ScriptedModel::new()
            .respond("calc", ModelResponse::tool_call("add", json!({"a": 2, "b": 3})))
            .respond("calc", ModelResponse::text("5"));
        let agent: Agent = Agent::new("calc", "Add.").with_tool(calculator());
        let runner = Runner::for_agent(agent, model.clone().into_service()).unwrap();

        let result = runner.run("calc", "2+3?", &ctx()).await.unwrap();
        assert_eq!(result.turns, 2);
        assert_eq!(
            result.new_items()[1],
            ConversationItem::ToolResult {
                call_id: "call_1_0".into(),
                name: "add".into(),
                output: json!(5),
                error: None,
            }
        );
        // second request sees the tool result
        assert_eq!(model.requests()[1].history.len(), 3);
        assert!(model.requests()[0].has_tool("add"));
    }

    #[tokio::test]
    async fn test_parallel_tool_calls_preserve_order() {
        let slow = tool_with_context::<(), serde_json::Map<String, Value>, _, _, _>(
            "wait",
            "Sleeps",
            |args, _ctx| async move {
                let tag = args.get("tag").cloned().unwrap_or_default();
                let delay = if tag == json!("first") { 60 } else { 5 };
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok::<_, BoxError>(tag)
            },
        );
        let model = ScriptedModel::new()
            .respond(
                "fan",
                ModelResponse::tool_calls(vec![
                    ToolCallRequest::new("wait", json!({"tag": "first"})),
                    ToolCallRequest::new("wait", json!({"tag": "second"})),
                ]),
            )
            .respond("fan", ModelResponse::text("done"));
        let agent: Agent = Agent::new("fan", "Fan out.").with_tool(slow);
        let runner = Runner::for_agent(agent, model.into_service()).unwrap();

        let result = runner.run("fan", "go", &ctx()).await.unwrap();
        let outputs: Vec<_> = ItemHelpers::tool_results(&result.history)
            .into_iter()
            .map(|(id, out, _)| (id.to_string(), out.clone()))
            .collect();
        assert_eq!(
            outputs,
            vec![
                ("call_1_0".to_string(), json!("first")),
                ("call_1_1".to_string(), json!("second")),
            ]
        );
    }

    #[tokio::test]
    async fn test_max_concurrency_limits_parallel_execution() {
        static ACTIVE: AtomicUsize = AtomicUsize::new(0);
        static MAX_OBSERVED: AtomicUsize = AtomicUsize::new(0);

        let block = tool_typed::<(), serde_json::Map<String, Value>, _, _, _>(
            "block",
            "Blocks briefly",
            |_args| async move {
                let current = ACTIVE.fetch_add(1, Ordering::SeqCst) + 1;
                MAX_OBSERVED.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                ACTIVE.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, BoxError>("ok")
            },
        );
        let calls = (0..4).map(|_| ToolCallRequest::new("block", json!({}))).collect();
        let model = ScriptedModel::new()
            .respond("limiter", ModelResponse::tool_calls(calls))
            .respond("limiter", ModelResponse::text("done"));
        let runner = Runner::for_agent(Agent::new("limiter", "Use tools").with_tool(block), model.into_service())
            .unwrap()
            .with_config(RunConfig::default().with_max_concurrency(2));

        runner.run("limiter", "Run", &ctx()).await.unwrap();
        let max_seen = MAX_OBSERVED.load(Ordering::SeqCst);
        assert!(max_seen <= 2, "expected max concurrency <= 2, got {}", max_seen);
    }

    #[tokio::test]
    async fn test_tool_error_is_reported_to_model() {
        let model = ScriptedModel::new()
            .respond("calc", ModelResponse::tool_call("add", json!({"a": "two"})))
            .respond("calc", ModelResponse::tool_call("missing", json!({})))
            .respond("calc", ModelResponse::text("gave up"));
        let agent: Agent = Agent::new("calc", "Add.").with_tool(calculator());
        let runner = Runner::for_agent(agent, model.into_service()).unwrap();

        let result = runner.run("calc", "x", &ctx()).await.unwrap();
        let errors: Vec<_> = ItemHelpers::tool_results(&result.history)
            .into_iter()
            .map(|(_, _, err)| err.unwrap_or_default().to_string())
            .collect();
        assert!(errors[0].contains("rejected its arguments"), "{}", errors[0]);
        assert!(errors[1].contains("is not available"), "{}", errors[1]);
        assert_eq!(result.final_text(), Some("gave up"));
    }

    #[tokio::test]
    async fn test_fatal_tool_policy_aborts_after_recording() {
        let failing = tool_fn::<(), _>("explode", "Fails", json!({"type": "object"}), |_| {
            Err("boom".into())
        });
        let model = ScriptedModel::new()
            .respond("ops", ModelResponse::tool_call("explode", json!({})));
        let runner = Runner::for_agent(Agent::new("ops", "Run ops.").with_tool(failing), model.into_service())
            .unwrap()
            .with_config(RunConfig::default().with_tool_error_policy(ToolErrorPolicy::Fatal));

        let err = runner.run("ops", "go", &ctx()).await.unwrap_err();
        assert!(matches!(err.error(), AgentsError::ToolExecution(_)));
        let last = err.partial().history.last().unwrap();
        assert!(matches!(last, ConversationItem::ToolResult { error: Some(_), .. }));
    }

    #[tokio::test]
    async fn test_handoff_short_circuits_other_tool_calls() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let counted = tool_fn::<(), _>("count", "Counts", json!({"type": "object"}), |_| {
            CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(json!(null))
        });
        let graph = AgentGraph::new([
            Agent::new("triage", "Route.")
                .with_tool(counted)
                .with_handoff(Handoff::to("french")),
            Agent::new("french", "Parle."),
        ])
        .unwrap();
        let model = ScriptedModel::new()
            .respond(
                "triage",
                ModelResponse::tool_calls(vec![
                    ToolCallRequest::new("count", json!({})),
                    ToolCallRequest::new("transfer_to_french", json!({})),
                ]),
            )
            .respond("french", ModelResponse::text("Bonjour"));
        let runner = Runner::new(graph, model.clone().into_service());

        let result = runner.run("triage", "Bonjour", &ctx()).await.unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);
        assert_eq!(result.last_agent, "french");
        assert_eq!(result.handoffs(), vec![("triage", "french")]);
        assert_eq!(
            result.new_items()[..3],
            [
                ConversationItem::ToolCall {
                    call_id: "call_1_1".into(),
                    agent: "triage".into(),
                    name: "transfer_to_french".into(),
                    arguments: json!({}),
                },
                ConversationItem::ToolResult {
                    call_id: "call_1_1".into(),
                    name: "transfer_to_french".into(),
                    output: json!({"assistant": "french"}),
                    error: None,
                },
                ConversationItem::handoff("triage", "french"),
            ]
        );
        assert!(model.requests()[0].has_tool("transfer_to_french"));
    }

    #[tokio::test]
    async fn test_input_filter_hides_tool_items_from_target() {
        let lookup = tool_fn("lookup", "Find the invoice", json!({}), |_| Ok(json!("INV-7")));
        let graph = AgentGraph::new([
            Agent::new("triage", "Route.").with_handoff(
                Handoff::to("billing").with_input_filter(ItemHelpers::without_tool_items),
            ),
            Agent::new("billing", "Bill.").with_tool(lookup),
        ])
        .unwrap();
        let model = ScriptedModel::new()
            .respond("triage", ModelResponse::tool_call("transfer_to_billing", json!({})))
            .respond("billing", ModelResponse::tool_call("lookup", json!({})))
            .respond("billing", ModelResponse::text("Invoice sent"));
        let runner = Runner::new(graph, model.clone().into_service());

        let result = runner.run("triage", "invoice?", &ctx()).await.unwrap();
        let requests = model.requests_for("billing");
        assert!(requests[0].history.iter().all(|item| !item.is_tool_item()));

        // the filter applies once at handoff; billing still sees its own tool turn
        let second = &requests[1].history;
        assert!(!second.iter().any(|item| matches!(
            item,
            ConversationItem::ToolCall { name, .. } if name == "transfer_to_billing"
        )));
        assert!(second.iter().any(|item| matches!(
            item,
            ConversationItem::ToolResult { name, output, .. } if name == "lookup" && output == &json!("INV-7")
        )));
        assert_eq!(result.final_text(), Some("Invoice sent"));
        // recorded history keeps everything
        assert_eq!(ItemHelpers::tool_results(&result.history).len(), 2);
    }

    #[tokio::test]
    async fn test_handoff_runs_hook_of_the_called_tool() {
        let window = Arc::new(AtomicUsize::new(0));
        let aisle = Arc::new(AtomicUsize::new(0));
        let (w, a) = (window.clone(), aisle.clone());
        let graph = AgentGraph::new([
            Agent::new("triage", "Route.")
                .with_handoff(Handoff::to("seats").with_tool_name("book_window").on_handoff(
                    move |_ctx: RunContext<()>, _args| {
                        w.fetch_add(1, Ordering::SeqCst);
                        async { Ok(()) }
                    },
                ))
                .with_handoff(Handoff::to("seats").with_tool_name("book_aisle").on_handoff(
                    move |_ctx: RunContext<()>, _args| {
                        a.fetch_add(1, Ordering::SeqCst);
                        async { Ok(()) }
                    },
                )),
            Agent::new("seats", "Book."),
        ])
        .unwrap();
        let model = ScriptedModel::new()
            .respond("triage", ModelResponse::tool_call("book_aisle", json!({})))
            .respond("seats", ModelResponse::text("Seat 14C booked"));
        let runner = Runner::new(graph, model.into_service());

        let result = runner.run("triage", "aisle please", &ctx()).await.unwrap();
        assert_eq!(result.last_agent, "seats");
        assert_eq!(window.load(Ordering::SeqCst), 0);
        assert_eq!(aisle.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_max_turns_exceeded() {
        let model = ScriptedModel::new();
        for _ in 0..5 {
            model.push("loop", ModelResponse::tool_call("add", json!({"a": 1, "b": 1})));
        }
        let agent: Agent = Agent::new("loop", "Loop.").with_tool(calculator());
        let runner = Runner::for_agent(agent, model.into_service())
            .unwrap()
            .with_config(RunConfig::default().with_max_turns(3));

        let err = runner.run("loop", "spin", &ctx()).await.unwrap_err();
        assert!(matches!(err.error(), AgentsError::MaxTurnsExceeded { max_turns: 3 }));
        assert_eq!(err.partial().turns, 3);
        assert_eq!(ItemHelpers::tool_results(&err.partial().history).len(), 3);
    }

    #[tokio::test]
    async fn test_empty_response_is_model_behavior_error() {
        let model = ScriptedModel::new().respond("mute", ModelResponse::default());
        let runner = Runner::for_agent(Agent::new("mute", "..."), model.into_service()).unwrap();
        let err = runner.run("mute", "hi", &ctx()).await.unwrap_err();
        assert!(matches!(err.error(), AgentsError::ModelBehavior { .. }));
    }

    #[tokio::test]
    async fn test_blank_content_is_model_behavior_error() {
        let model = ScriptedModel::new().respond("mute", ModelResponse::text(""));
        let runner = Runner::for_agent(Agent::new("mute", "..."), model.into_service()).unwrap();
        let err = runner.run("mute", "hi", &ctx()).await.unwrap_err();
        assert!(matches!(err.error(), AgentsError::ModelBehavior { .. }));
        assert_eq!(err.partial().history, vec![ConversationItem::user("hi")]);
    }

    #[tokio::test]
    async fn test_unknown_start_agent() {
        let runner = Runner::for_agent(Agent::new("a", "."), ScriptedModel::new().into_service()).unwrap();
        let err = runner.run("b", "hi", &ctx()).await.unwrap_err();
        assert!(matches!(err.error(), AgentsError::UnknownAgent(_)));
        assert_eq!(err.partial().history, vec![ConversationItem::user("hi")]);
    }

    #[tokio::test]
    async fn test_model_layer_applies() {
        let model = model_with_delay();
        let runner = Runner::for_agent(Agent::new("slow", "."), model)
            .unwrap()
            .layer_model(tower::timeout::TimeoutLayer::new(Duration::from_millis(10)));
        let err = runner.run("slow", "hi", &ctx()).await.unwrap_err();
        assert!(matches!(err.error(), AgentsError::Model(_)));
    }

    fn model_with_delay() -> ModelSvc {
        crate::model::model_fn(|_req: ModelRequest| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(ModelResponse::text("late"))
        })
    }

    #[test]
    fn test_run_sync() {
        let model = ScriptedModel::new().respond("sync", ModelResponse::text("ok"));
        let runner = Runner::for_agent(Agent::new("sync", "."), model.into_service()).unwrap();
        let result = runner.run_sync("sync", "hi", &ctx()).unwrap();
        assert_eq!(result.final_text(), Some("ok"));
    }
}
