//! Model backend contract
//!
//! The runner talks to a language model through one Tower service:
//! `Service<ModelRequest, Response = ModelResponse, Error = BoxError>`, boxed as
//! [`ModelSvc`]. The wire protocol behind it is the backend's business. A
//! response is either final content, a list of tool calls (handoffs are tool
//! calls to the advertised `transfer_to_*` tools), or both.
//!
//! Two in-process backends ship with the crate:
//! - [`ScriptedModel`]: per-agent queues of canned responses; it also records
//!   every request it receives.
//! - [`model_fn`]: a closure over the request.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::util::BoxCloneService;
use tower::{BoxError, Service};

use crate::items::ConversationItem;
use crate::tool::ToolSpec;
use crate::usage::Usage;

/// Per-agent generation settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// May be empty; the runner then assigns a deterministic id.
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Everything the backend needs to produce the active agent's next output.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub agent: String,
    pub instructions: String,
    /// JSON schema of the structured output, `None` for plain text.
    pub output_schema: Option<Value>,
    /// Tools and handoff tools the agent may call.
    pub tools: Vec<ToolSpec>,
    pub history: Vec<ConversationItem>,
    pub settings: ModelSettings,
}

impl ModelRequest {
    /// Text of the most recent user message in the visible history.
    pub fn last_user_text(&self) -> Option<&str> {
        self.history.iter().rev().find_map(|item| match item {
            ConversationItem::UserMessage { content } => Some(content.as_str()),
            _ => None,
        })
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }
}

/// What the backend returned for one agent invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Usage,
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: vec![],
            usage: Usage::request(),
        }
    }

    /// Structured output, serialized the way a backend would return it.
    pub fn json(value: Value) -> Self {
        Self::text(value.to_string())
    }

    pub fn tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: None,
            tool_calls,
            usage: Usage::request(),
        }
    }

    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self::tool_calls(vec![ToolCallRequest::new(name, arguments)])
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn has_content(&self) -> bool {
        self.content.as_deref().map(|c| !c.is_empty()).unwrap_or(false)
    }
}

/// Boxed model backend.
pub type ModelSvc = BoxCloneService<ModelRequest, ModelResponse, BoxError>;

/// Builds a backend from an async closure over the request.
pub fn model_fn<F, Fut>(f: F) -> ModelSvc
where
    F: Fn(ModelRequest) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<ModelResponse, BoxError>> + Send + 'static,
{
    BoxCloneService::new(tower::service_fn(f))
}

#[derive(Debug, Default)]
struct Script {
    queues: HashMap<String, VecDeque<ModelResponse>>,
    requests: Vec<ModelRequest>,
}

/// Deterministic backend replaying canned responses per agent, in order.
///
/// ```rust
/// use tower_agents::model::{ModelResponse, ScriptedModel};
///
/// let model = ScriptedModel::new()
///     .respond("triage", ModelResponse::tool_call("transfer_to_french", serde_json::json!({})))
///     .respond("french", ModelResponse::text("Bonjour !"));
/// assert_eq!(model.remaining("triage"), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScriptedModel {
    script: Arc<Mutex<Script>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `response` for the next invocation of `agent`.
    pub fn respond(self, agent: impl Into<String>, response: ModelResponse) -> Self {
        self.push(agent, response);
        self
    }

    pub fn push(&self, agent: impl Into<String>, response: ModelResponse) {
        self.lock()
            .queues
            .entry(agent.into())
            .or_default()
            .push_back(response);
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.lock().requests.clone()
    }

    pub fn requests_for(&self, agent: &str) -> Vec<ModelRequest> {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.agent == agent)
            .cloned()
            .collect()
    }

    pub fn remaining(&self, agent: &str) -> usize {
        self.lock().queues.get(agent).map(VecDeque::len).unwrap_or(0)
    }

    pub fn into_service(self) -> ModelSvc {
        BoxCloneService::new(self)
    }

    /// Pops the next response for the request's agent and records the request.
    pub fn next_response(&self, req: ModelRequest) -> Result<ModelResponse, BoxError> {
        let mut script = self.lock();
        let agent = req.agent.clone();
        script.requests.push(req);
        script
            .queues
            .get_mut(&agent)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| format!("no scripted response left for agent '{}'", agent).into())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Service<ModelRequest> for ScriptedModel {
    type Response = ModelResponse;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ModelRequest) -> Self::Future {
        let out = self.next_response(req);
        Box::pin(async move { out })
    }
}
