//! # Tools
//!
//! A tool is a Tower service over [`ToolInvocation`] plus the metadata the
//! model needs to call it: name, description and a JSON schema for the
//! arguments. Because the implementation is an ordinary boxed service, any
//! Tower layer (timeouts, concurrency limits, retries) can wrap a tool with
//! [`ToolDef::layer`].
//!
//! Arguments are checked against the declared schema before the service is
//! called; a mismatch yields a [`ToolExecutionError`] and the function never
//! runs. The shared [`RunContext`] travels inside every invocation so tools can
//! read and update run state.
//!
//! ```rust
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//! use tower_agents::{tool_typed, ToolDef};
//!
//! #[derive(Debug, Deserialize, JsonSchema)]
//! struct AddArgs {
//!     a: f64,
//!     b: f64,
//! }
//!
//! let add: ToolDef<()> = tool_typed("add", "Add two numbers", |args: AddArgs| async move {
//!     Ok(serde_json::json!({ "sum": args.a + args.b }))
//! });
//! assert_eq!(add.name(), "add");
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tower::util::BoxCloneService;
use tower::{BoxError, Layer, Service, ServiceExt};

use crate::context::RunContext;
use crate::schema;
use crate::shared::SharedService;

/// Uniform tool invocation passed to tool services.
pub struct ToolInvocation<C> {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    pub context: RunContext<C>,
}

impl<C> Clone for ToolInvocation<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments: self.arguments.clone(),
            context: self.context.clone(),
        }
    }
}

impl<C> fmt::Debug for ToolInvocation<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolInvocation")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .finish()
    }
}

/// Uniform tool output produced by tool services.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub id: String, // same as invocation.id
    pub result: Value,
}

/// Boxed tool service type alias.
pub type ToolSvc<C> = BoxCloneService<ToolInvocation<C>, ToolOutput, BoxError>;

/// Type-erased async tool body.
pub type ToolHandler<C> = Arc<
    dyn Fn(Value, RunContext<C>) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync,
>;

/// What the model is told about a callable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// What a runner does when a tool fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolErrorPolicy {
    /// Record the error as the tool's result and let the agent react.
    #[default]
    Recover,
    /// Abort the run with [`crate::AgentsError::ToolExecution`].
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorKind {
    UnknownTool,
    InvalidArguments,
    Failed,
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolErrorKind::UnknownTool => f.write_str("is not available"),
            ToolErrorKind::InvalidArguments => f.write_str("rejected its arguments"),
            ToolErrorKind::Failed => f.write_str("failed"),
        }
    }
}

/// A tool failure, captured without aborting the run.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("tool '{tool}' {kind}: {message}")]
pub struct ToolExecutionError {
    pub tool: String,
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolExecutionError {
    pub fn unknown(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            kind: ToolErrorKind::UnknownTool,
            message: "no tool with this name is attached to the agent".to_string(),
        }
    }

    pub fn invalid_arguments(tool: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            tool: tool.into(),
            kind: ToolErrorKind::InvalidArguments,
            message: message.to_string(),
        }
    }

    pub fn failed(tool: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            tool: tool.into(),
            kind: ToolErrorKind::Failed,
            message: message.to_string(),
        }
    }
}

/// Definition of a tool: model-facing spec + service implementation.
pub struct ToolDef<C> {
    name: String,
    description: String,
    parameters_schema: Value,
    service: SharedService<ToolSvc<C>>,
}

impl<C> Clone for ToolDef<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters_schema: self.parameters_schema.clone(),
            service: self.service.clone(),
        }
    }
}

impl<C> fmt::Debug for ToolDef<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDef")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

impl<C> ToolDef<C> {
    /// Wraps an existing tool service.
    pub fn from_service(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters_schema: Value,
        service: ToolSvc<C>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters_schema,
            service: SharedService::new(service),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters_schema(&self) -> &Value {
        &self.parameters_schema
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters_schema.clone(),
        }
    }

    /// A clone of the underlying service.
    pub fn service(&self) -> ToolSvc<C> {
        self.service.get()
    }

    /// Wraps the tool's service in a Tower layer.
    pub fn layer<L>(mut self, layer: L) -> Self
    where
        L: Layer<ToolSvc<C>>,
        L::Service: Service<ToolInvocation<C>, Response = ToolOutput, Error = BoxError>
            + Clone
            + Send
            + 'static,
        <L::Service as Service<ToolInvocation<C>>>::Future: Send + 'static,
    {
        let wrapped = layer.layer(self.service.get());
        self.service.replace(BoxCloneService::new(wrapped));
        self
    }

    /// Validates the arguments, then calls the service.
    pub async fn invoke(
        &self,
        call_id: impl Into<String>,
        arguments: Value,
        context: &RunContext<C>,
    ) -> Result<Value, ToolExecutionError> {
        let arguments = normalize_arguments(arguments);
        schema::validate(&self.parameters_schema, &arguments)
            .map_err(|violation| ToolExecutionError::invalid_arguments(&self.name, violation))?;

        let invocation = ToolInvocation {
            id: call_id.into(),
            name: self.name.clone(),
            arguments,
            context: context.clone(),
        };
        self.service
            .get()
            .oneshot(invocation)
            .await
            .map(|out| out.result)
            .map_err(|err| ToolExecutionError::failed(&self.name, err))
    }
}

impl<C: Send + Sync + 'static> ToolDef<C> {
    /// Create a tool definition from a handler that takes JSON args and the
    /// run context and returns JSON.
    pub fn from_handler(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters_schema: Value,
        handler: ToolHandler<C>,
    ) -> Self {
        let name = name.into();
        let expected = name.clone();
        let svc = tower::service_fn(move |inv: ToolInvocation<C>| {
            let handler = handler.clone();
            let expected = expected.clone();
            async move {
                if inv.name != expected {
                    return Err::<ToolOutput, BoxError>(
                        format!("routed to wrong tool: expected={}, got={}", expected, inv.name)
                            .into(),
                    );
                }
                let result = (handler)(inv.arguments, inv.context).await?;
                Ok(ToolOutput { id: inv.id, result })
            }
        });
        Self::from_service(
            name,
            description,
            parameters_schema,
            BoxCloneService::new(svc),
        )
    }
}

/// Models sometimes send arguments as a JSON-encoded string.
fn normalize_arguments(arguments: Value) -> Value {
    match arguments {
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => Value::String(raw),
        },
        Value::Null => Value::Object(Default::default()),
        other => other,
    }
}

/// DX sugar: create a tool from a typed handler.
/// - `A` is the input args struct (Deserialize + JsonSchema)
/// - `R` is the output type (Serialize)
pub fn tool_typed<C, A, H, Fut, R>(
    name: impl Into<String>,
    description: impl Into<String>,
    handler: H,
) -> ToolDef<C>
where
    C: Send + Sync + 'static,
    A: DeserializeOwned + JsonSchema + Send + 'static,
    R: Serialize + Send + 'static,
    H: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
{
    tool_with_context(name, description, move |args: A, _ctx: RunContext<C>| {
        handler(args)
    })
}

/// Like [`tool_typed`], but the handler also receives the run context.
pub fn tool_with_context<C, A, H, Fut, R>(
    name: impl Into<String>,
    description: impl Into<String>,
    handler: H,
) -> ToolDef<C>
where
    C: Send + Sync + 'static,
    A: DeserializeOwned + JsonSchema + Send + 'static,
    R: Serialize + Send + 'static,
    H: Fn(A, RunContext<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
{
    let params = schema::schema_for::<A>();
    let handler = Arc::new(handler);
    let erased: ToolHandler<C> = Arc::new(move |raw: Value, ctx: RunContext<C>| {
        let h = handler.clone();
        Box::pin(async move {
            let args: A = serde_json::from_value(raw)?;
            let out: R = (h.as_ref())(args, ctx).await?;
            Ok(serde_json::to_value(out)?)
        })
    });
    ToolDef::from_handler(name, description, params, erased)
}

/// Synchronous tool over raw JSON with an explicit schema.
pub fn tool_fn<C, F>(
    name: impl Into<String>,
    description: impl Into<String>,
    parameters_schema: Value,
    function: F,
) -> ToolDef<C>
where
    C: Send + Sync + 'static,
    F: Fn(Value) -> Result<Value, BoxError> + Send + Sync + 'static,
{
    let function = Arc::new(function);
    let erased: ToolHandler<C> = Arc::new(move |raw: Value, _ctx: RunContext<C>| {
        let out = (function.as_ref())(raw);
        Box::pin(async move { out })
    });
    ToolDef::from_handler(name, description, parameters_schema, erased)
}

/// Router over tools using a name → index table.
pub struct ToolRouter<C> {
    name_to_index: Arc<HashMap<String, usize>>,
    tools: Arc<Vec<ToolDef<C>>>,
}

impl<C> Clone for ToolRouter<C> {
    fn clone(&self) -> Self {
        Self {
            name_to_index: self.name_to_index.clone(),
            tools: self.tools.clone(),
        }
    }
}

impl<C> ToolRouter<C> {
    pub fn new(tools: &[ToolDef<C>]) -> Self {
        let name_to_index = tools
            .iter()
            .enumerate()
            .map(|(i, td)| (td.name.clone(), i))
            .collect();
        Self {
            name_to_index: Arc::new(name_to_index),
            tools: Arc::new(tools.to_vec()),
        }
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(ToolDef::spec).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    /// Dispatches by name; unknown names produce [`ToolErrorKind::UnknownTool`].
    pub async fn invoke(
        &self,
        invocation: ToolInvocation<C>,
    ) -> Result<ToolOutput, ToolExecutionError> {
        let tool = match self.name_to_index.get(invocation.name.as_str()) {
            Some(&idx) => &self.tools[idx],
            None => return Err(ToolExecutionError::unknown(invocation.name)),
        };
        let result = tool
            .invoke(invocation.id.clone(), invocation.arguments, &invocation.context)
            .await?;
        Ok(ToolOutput {
            id: invocation.id,
            result,
        })
    }
}

impl<C: Send + Sync + 'static> Service<ToolInvocation<C>> for ToolRouter<C> {
    type Response = ToolOutput;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness of the selected tool is awaited inside `call`.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ToolInvocation<C>) -> Self::Future {
        let router = self.clone();
        Box::pin(async move { router.invoke(req).await.map_err(BoxError::from) })
    }
}
