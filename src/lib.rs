//! # tower-agents
//!
//! A Tower-based runtime for multi-agent workflows. Agents call tools, hand
//! control to each other, and are checked by guardrails, while a [`Runner`]
//! drives the turn loop against any model backend that implements
//! `Service<ModelRequest>`.
//!
//! ## Core Concepts
//!
//! - **Agent**: instructions, tools, declared handoffs, guardrails, and an output contract
//! - **Tools**: Tower services with a JSON schema, usually built from typed handlers
//! - **Handoffs**: named edges between agents, advertised to the model as tools
//! - **Guardrails**: concurrent checks over the input and the final output that can abort a run
//! - **Context**: one caller-owned value shared by every tool, hook, and guardrail of a run
//! - **Runner**: executes an [`AgentGraph`] and records one ordered history
//!
//! ## Getting Started
//!
//! ```rust
//! use tower_agents::model::{ModelResponse, ScriptedModel};
//! use tower_agents::{tool_typed, Agent, RunContext, Runner};
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize, JsonSchema)]
//! struct AddArgs {
//!     a: f64,
//!     b: f64,
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let calculator = tool_typed("add", "Add two numbers", |args: AddArgs| async move {
//!     Ok::<_, tower::BoxError>(serde_json::json!({ "sum": args.a + args.b }))
//! });
//! let agent = Agent::new("math", "You are a helpful math assistant").with_tool(calculator);
//!
//! // A scripted backend stands in for a real model.
//! let model = ScriptedModel::new()
//!     .respond("math", ModelResponse::tool_call("add", serde_json::json!({"a": 2, "b": 2})))
//!     .respond("math", ModelResponse::text("2 + 2 = 4"));
//!
//! let runner = Runner::for_agent(agent, model.into_service())?;
//! let result = runner.run("math", "What is 2 + 2?", &RunContext::new(())).await?;
//! assert_eq!(result.final_text(), Some("2 + 2 = 4"));
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod guardrail;
pub mod handoff;
pub mod items;
pub mod logging;
pub mod memory;
pub mod model;
pub mod result;
pub mod runner;
pub mod schema;
pub mod sqlite_session;
pub mod streaming;
pub mod tool;
pub mod usage;

mod shared;

// Public re-exports for convenience
pub use agent::{Agent, OutputSchema};
pub use config::{ConfigBuilder, RuntimeConfig};
pub use context::RunContext;
pub use error::{AgentsError, Checkpoint, Result, RunError};
pub use graph::AgentGraph;
pub use guardrail::{
    input_guardrail_fn, output_guardrail_fn, AgentGuardrail, GuardrailVerdict, InputGuardrail,
    OutputGuardrail,
};
pub use handoff::Handoff;
pub use items::{ConversationItem, ItemHelpers, RunInput};
pub use memory::{MemorySession, Session};
pub use model::{ModelRequest, ModelResponse, ModelSvc};
pub use result::RunResult;
pub use runner::{RunConfig, Runner};
pub use sqlite_session::SqliteSession;
pub use streaming::{RunEvent, StreamingRun};
pub use tool::{tool_fn, tool_typed, tool_with_context, ToolDef, ToolErrorPolicy};
pub use usage::{Usage, UsageStats};

pub use tower_agents_derive::{agent_output, tool_args};

// Re-export Tower traits that users need
pub use tower::{BoxError, Layer, Service, ServiceExt};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_imports() {
        let _ = std::mem::size_of::<AgentsError>();
        let _ = std::mem::size_of::<Runner>();
    }
}
