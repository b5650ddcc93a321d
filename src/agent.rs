//! # Agent (orientation)
//!
//! An `Agent` is a configured participant in a workflow: a name, instructions,
//! tools, declared handoffs, guardrails, and an output contract. Agents are
//! plain values. They do not hold a model; the [`Runner`](crate::runner::Runner)
//! owns the backend and drives every agent registered in its graph.
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use schemars::JsonSchema;
//! use tower_agents::{tool_fn, Agent, Handoff};
//!
//! #[derive(Serialize, Deserialize, JsonSchema)]
//! struct Verdict {
//!     score: String,
//!     feedback: String,
//! }
//!
//! let judge: Agent = Agent::new("judge", "Grade the outline.")
//!     .with_output_type::<Verdict>()
//!     .with_temperature(0.0);
//!
//! let writer: Agent = Agent::new("writer", "Write a story outline.")
//!     .with_tool(tool_fn("word_count", "Counts words", serde_json::json!({"type": "object"}), |v| {
//!         Ok(serde_json::json!(v.to_string().split_whitespace().count()))
//!     }))
//!     .with_handoff(Handoff::to("judge"));
//!
//! assert!(judge.output_schema().is_structured());
//! assert_eq!(writer.tools().len(), 1);
//! assert!(writer.can_hand_off_to("judge"));
//! ```

use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde_json::Value;

use crate::context::RunContext;
use crate::guardrail::{InputGuardrail, OutputGuardrail};
use crate::handoff::Handoff;
use crate::model::ModelSettings;
use crate::schema::{schema_for, validate};
use crate::tool::{ToolDef, ToolRouter};

/// Instructions rendered against the run context right before each model call.
pub type InstructionsFn<C> = Arc<dyn Fn(&RunContext<C>) -> String + Send + Sync>;

pub enum Instructions<C> {
    Static(String),
    Dynamic(InstructionsFn<C>),
}

impl<C> Instructions<C> {
    pub fn render(&self, context: &RunContext<C>) -> String {
        match self {
            Instructions::Static(text) => text.clone(),
            Instructions::Dynamic(f) => f(context),
        }
    }
}

impl<C> Clone for Instructions<C> {
    fn clone(&self) -> Self {
        match self {
            Instructions::Static(text) => Instructions::Static(text.clone()),
            Instructions::Dynamic(f) => Instructions::Dynamic(f.clone()),
        }
    }
}

impl<C> fmt::Debug for Instructions<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instructions::Static(text) => f.debug_tuple("Static").field(text).finish(),
            Instructions::Dynamic(_) => f.write_str("Dynamic(<fn>)"),
        }
    }
}

impl<C> From<&str> for Instructions<C> {
    fn from(text: &str) -> Self {
        Instructions::Static(text.to_string())
    }
}

impl<C> From<String> for Instructions<C> {
    fn from(text: String) -> Self {
        Instructions::Static(text)
    }
}

/// What an agent's final output must look like.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum OutputSchema {
    /// Free text, surfaced as a JSON string.
    #[default]
    Text,
    /// A JSON value conforming to `schema`.
    Json { name: String, schema: Value },
}

impl OutputSchema {
    /// Structured output described by a Rust type.
    pub fn typed<T: JsonSchema>() -> Self {
        OutputSchema::Json {
            name: T::schema_name(),
            schema: schema_for::<T>(),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, OutputSchema::Json { .. })
    }

    pub fn json_schema(&self) -> Option<&Value> {
        match self {
            OutputSchema::Text => None,
            OutputSchema::Json { schema, .. } => Some(schema),
        }
    }

    /// Turns raw model content into the agent's final output.
    ///
    /// Structured content may arrive wrapped in a Markdown code fence.
    pub fn parse(&self, raw: &str) -> Result<Value, String> {
        match self {
            OutputSchema::Text => Ok(Value::String(raw.to_string())),
            OutputSchema::Json { name, schema } => {
                let value: Value = serde_json::from_str(strip_code_fence(raw))
                    .map_err(|e| format!("output is not valid JSON for {}: {}", name, e))?;
                validate(schema, &value)
                    .map_err(|violation| format!("output does not match {}: {}", name, violation))?;
                Ok(value)
            }
        }
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
            body.trim_end().strip_suffix("```").unwrap_or(body).trim()
        }
        None => trimmed,
    }
}

/// Represents an AI agent that can use tools, hand off to other agents, and
/// produce text or structured output.
///
/// `C` is the type of the shared run context the agent's tools, hooks, and
/// guardrails see. Agents without a context use the default `()`.
pub struct Agent<C = ()> {
    name: String,
    instructions: Instructions<C>,
    handoff_description: Option<String>,
    output: OutputSchema,
    tools: Vec<ToolDef<C>>,
    handoffs: Vec<Handoff<C>>,
    input_guardrails: Vec<Arc<dyn InputGuardrail<C>>>,
    output_guardrails: Vec<Arc<dyn OutputGuardrail<C>>>,
    settings: ModelSettings,
}

impl<C> Clone for Agent<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            instructions: self.instructions.clone(),
            handoff_description: self.handoff_description.clone(),
            output: self.output.clone(),
            tools: self.tools.clone(),
            handoffs: self.handoffs.clone(),
            input_guardrails: self.input_guardrails.clone(),
            output_guardrails: self.output_guardrails.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<C> fmt::Debug for Agent<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("instructions", &self.instructions)
            .field("output", &self.output)
            .field(
                "tools",
                &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field(
                "handoffs",
                &self.handoffs.iter().map(|h| h.target()).collect::<Vec<_>>(),
            )
            .field("input_guardrails", &self.input_guardrails.len())
            .field("output_guardrails", &self.output_guardrails.len())
            .field("settings", &self.settings)
            .finish()
    }
}

impl<C> Agent<C> {
    pub fn new(name: impl Into<String>, instructions: impl Into<Instructions<C>>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            handoff_description: None,
            output: OutputSchema::Text,
            tools: Vec::new(),
            handoffs: Vec::new(),
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            settings: ModelSettings::default(),
        }
    }

    /// Instructions computed from the run context on every turn.
    pub fn with_dynamic_instructions<F>(mut self, f: F) -> Self
    where
        F: Fn(&RunContext<C>) -> String + Send + Sync + 'static,
    {
        self.instructions = Instructions::Dynamic(Arc::new(f));
        self
    }

    /// Shown to agents that can hand off to this one.
    pub fn with_handoff_description(mut self, description: impl Into<String>) -> Self {
        self.handoff_description = Some(description.into());
        self
    }

    /// Final output must deserialize as `T`.
    pub fn with_output_type<T: JsonSchema>(mut self) -> Self {
        self.output = OutputSchema::typed::<T>();
        self
    }

    pub fn with_output_schema(mut self, output: OutputSchema) -> Self {
        self.output = output;
        self
    }

    pub fn with_tool(mut self, tool: ToolDef<C>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = ToolDef<C>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn with_handoff(mut self, handoff: Handoff<C>) -> Self {
        self.handoffs.push(handoff);
        self
    }

    pub fn with_handoffs(mut self, handoffs: impl IntoIterator<Item = Handoff<C>>) -> Self {
        self.handoffs.extend(handoffs);
        self
    }

    pub fn with_input_guardrail(mut self, guardrail: Arc<dyn InputGuardrail<C>>) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    pub fn with_output_guardrail(mut self, guardrail: Arc<dyn OutputGuardrail<C>>) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.settings.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.settings.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.settings.max_tokens = Some(max_tokens);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &Instructions<C> {
        &self.instructions
    }

    pub fn render_instructions(&self, context: &RunContext<C>) -> String {
        self.instructions.render(context)
    }

    pub fn handoff_description(&self) -> Option<&str> {
        self.handoff_description.as_deref()
    }

    pub fn output_schema(&self) -> &OutputSchema {
        &self.output
    }

    pub fn tools(&self) -> &[ToolDef<C>] {
        &self.tools
    }

    pub fn handoffs(&self) -> &[Handoff<C>] {
        &self.handoffs
    }

    pub fn input_guardrails(&self) -> &[Arc<dyn InputGuardrail<C>>] {
        &self.input_guardrails
    }

    pub fn output_guardrails(&self) -> &[Arc<dyn OutputGuardrail<C>>] {
        &self.output_guardrails
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    pub fn can_hand_off_to(&self, target: &str) -> bool {
        self.handoffs.iter().any(|h| h.target() == target)
    }

    /// The handoff advertised under `tool_name`, if the call is a handoff.
    pub fn handoff_for_tool(&self, tool_name: &str) -> Option<&Handoff<C>> {
        self.handoffs.iter().find(|h| h.tool_name() == tool_name)
    }

    pub fn tool_router(&self) -> ToolRouter<C> {
        ToolRouter::new(&self.tools)
    }
}
