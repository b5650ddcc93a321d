//! # Agent Handoff System
//!
//! A handoff lets one agent transfer control of a run to another. Handoffs
//! are edges by *name*: an agent declares the agents it may hand off to, and
//! the runner resolves the names through the [`AgentGraph`] at run time, so
//! cycles such as "specialist hands back to triage" need no construction
//! order.
//!
//! Each handoff is advertised to the model as a tool (by default
//! `transfer_to_<target>`). When the model calls it, the [`HandoffRouter`]
//! validates the edge, runs the optional hook with the shared context, and
//! produces the `HandoffRecord` that the runner appends before switching the
//! active agent. If the hook fails nothing is recorded and the run aborts.
//!
//! ```rust
//! use tower_agents::{Agent, Handoff};
//!
//! let triage: Agent = Agent::new("Triage Agent", "Route the customer.")
//!     .with_handoff(Handoff::to("FAQ Agent"))
//!     .with_handoff(Handoff::to("Seat Booking Agent"));
//!
//! assert_eq!(triage.handoffs()[0].tool_name(), "transfer_to_faq_agent");
//! assert!(triage.can_hand_off_to("Seat Booking Agent"));
//! ```
//!
//! [`AgentGraph`]: crate::graph::AgentGraph

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tower::BoxError;
use tracing::info;

use crate::agent::Agent;
use crate::context::RunContext;
use crate::error::{AgentsError, Result};
use crate::items::{ConversationItem, ItemHelpers};
use crate::tool::ToolSpec;

/// Transition hook: runs with the shared context before control switches.
pub type HandoffHook<C> =
    Arc<dyn Fn(RunContext<C>, Value) -> BoxFuture<'static, std::result::Result<(), BoxError>> + Send + Sync>;

/// Rewrites the history the target agent sees. The recorded history is unchanged.
pub type InputFilter = Arc<dyn Fn(&[ConversationItem]) -> Vec<ConversationItem> + Send + Sync>;

/// A declared handoff edge from the owning agent to `target`.
pub struct Handoff<C> {
    target: String,
    tool_name: String,
    description: Option<String>,
    on_handoff: Option<HandoffHook<C>>,
    input_filter: Option<InputFilter>,
}

impl<C> Clone for Handoff<C> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            tool_name: self.tool_name.clone(),
            description: self.description.clone(),
            on_handoff: self.on_handoff.clone(),
            input_filter: self.input_filter.clone(),
        }
    }
}

impl<C> fmt::Debug for Handoff<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handoff")
            .field("target", &self.target)
            .field("tool_name", &self.tool_name)
            .field("has_hook", &self.on_handoff.is_some())
            .field("has_input_filter", &self.input_filter.is_some())
            .finish()
    }
}

impl<C> Handoff<C> {
    /// Handoff to the agent named `target`.
    pub fn to(target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            tool_name: default_tool_name(&target),
            target,
            description: None,
            on_handoff: None,
            input_filter: None,
        }
    }

    /// Overrides the tool name advertised to the model.
    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = name.into();
        self
    }

    /// Overrides the tool description. Defaults to one built from the target's handoff description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_input_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&[ConversationItem]) -> Vec<ConversationItem> + Send + Sync + 'static,
    {
        self.input_filter = Some(Arc::new(filter));
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn input_filter(&self) -> Option<&InputFilter> {
        self.input_filter.as_ref()
    }

    pub fn has_hook(&self) -> bool {
        self.on_handoff.is_some()
    }

    /// Tool spec for this handoff; `target_description` is the target agent's handoff description.
    pub fn spec(&self, target_description: Option<&str>) -> ToolSpec {
        let description = match (&self.description, target_description) {
            (Some(explicit), _) => explicit.clone(),
            (None, Some(desc)) => format!(
                "Handoff to the {} agent to handle the request. {}",
                self.target, desc
            ),
            (None, None) => format!("Handoff to the {} agent to handle the request.", self.target),
        };
        ToolSpec {
            name: self.tool_name.clone(),
            description,
            parameters: json!({
                "type": "object",
                "properties": {
                    "reason": {"type": "string", "description": "Reason for handoff"}
                }
            }),
        }
    }
}

impl<C: Send + Sync + 'static> Handoff<C> {
    /// Registers the transition hook. It receives the shared context and the
    /// arguments the model passed to the handoff tool.
    pub fn on_handoff<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(RunContext<C>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        let hook: HandoffHook<C> = Arc::new(move |ctx, args| Box::pin(hook(ctx, args)));
        self.on_handoff = Some(hook);
        self
    }
}

/// `transfer_to_<name>` with the name lowercased and non-alphanumerics replaced by `_`.
pub fn default_tool_name(agent_name: &str) -> String {
    let slug: String = agent_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("transfer_to_{}", slug)
}

/// Input filter that hides every tool call and tool result from the target.
pub fn remove_tool_items() -> InputFilter {
    Arc::new(ItemHelpers::without_tool_items)
}

/// Validates and performs the transition part of a handoff.
pub struct HandoffRouter;

impl HandoffRouter {
    /// The declared handoff from `source` to `target`.
    pub fn validate<'a, C>(source: &'a Agent<C>, target: &str) -> Result<&'a Handoff<C>> {
        if source.name() == target {
            return Err(AgentsError::InvalidHandoff {
                source_agent: source.name().to_string(),
                target: target.to_string(),
                reason: "an agent cannot hand off to itself".to_string(),
            });
        }
        source
            .handoffs()
            .iter()
            .find(|h| h.target == target)
            .ok_or_else(|| AgentsError::InvalidHandoff {
                source_agent: source.name().to_string(),
                target: target.to_string(),
                reason: "target is not in the declared handoff set".to_string(),
            })
    }

    /// Validates the handoff behind `tool_name`, runs its hook, and returns
    /// the record to append.
    ///
    /// The caller switches the active agent only after this returns `Ok`.
    pub async fn transfer<C>(
        source: &Agent<C>,
        tool_name: &str,
        target: &Agent<C>,
        context: &RunContext<C>,
        arguments: Value,
    ) -> Result<ConversationItem> {
        Self::validate(source, target.name())?;
        let handoff = source
            .handoff_for_tool(tool_name)
            .filter(|h| h.target == target.name())
            .ok_or_else(|| AgentsError::InvalidHandoff {
                source_agent: source.name().to_string(),
                target: target.name().to_string(),
                reason: format!("'{}' is not a declared handoff tool for this target", tool_name),
            })?;
        if let Some(hook) = &handoff.on_handoff {
            hook(context.clone(), arguments)
                .await
                .map_err(|err| AgentsError::HandoffHookFailed {
                    source_agent: source.name().to_string(),
                    target: target.name().to_string(),
                    message: err.to_string(),
                })?;
        }
        info!(from = %source.name(), to = %target.name(), "Handoff");
        Ok(ConversationItem::handoff(source.name(), target.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Booking {
        flight_number: Mutex<Option<String>>,
    }

    #[test]
    fn test_default_tool_name() {
        assert_eq!(default_tool_name("FAQ Agent"), "transfer_to_faq_agent");
        assert_eq!(default_tool_name("french"), "transfer_to_french");
        assert_eq!(default_tool_name("Seat-Booking"), "transfer_to_seat_booking");
    }

    #[test]
    fn test_spec_uses_target_description() {
        let h: Handoff<()> = Handoff::to("french");
        let spec = h.spec(Some("Speaks French."));
        assert_eq!(spec.name, "transfer_to_french");
        assert!(spec.description.ends_with("Speaks French."));

        let h: Handoff<()> = Handoff::to("french").with_description("custom");
        assert_eq!(h.spec(Some("ignored")).description, "custom");
    }

    #[test]
    fn test_validate_rejects_undeclared_and_self() {
        let triage: Agent = Agent::new("triage", "route").with_handoff(Handoff::to("french"));

        assert!(HandoffRouter::validate(&triage, "french").is_ok());
        assert!(matches!(
            HandoffRouter::validate(&triage, "german"),
            Err(AgentsError::InvalidHandoff { .. })
        ));
        assert!(matches!(
            HandoffRouter::validate(&triage, "triage"),
            Err(AgentsError::InvalidHandoff { .. })
        ));
    }

    #[tokio::test]
    async fn test_transfer_runs_hook_with_shared_context() {
        let triage: Agent<Booking> = Agent::new("triage", "route").with_handoff(
            Handoff::to("seats").on_handoff(|ctx: RunContext<Booking>, _args| async move {
                *ctx.flight_number.lock().unwrap() = Some("FLT-123".into());
                Ok(())
            }),
        );
        let seats: Agent<Booking> = Agent::new("seats", "book");
        let ctx = RunContext::new(Booking::default());

        let record = HandoffRouter::transfer(&triage, "transfer_to_seats", &seats, &ctx, json!({}))
            .await
            .unwrap();
        assert_eq!(record, ConversationItem::handoff("triage", "seats"));
        assert_eq!(ctx.flight_number.lock().unwrap().as_deref(), Some("FLT-123"));
    }

    #[tokio::test]
    async fn test_transfer_runs_hook_of_called_tool() {
        let triage: Agent<Booking> = Agent::new("triage", "route")
            .with_handoff(Handoff::to("seats").with_tool_name("book_window").on_handoff(
                |ctx: RunContext<Booking>, _args| async move {
                    *ctx.flight_number.lock().unwrap() = Some("window".into());
                    Ok(())
                },
            ))
            .with_handoff(Handoff::to("seats").with_tool_name("book_aisle").on_handoff(
                |ctx: RunContext<Booking>, _args| async move {
                    *ctx.flight_number.lock().unwrap() = Some("aisle".into());
                    Ok(())
                },
            ));
        let seats: Agent<Booking> = Agent::new("seats", "book");
        let ctx = RunContext::new(Booking::default());

        HandoffRouter::transfer(&triage, "book_aisle", &seats, &ctx, json!({}))
            .await
            .unwrap();
        assert_eq!(ctx.flight_number.lock().unwrap().as_deref(), Some("aisle"));
    }

    #[tokio::test]
    async fn test_transfer_rejects_tool_for_other_target() {
        let triage: Agent = Agent::new("triage", "route")
            .with_handoff(Handoff::to("seats"))
            .with_handoff(Handoff::to("faq"));
        let seats: Agent = Agent::new("seats", "book");

        let err = HandoffRouter::transfer(&triage, "transfer_to_faq", &seats, &RunContext::new(()), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentsError::InvalidHandoff { .. }));
    }

    #[tokio::test]
    async fn test_hook_failure_is_reported() {
        let triage: Agent = Agent::new("triage", "route").with_handoff(
            Handoff::to("seats").on_handoff(|_ctx, _args| async { Err("no flights".into()) }),
        );
        let seats: Agent = Agent::new("seats", "book");

        let err = HandoffRouter::transfer(&triage, "transfer_to_seats", &seats, &RunContext::new(()), json!({}))
            .await
            .unwrap_err();
        match err {
            AgentsError::HandoffHookFailed { message, .. } => assert_eq!(message, "no flights"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_remove_tool_items_filter() {
        let filter = remove_tool_items();
        let items = vec![
            ConversationItem::user("hi"),
            ConversationItem::ToolCall {
                call_id: "c".into(),
                agent: "a".into(),
                name: "t".into(),
                arguments: json!({}),
            },
        ];
        assert_eq!(filter(&items), vec![ConversationItem::user("hi")]);
    }
}
