//! # Guardrails (orientation)
//!
//! Guardrails are independent checks attached to an agent. Input guardrails
//! see the pending input of a run before the first agent invocation; output
//! guardrails see the candidate final output before it is accepted. Each
//! returns a [`GuardrailVerdict`]; a triggered verdict aborts the run.
//!
//! All guardrails of one checkpoint run concurrently through the
//! [`GuardrailEngine`]. A guardrail that errors does not hide the verdicts of
//! the others, and counts as a trip. When several trip, the first in
//! declaration order is the one reported.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower::BoxError;
use tracing::{debug, info_span, warn, Instrument};

use crate::context::RunContext;
use crate::error::{AgentsError, Checkpoint};
use crate::items::{value_to_text, ConversationItem};
use crate::runner::Runner;

/// Outcome of one guardrail at one checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailVerdict {
    pub triggered: bool,
    /// Free-form payload describing the decision.
    pub info: Value,
}

impl GuardrailVerdict {
    pub fn pass() -> Self {
        Self {
            triggered: false,
            info: Value::Null,
        }
    }

    pub fn pass_with(info: Value) -> Self {
        Self {
            triggered: false,
            info,
        }
    }

    pub fn trip(info: Value) -> Self {
        Self {
            triggered: true,
            info,
        }
    }
}

/// Check run against the pending input of a run.
#[async_trait]
pub trait InputGuardrail<C>: Send + Sync {
    fn name(&self) -> &str;

    async fn check(
        &self,
        input: &[ConversationItem],
        context: &RunContext<C>,
    ) -> Result<GuardrailVerdict, BoxError>;
}

/// Check run against a candidate final output.
#[async_trait]
pub trait OutputGuardrail<C>: Send + Sync {
    fn name(&self) -> &str;

    async fn check(
        &self,
        output: &Value,
        context: &RunContext<C>,
    ) -> Result<GuardrailVerdict, BoxError>;
}

/// One guardrail's result, as recorded on the run result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailCheck {
    pub guardrail: String,
    pub checkpoint: Checkpoint,
    /// Failed guardrails carry a triggered verdict with a null payload.
    pub verdict: GuardrailVerdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GuardrailCheck {
    fn from_outcome(
        guardrail: &str,
        checkpoint: Checkpoint,
        outcome: Result<GuardrailVerdict, BoxError>,
    ) -> Self {
        match outcome {
            Ok(verdict) => Self {
                guardrail: guardrail.to_string(),
                checkpoint,
                verdict,
                error: None,
            },
            Err(err) => Self {
                guardrail: guardrail.to_string(),
                checkpoint,
                verdict: GuardrailVerdict::trip(Value::Null),
                error: Some(err.to_string()),
            },
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.verdict.triggered
    }

    /// The aborting error for this check. `output` is the rejected output, if any.
    pub fn to_error(&self, output: Option<Value>) -> AgentsError {
        match &self.error {
            Some(message) => AgentsError::GuardrailExecution {
                checkpoint: self.checkpoint,
                guardrail: self.guardrail.clone(),
                message: message.clone(),
            },
            None => AgentsError::GuardrailTripped {
                checkpoint: self.checkpoint,
                guardrail: self.guardrail.clone(),
                info: self.verdict.info.clone(),
                output,
            },
        }
    }
}

/// Runs the guardrails of one checkpoint concurrently.
pub struct GuardrailEngine;

impl GuardrailEngine {
    pub async fn evaluate_input<C>(
        guardrails: &[Arc<dyn InputGuardrail<C>>],
        input: &[ConversationItem],
        context: &RunContext<C>,
    ) -> Vec<GuardrailCheck> {
        let checks = guardrails.iter().map(|g| {
            let span = info_span!("guardrail", name = %g.name(), checkpoint = "input");
            async move {
                let outcome = g.check(input, context).await;
                GuardrailCheck::from_outcome(g.name(), Checkpoint::Input, outcome)
            }
            .instrument(span)
        });
        let checks = join_all(checks).await;
        log_checks(&checks);
        checks
    }

    pub async fn evaluate_output<C>(
        guardrails: &[Arc<dyn OutputGuardrail<C>>],
        output: &Value,
        context: &RunContext<C>,
    ) -> Vec<GuardrailCheck> {
        let checks = guardrails.iter().map(|g| {
            let span = info_span!("guardrail", name = %g.name(), checkpoint = "output");
            async move {
                let outcome = g.check(output, context).await;
                GuardrailCheck::from_outcome(g.name(), Checkpoint::Output, outcome)
            }
            .instrument(span)
        });
        let checks = join_all(checks).await;
        log_checks(&checks);
        checks
    }

    /// First tripped check in declaration order.
    pub fn first_trip(checks: &[GuardrailCheck]) -> Option<&GuardrailCheck> {
        checks.iter().find(|c| c.is_tripped())
    }
}

fn log_checks(checks: &[GuardrailCheck]) {
    for check in checks {
        match (&check.error, check.is_tripped()) {
            (Some(err), _) => warn!(
                guardrail = %check.guardrail,
                checkpoint = %check.checkpoint,
                error = %err,
                "guardrail failed; treating as triggered"
            ),
            (None, true) => warn!(
                guardrail = %check.guardrail,
                checkpoint = %check.checkpoint,
                "guardrail triggered"
            ),
            (None, false) => debug!(guardrail = %check.guardrail, "guardrail passed"),
        }
    }
}

/// Text of every user message in `items`, one per line.
pub fn input_text(items: &[ConversationItem]) -> String {
    items
        .iter()
        .filter_map(|item| match item {
            ConversationItem::UserMessage { content } => Some(content.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// =============================
// Function-backed guardrails
// =============================

pub struct FnInputGuardrail<F> {
    name: String,
    f: F,
}

/// Input guardrail from an async closure.
pub fn input_guardrail_fn<C, F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn InputGuardrail<C>>
where
    C: Send + Sync + 'static,
    F: Fn(Vec<ConversationItem>, RunContext<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<GuardrailVerdict, BoxError>> + Send + 'static,
{
    Arc::new(FnInputGuardrail {
        name: name.into(),
        f,
    })
}

#[async_trait]
impl<C, F, Fut> InputGuardrail<C> for FnInputGuardrail<F>
where
    C: Send + Sync + 'static,
    F: Fn(Vec<ConversationItem>, RunContext<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<GuardrailVerdict, BoxError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(
        &self,
        input: &[ConversationItem],
        context: &RunContext<C>,
    ) -> Result<GuardrailVerdict, BoxError> {
        (self.f)(input.to_vec(), context.clone()).await
    }
}

pub struct FnOutputGuardrail<F> {
    name: String,
    f: F,
}

/// Output guardrail from an async closure.
pub fn output_guardrail_fn<C, F, Fut>(
    name: impl Into<String>,
    f: F,
) -> Arc<dyn OutputGuardrail<C>>
where
    C: Send + Sync + 'static,
    F: Fn(Value, RunContext<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<GuardrailVerdict, BoxError>> + Send + 'static,
{
    Arc::new(FnOutputGuardrail {
        name: name.into(),
        f,
    })
}

#[async_trait]
impl<C, F, Fut> OutputGuardrail<C> for FnOutputGuardrail<F>
where
    C: Send + Sync + 'static,
    F: Fn(Value, RunContext<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<GuardrailVerdict, BoxError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(
        &self,
        output: &Value,
        context: &RunContext<C>,
    ) -> Result<GuardrailVerdict, BoxError> {
        (self.f)(output.clone(), context.clone()).await
    }
}

// =============================
// Agent-backed guardrail
// =============================

/// Runs a classifier agent and trips on a boolean field of its structured output.
///
/// The classifier shares the caller's context. Its whole output becomes the
/// verdict's `info` payload.
pub struct AgentGuardrail<C> {
    name: String,
    runner: Runner<C>,
    agent: String,
    trip_field: String,
}

impl<C> AgentGuardrail<C> {
    pub fn new(
        name: impl Into<String>,
        runner: Runner<C>,
        agent: impl Into<String>,
        trip_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            runner,
            agent: agent.into(),
            trip_field: trip_field.into(),
        }
    }

    fn verdict(&self, output: Value) -> Result<GuardrailVerdict, BoxError> {
        match output.get(&self.trip_field).and_then(Value::as_bool) {
            Some(triggered) => Ok(GuardrailVerdict {
                triggered,
                info: output,
            }),
            None => Err(format!(
                "classifier '{}' returned no boolean '{}'",
                self.agent, self.trip_field
            )
            .into()),
        }
    }
}

impl<C> fmt::Debug for AgentGuardrail<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentGuardrail")
            .field("name", &self.name)
            .field("agent", &self.agent)
            .field("trip_field", &self.trip_field)
            .finish()
    }
}

#[async_trait]
impl<C: Send + Sync + 'static> InputGuardrail<C> for AgentGuardrail<C> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(
        &self,
        input: &[ConversationItem],
        context: &RunContext<C>,
    ) -> Result<GuardrailVerdict, BoxError> {
        let result = self
            .runner
            .run(&self.agent, input.to_vec(), context)
            .await?;
        self.verdict(result.final_output)
    }
}

#[async_trait]
impl<C: Send + Sync + 'static> OutputGuardrail<C> for AgentGuardrail<C> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(
        &self,
        output: &Value,
        context: &RunContext<C>,
    ) -> Result<GuardrailVerdict, BoxError> {
        let input = vec![ConversationItem::user(value_to_text(output))];
        let result = self.runner.run(&self.agent, input, context).await?;
        self.verdict(result.final_output)
    }
}

// =============================
// Built-in guardrails
// =============================

/// An [`InputGuardrail`] that trips when the user input exceeds a maximum length in characters.
#[derive(Debug, Clone)]
pub struct MaxLengthGuardrail<C = ()> {
    name: String,
    max_length: usize,
    _context: PhantomData<fn(C)>,
}

impl<C> MaxLengthGuardrail<C> {
    pub fn new(max_length: usize) -> Self {
        Self {
            name: format!("max_length_{}", max_length),
            max_length,
            _context: PhantomData,
        }
    }
}

#[async_trait]
impl<C: Send + Sync + 'static> InputGuardrail<C> for MaxLengthGuardrail<C> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(
        &self,
        input: &[ConversationItem],
        _context: &RunContext<C>,
    ) -> Result<GuardrailVerdict, BoxError> {
        let length = input_text(input).chars().count();
        let info = json!({"length": length, "max_length": self.max_length});
        if length > self.max_length {
            Ok(GuardrailVerdict::trip(info))
        } else {
            Ok(GuardrailVerdict::pass_with(info))
        }
    }
}

/// Blocks content containing any of a list of case-insensitive patterns.
///
/// Works as both an input and an output guardrail.
#[derive(Debug, Clone)]
pub struct PatternBlockGuardrail {
    name: String,
    patterns: Vec<String>,
}

impl PatternBlockGuardrail {
    pub fn new(name: impl Into<String>, patterns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            patterns,
        }
    }

    fn scan(&self, text: &str) -> GuardrailVerdict {
        let lower = text.to_lowercase();
        match self
            .patterns
            .iter()
            .find(|p| lower.contains(&p.to_lowercase()))
        {
            Some(pattern) => GuardrailVerdict::trip(json!({ "pattern": pattern })),
            None => GuardrailVerdict::pass(),
        }
    }
}

#[async_trait]
impl<C: Send + Sync + 'static> InputGuardrail<C> for PatternBlockGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(
        &self,
        input: &[ConversationItem],
        _context: &RunContext<C>,
    ) -> Result<GuardrailVerdict, BoxError> {
        Ok(self.scan(&input_text(input)))
    }
}

#[async_trait]
impl<C: Send + Sync + 'static> OutputGuardrail<C> for PatternBlockGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(
        &self,
        output: &Value,
        _context: &RunContext<C>,
    ) -> Result<GuardrailVerdict, BoxError> {
        Ok(self.scan(&value_to_text(output)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ctx() -> RunContext<()> {
        RunContext::new(())
    }

    #[tokio::test]
    async fn test_max_length_guardrail() {
        let guard = MaxLengthGuardrail::<()>::new(10);

        let short = guard.check(&[ConversationItem::user("short")], &ctx()).await.unwrap();
        assert!(!short.triggered);

        let long = guard
            .check(&[ConversationItem::user("this is a very long input")], &ctx())
            .await
            .unwrap();
        assert!(long.triggered);
        assert_eq!(long.info["max_length"], json!(10));
    }

    #[tokio::test]
    async fn test_pattern_block_guardrail() {
        let guard = PatternBlockGuardrail::new("sensitive", vec!["650".to_string()]);

        let verdict = OutputGuardrail::<()>::check(&guard, &json!("The answer is 650."), &ctx())
            .await
            .unwrap();
        assert!(verdict.triggered);
        assert_eq!(verdict.info, json!({"pattern": "650"}));

        let verdict = InputGuardrail::<()>::check(&guard, &[ConversationItem::user("hello")], &ctx())
            .await
            .unwrap();
        assert!(!verdict.triggered);
    }

    #[tokio::test]
    async fn test_engine_runs_guardrails_concurrently() {
        let slow = |name: &'static str| {
            input_guardrail_fn::<(), _, _>(name, |_input, _ctx| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(GuardrailVerdict::pass())
            })
        };
        let guards = vec![slow("a"), slow("b"), slow("c"), slow("d")];

        let started = std::time::Instant::now();
        let checks = GuardrailEngine::evaluate_input(&guards, &[ConversationItem::user("x")], &ctx()).await;
        assert_eq!(checks.len(), 4);
        assert!(started.elapsed() < Duration::from_millis(180));
        assert!(GuardrailEngine::first_trip(&checks).is_none());
    }

    #[tokio::test]
    async fn test_failing_guardrail_does_not_hide_others() {
        let guards: Vec<Arc<dyn InputGuardrail<()>>> = vec![
            input_guardrail_fn("ok", |_i, _c| async { Ok(GuardrailVerdict::pass()) }),
            input_guardrail_fn("broken", |_i, _c| async { Err::<GuardrailVerdict, BoxError>("offline".into()) }),
            input_guardrail_fn("tripper", |_i, _c| async { Ok(GuardrailVerdict::trip(json!("no"))) }),
        ];

        let checks = GuardrailEngine::evaluate_input(&guards, &[], &ctx()).await;
        assert_eq!(checks.len(), 3);
        assert!(!checks[0].is_tripped());
        assert!(checks[1].is_tripped());
        assert_eq!(checks[1].error.as_deref(), Some("offline"));
        assert!(checks[2].is_tripped());

        let first = GuardrailEngine::first_trip(&checks).unwrap();
        assert_eq!(first.guardrail, "broken");
        assert!(matches!(first.to_error(None), AgentsError::GuardrailExecution { .. }));
    }

    #[tokio::test]
    async fn test_first_trip_follows_declaration_order() {
        let guards: Vec<Arc<dyn OutputGuardrail<()>>> = vec![
            output_guardrail_fn("late", |_o, _c| async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(GuardrailVerdict::trip(json!("late")))
            }),
            output_guardrail_fn("early", |_o, _c| async { Ok(GuardrailVerdict::trip(json!("early"))) }),
        ];

        let checks = GuardrailEngine::evaluate_output(&guards, &json!("text"), &ctx()).await;
        let first = GuardrailEngine::first_trip(&checks).unwrap();
        assert_eq!(first.guardrail, "late");
        match first.to_error(Some(json!("text"))) {
            AgentsError::GuardrailTripped { info, output, .. } => {
                assert_eq!(info, json!("late"));
                assert_eq!(output, Some(json!("text")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_input_text_joins_user_messages() {
        let items = vec![
            ConversationItem::user("one"),
            ConversationItem::agent_text("bot", "ignored"),
            ConversationItem::user("two"),
        ];
        assert_eq!(input_text(&items), "one\ntwo");
    }
}
