//! Result types for agent execution

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::guardrail::GuardrailCheck;
use crate::items::{ConversationItem, ItemHelpers};
use crate::usage::UsageStats;

/// The outcome of a run: the full history, the final output, the agent that
/// produced it, and what it cost.
///
/// A failed run carries the same structure as its partial result, so
/// `history` always holds everything recorded before the failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Correlates log lines; not part of the history.
    pub run_id: String,
    /// Session items, then the caller's input, then every item the run appended.
    pub history: Vec<ConversationItem>,
    /// Number of leading history items that were input to this run.
    pub input_len: usize,
    /// `Value::Null` until an agent produced a final output.
    pub final_output: Value,
    pub last_agent: String,
    pub usage: UsageStats,
    /// Model invocations made.
    pub turns: usize,
    pub input_guardrail_results: Vec<GuardrailCheck>,
    pub output_guardrail_results: Vec<GuardrailCheck>,
}

impl RunResult {
    /// A result with no history, as returned when a run fails before it starts.
    pub fn empty(agent: impl Into<String>) -> Self {
        Self {
            run_id: String::new(),
            history: Vec::new(),
            input_len: 0,
            final_output: Value::Null,
            last_agent: agent.into(),
            usage: UsageStats::default(),
            turns: 0,
            input_guardrail_results: Vec::new(),
            output_guardrail_results: Vec::new(),
        }
    }

    pub fn input(&self) -> &[ConversationItem] {
        &self.history[..self.input_len.min(self.history.len())]
    }

    /// Items appended by this run.
    pub fn new_items(&self) -> &[ConversationItem] {
        &self.history[self.input_len.min(self.history.len())..]
    }

    pub fn final_output_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.final_output.clone())?)
    }

    /// The final output when it is plain text.
    pub fn final_text(&self) -> Option<&str> {
        self.final_output.as_str()
    }

    /// History shaped as input for the next run.
    pub fn to_input_list(&self) -> Vec<ConversationItem> {
        self.history.clone()
    }

    /// History plus a new user turn.
    pub fn continue_with(&self, user_text: impl Into<String>) -> Vec<ConversationItem> {
        let mut items = self.to_input_list();
        items.push(ConversationItem::user(user_text));
        items
    }

    /// `(source, target)` of every handoff this run performed.
    pub fn handoffs(&self) -> Vec<(&str, &str)> {
        ItemHelpers::handoffs(self.new_items())
    }

    pub fn is_complete(&self) -> bool {
        !self.final_output.is_null()
    }
}
