//! Conversation items
//!
//! A run's history is an ordered, append-only sequence of [`ConversationItem`]s.
//! Items carry no timestamps or random identifiers, so two runs against
//! deterministic collaborators produce identical sequences.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry in a conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    /// Input from the caller.
    UserMessage { content: String },

    /// Output produced by an agent. Text output is a JSON string, structured
    /// output is the parsed JSON value.
    AgentMessage { agent: String, content: Value },

    /// A tool (or handoff) call requested by an agent.
    ToolCall {
        call_id: String,
        agent: String,
        name: String,
        arguments: Value,
    },

    /// The captured result of a tool call.
    ToolResult {
        call_id: String,
        name: String,
        output: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Control moved from `source` to `target`.
    HandoffRecord { source: String, target: String },
}

impl ConversationItem {
    pub fn user(content: impl Into<String>) -> Self {
        ConversationItem::UserMessage {
            content: content.into(),
        }
    }

    pub fn agent_text(agent: impl Into<String>, text: impl Into<String>) -> Self {
        ConversationItem::AgentMessage {
            agent: agent.into(),
            content: Value::String(text.into()),
        }
    }

    pub fn agent_output(agent: impl Into<String>, content: Value) -> Self {
        ConversationItem::AgentMessage {
            agent: agent.into(),
            content,
        }
    }

    pub fn handoff(source: impl Into<String>, target: impl Into<String>) -> Self {
        ConversationItem::HandoffRecord {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Name of the item kind, as stored by sessions.
    pub fn kind(&self) -> &'static str {
        match self {
            ConversationItem::UserMessage { .. } => "user_message",
            ConversationItem::AgentMessage { .. } => "agent_message",
            ConversationItem::ToolCall { .. } => "tool_call",
            ConversationItem::ToolResult { .. } => "tool_result",
            ConversationItem::HandoffRecord { .. } => "handoff_record",
        }
    }

    pub fn is_tool_item(&self) -> bool {
        matches!(
            self,
            ConversationItem::ToolCall { .. } | ConversationItem::ToolResult { .. }
        )
    }

    /// Plain-text rendering of message items; `None` for tool and handoff items.
    pub fn text(&self) -> Option<String> {
        match self {
            ConversationItem::UserMessage { content } => Some(content.clone()),
            ConversationItem::AgentMessage { content, .. } => Some(value_to_text(content)),
            _ => None,
        }
    }
}

/// Renders a JSON value as text: strings are unquoted, everything else is compact JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Input accepted by a run: a single user message or an existing history.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunInput(pub Vec<ConversationItem>);

impl RunInput {
    pub fn into_items(self) -> Vec<ConversationItem> {
        self.0
    }
}

impl From<&str> for RunInput {
    fn from(value: &str) -> Self {
        RunInput(vec![ConversationItem::user(value)])
    }
}

impl From<String> for RunInput {
    fn from(value: String) -> Self {
        RunInput(vec![ConversationItem::user(value)])
    }
}

impl From<Vec<ConversationItem>> for RunInput {
    fn from(value: Vec<ConversationItem>) -> Self {
        RunInput(value)
    }
}

impl From<&[ConversationItem]> for RunInput {
    fn from(value: &[ConversationItem]) -> Self {
        RunInput(value.to_vec())
    }
}

/// Helper functions for working with item sequences.
pub struct ItemHelpers;

impl ItemHelpers {
    /// Text of the last agent message, if any.
    pub fn last_agent_text(items: &[ConversationItem]) -> Option<String> {
        items.iter().rev().find_map(|item| match item {
            ConversationItem::AgentMessage { content, .. } => Some(value_to_text(content)),
            _ => None,
        })
    }

    /// All `(source, target)` pairs of handoff records, in order.
    pub fn handoffs(items: &[ConversationItem]) -> Vec<(&str, &str)> {
        items
            .iter()
            .filter_map(|item| match item {
                ConversationItem::HandoffRecord { source, target } => {
                    Some((source.as_str(), target.as_str()))
                }
                _ => None,
            })
            .collect()
    }

    /// Tool results in history order, as `(call_id, output, error)`.
    pub fn tool_results(items: &[ConversationItem]) -> Vec<(&str, &Value, Option<&str>)> {
        items
            .iter()
            .filter_map(|item| match item {
                ConversationItem::ToolResult {
                    call_id,
                    output,
                    error,
                    ..
                } => Some((call_id.as_str(), output, error.as_deref())),
                _ => None,
            })
            .collect()
    }

    /// Drops every tool call and tool result, keeping messages and handoff records.
    pub fn without_tool_items(items: &[ConversationItem]) -> Vec<ConversationItem> {
        items
            .iter()
            .filter(|item| !item.is_tool_item())
            .cloned()
            .collect()
    }

    /// One line per item, for logs.
    pub fn transcript(items: &[ConversationItem]) -> String {
        let mut lines = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            let line = match item {
                ConversationItem::UserMessage { content } => {
                    format!("{:02} USER     | {}", idx, truncate_for_log(content, 160))
                }
                ConversationItem::AgentMessage { agent, content } => format!(
                    "{:02} AGENT    | {}: {}",
                    idx,
                    agent,
                    truncate_for_log(&value_to_text(content), 160)
                ),
                ConversationItem::ToolCall {
                    call_id,
                    name,
                    arguments,
                    ..
                } => format!(
                    "{:02} CALL     | id={} name={} args={}",
                    idx,
                    call_id,
                    name,
                    truncate_for_log(&arguments.to_string(), 120)
                ),
                ConversationItem::ToolResult {
                    call_id,
                    output,
                    error,
                    ..
                } => match error {
                    Some(err) => format!(
                        "{:02} RESULT   | id={} error={}",
                        idx,
                        call_id,
                        truncate_for_log(err, 120)
                    ),
                    None => format!(
                        "{:02} RESULT   | id={} payload={}",
                        idx,
                        call_id,
                        truncate_for_log(&value_to_text(output), 120)
                    ),
                },
                ConversationItem::HandoffRecord { source, target } => {
                    format!("{:02} HANDOFF  | {} -> {}", idx, source, target)
                }
            };
            lines.push(line);
        }
        lines.join("\n")
    }
}

fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((cut, _)) => {
            let mut out = s[..cut].to_string();
            out.push('…');
            out
        }
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_item_serialization_is_tagged() {
        let item = ConversationItem::handoff("triage", "french");
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(
            value,
            json!({"type": "handoff_record", "source": "triage", "target": "french"})
        );

        let back: ConversationItem = serde_json::from_value(value).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn test_tool_result_error_is_optional() {
        let raw = json!({"type": "tool_result", "call_id": "c1", "name": "add", "output": 3});
        let item: ConversationItem = serde_json::from_value(raw).unwrap();
        assert_eq!(
            item,
            ConversationItem::ToolResult {
                call_id: "c1".into(),
                name: "add".into(),
                output: json!(3),
                error: None,
            }
        );
        assert_eq!(item.kind(), "tool_result");
        assert!(item.is_tool_item());
    }

    #[test]
    fn test_text_rendering() {
        assert_eq!(ConversationItem::user("hi").text().as_deref(), Some("hi"));
        let structured = ConversationItem::agent_output("checker", json!({"good_quality": false}));
        assert_eq!(
            structured.text().as_deref(),
            Some(r#"{"good_quality":false}"#)
        );
        assert_eq!(ConversationItem::handoff("a", "b").text(), None);
    }

    #[test]
    fn test_helpers() {
        let items = vec![
            ConversationItem::user("Bonjour"),
            ConversationItem::ToolCall {
                call_id: "call_1_0".into(),
                agent: "triage".into(),
                name: "transfer_to_french".into(),
                arguments: json!({}),
            },
            ConversationItem::ToolResult {
                call_id: "call_1_0".into(),
                name: "transfer_to_french".into(),
                output: json!({"assistant": "french"}),
                error: None,
            },
            ConversationItem::handoff("triage", "french"),
            ConversationItem::agent_text("french", "Bonjour !"),
        ];

        assert_eq!(ItemHelpers::handoffs(&items), vec![("triage", "french")]);
        assert_eq!(
            ItemHelpers::last_agent_text(&items).as_deref(),
            Some("Bonjour !")
        );
        assert_eq!(ItemHelpers::tool_results(&items).len(), 1);
        assert_eq!(ItemHelpers::without_tool_items(&items).len(), 3);

        let transcript = ItemHelpers::transcript(&items);
        assert!(transcript.contains("HANDOFF  | triage -> french"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "ééééé";
        assert_eq!(truncate_for_log(s, 2), "éé…");
        assert_eq!(truncate_for_log(s, 10), s);
    }

    #[test]
    fn test_run_input_conversions() {
        let input: RunInput = "hello".into();
        assert_eq!(input.into_items(), vec![ConversationItem::user("hello")]);

        let history = vec![ConversationItem::user("a"), ConversationItem::agent_text("x", "b")];
        let input: RunInput = history.clone().into();
        assert_eq!(input.0, history);
    }
}
