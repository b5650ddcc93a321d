//! # Usage accounting
//!
//! Every model call reports a [`Usage`]. The runner folds them into a
//! [`UsageStats`] that is returned with the run result, broken down by agent
//! and by model name.
//!
//! ```rust
//! use tower_agents::usage::{Usage, UsageStats};
//!
//! let mut stats = UsageStats::new();
//! stats.record("scripted", "triage", Usage::new(120, 30));
//! stats.record("scripted", "french", Usage::new(200, 50));
//!
//! assert_eq!(stats.total.total_tokens, 400);
//! assert_eq!(stats.by_agent["triage"].request_count, 1);
//! ```

use std::collections::BTreeMap;
use std::ops::Add;

use serde::{Deserialize, Serialize};

/// Token usage of a single model call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
    /// Number of model calls folded into this value.
    pub request_count: usize,
}

impl Usage {
    /// Usage of one request.
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            request_count: 1,
        }
    }

    /// One request whose token counts are unknown.
    pub fn request() -> Self {
        Self {
            request_count: 1,
            ..Self::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn add_usage(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.request_count += other.request_count;
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self.add_usage(&other);
        self
    }
}

/// Usage aggregated across a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub total: Usage,
    pub by_model: BTreeMap<String, Usage>,
    pub by_agent: BTreeMap<String, Usage>,
}

impl UsageStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one model call made on behalf of `agent`.
    pub fn record(&mut self, model: &str, agent: &str, usage: Usage) {
        self.total.add_usage(&usage);
        bucket(&mut self.by_model, model, &usage);
        bucket(&mut self.by_agent, agent, &usage);
    }

    /// Folds another run's statistics into this one, e.g. a nested run.
    pub fn merge(&mut self, other: &UsageStats) {
        self.total.add_usage(&other.total);
        for (model, usage) in &other.by_model {
            bucket(&mut self.by_model, model, usage);
        }
        for (agent, usage) in &other.by_agent {
            bucket(&mut self.by_agent, agent, usage);
        }
    }

    /// Multi-line report for logs and CLIs. Breakdowns are sorted by name.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "{} tokens over {} model calls",
            self.total.total_tokens, self.total.request_count
        )];
        for (label, breakdown) in [("model", &self.by_model), ("agent", &self.by_agent)] {
            lines.extend(breakdown.iter().map(|(name, usage)| {
                format!(
                    "  {} {}: {} tokens ({} prompt, {} completion), {} calls",
                    label,
                    name,
                    usage.total_tokens,
                    usage.prompt_tokens,
                    usage.completion_tokens,
                    usage.request_count
                )
            }));
        }
        lines.join("\n")
    }
}

fn bucket(map: &mut BTreeMap<String, Usage>, key: &str, usage: &Usage) {
    map.entry(key.to_string()).or_default().add_usage(usage);
}
