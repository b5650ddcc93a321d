//! Error types for the agent runtime

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::result::RunResult;
use crate::tool::ToolExecutionError;

/// Result type alias for the agent runtime
pub type Result<T> = std::result::Result<T, AgentsError>;

/// Where a guardrail was evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Checkpoint {
    Input,
    Output,
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checkpoint::Input => f.write_str("input"),
            Checkpoint::Output => f.write_str("output"),
        }
    }
}

/// Main error type for the agent runtime
#[derive(Debug, Error)]
pub enum AgentsError {
    /// A guardrail vetoed the input or the candidate output.
    ///
    /// `output` carries the rejected final output for output checkpoints.
    #[error("{checkpoint} guardrail '{guardrail}' triggered")]
    GuardrailTripped {
        checkpoint: Checkpoint,
        guardrail: String,
        info: Value,
        output: Option<Value>,
    },

    /// A guardrail failed to produce a verdict. Treated as a trip.
    #[error("{checkpoint} guardrail '{guardrail}' failed: {message}")]
    GuardrailExecution {
        checkpoint: Checkpoint,
        guardrail: String,
        message: String,
    },

    /// An agent tried to transfer control to a target outside its declared set.
    #[error("invalid handoff from '{source_agent}' to '{target}': {reason}")]
    InvalidHandoff {
        source_agent: String,
        target: String,
        reason: String,
    },

    /// The transition hook of a handoff returned an error.
    #[error("handoff hook from '{source_agent}' to '{target}' failed: {message}")]
    HandoffHookFailed {
        source_agent: String,
        target: String,
        message: String,
    },

    /// A tool failed while the run was configured to treat tool errors as fatal.
    #[error(transparent)]
    ToolExecution(#[from] ToolExecutionError),

    /// Maximum turns exceeded
    #[error("Maximum turns exceeded: {max_turns}")]
    MaxTurnsExceeded { max_turns: usize },

    /// The model produced something the runtime cannot act on.
    #[error("Model behavior error: {message}")]
    ModelBehavior { message: String },

    /// The model backend itself failed.
    #[error("Model backend error: {0}")]
    Model(String),

    /// An agent name did not resolve in the agent graph.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// The background task driving a streamed run panicked or was cancelled.
    #[error("run aborted: {0}")]
    RunAborted(String),

    /// Session error
    #[error("Session error: {0}")]
    Session(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AgentsError {
    /// True for guardrail trips and guardrail failures alike.
    pub fn is_guardrail_trip(&self) -> bool {
        matches!(
            self,
            AgentsError::GuardrailTripped { .. } | AgentsError::GuardrailExecution { .. }
        )
    }
}

/// A failed run: the error plus everything the run produced before it stopped.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunError {
    #[source]
    pub error: AgentsError,
    pub partial: Box<RunResult>,
}

impl RunError {
    pub fn new(error: AgentsError, partial: RunResult) -> Self {
        Self {
            error,
            partial: Box::new(partial),
        }
    }

    pub fn error(&self) -> &AgentsError {
        &self.error
    }

    pub fn partial(&self) -> &RunResult {
        &self.partial
    }

    pub fn into_parts(self) -> (AgentsError, RunResult) {
        (self.error, *self.partial)
    }
}

impl From<RunError> for AgentsError {
    fn from(err: RunError) -> Self {
        err.error
    }
}
