//! Configuration system for the agent runtime
//!
//! Runtime defaults come from code, a TOML file, or `AGENTS_*` environment
//! variables, and turn into a [`RunConfig`] for the runner.
//!
//! ```toml
//! default_model = "scripted"
//! max_turns = 8
//! max_tool_concurrency = 4
//! tool_error_policy = "fatal"
//! log_filter = "tower_agents=debug"
//! log_format = "json"
//! session_db_path = "sessions.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{AgentsError, Result};
use crate::logging::LogFormat;
use crate::runner::RunConfig;
use crate::sqlite_session::SqliteSession;
use crate::tool::ToolErrorPolicy;

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Model name used when an agent does not set one
    pub default_model: Option<String>,

    /// Model invocations allowed per run
    pub max_turns: usize,

    /// Execute the tool calls of one turn concurrently
    pub parallel_tools: bool,

    /// Cap on concurrently executing tool calls
    pub max_tool_concurrency: Option<usize>,

    pub tool_error_policy: ToolErrorPolicy,

    /// `tracing-subscriber` filter directive
    pub log_filter: String,

    pub log_format: LogFormat,

    /// SQLite file backing persistent sessions
    pub session_db_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_model: None,
            max_turns: 10,
            parallel_tools: true,
            max_tool_concurrency: None,
            tool_error_policy: ToolErrorPolicy::Recover,
            log_filter: "info".to_string(),
            log_format: LogFormat::Compact,
            session_db_path: None,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| AgentsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `AGENTS_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), with variables read through `var`.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(model) = var("AGENTS_MODEL") {
            config.default_model = Some(model);
        }
        if let Some(turns) = var("AGENTS_MAX_TURNS") {
            config.max_turns = parse_var("AGENTS_MAX_TURNS", &turns)?;
        }
        if let Some(parallel) = var("AGENTS_PARALLEL_TOOLS") {
            config.parallel_tools = parse_bool("AGENTS_PARALLEL_TOOLS", &parallel)?;
        }
        if let Some(limit) = var("AGENTS_MAX_TOOL_CONCURRENCY") {
            config.max_tool_concurrency = Some(parse_var("AGENTS_MAX_TOOL_CONCURRENCY", &limit)?);
        }
        if let Some(policy) = var("AGENTS_TOOL_ERRORS") {
            config.tool_error_policy = match policy.to_lowercase().as_str() {
                "recover" => ToolErrorPolicy::Recover,
                "fatal" => ToolErrorPolicy::Fatal,
                other => {
                    return Err(AgentsError::Config(format!(
                        "AGENTS_TOOL_ERRORS must be 'recover' or 'fatal', got '{}'",
                        other
                    )))
                }
            };
        }
        if let Some(filter) = var("AGENTS_LOG") {
            config.log_filter = filter;
        }
        if let Some(format) = var("AGENTS_LOG_FORMAT") {
            config.log_format = match format.to_lowercase().as_str() {
                "compact" => LogFormat::Compact,
                "pretty" => LogFormat::Pretty,
                "json" => LogFormat::Json,
                other => {
                    return Err(AgentsError::Config(format!(
                        "AGENTS_LOG_FORMAT must be compact, pretty or json, got '{}'",
                        other
                    )))
                }
            };
        }
        if let Some(path) = var("AGENTS_SESSION_DB") {
            config.session_db_path = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_turns == 0 {
            return Err(AgentsError::Config("max_turns must be at least 1".into()));
        }
        if self.max_tool_concurrency == Some(0) {
            return Err(AgentsError::Config(
                "max_tool_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Run settings for a [`Runner`](crate::runner::Runner). No session attached.
    pub fn run_config(&self) -> RunConfig {
        let mut config = RunConfig::default()
            .with_max_turns(self.max_turns)
            .with_parallel_tools(self.parallel_tools)
            .with_tool_error_policy(self.tool_error_policy);
        if let Some(limit) = self.max_tool_concurrency {
            config = config.with_max_concurrency(limit);
        }
        if let Some(model) = &self.default_model {
            config = config.with_default_model(model.clone());
        }
        config
    }

    /// Run settings with the SQLite session `session_id` attached.
    pub async fn run_config_with_session(&self, session_id: &str) -> Result<RunConfig> {
        let path = self.session_db_path.as_ref().ok_or_else(|| {
            AgentsError::Config("session_db_path is not configured".to_string())
        })?;
        let session = SqliteSession::new(session_id, path).await?;
        Ok(self.run_config().with_session(Arc::new(session)))
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| AgentsError::Config(format!("{} = '{}': {}", name, raw, e)))
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AgentsError::Config(format!(
            "{} = '{}': expected a boolean",
            name, raw
        ))),
    }
}

/// Configuration builder
pub struct ConfigBuilder {
    config: RuntimeConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.default_model = Some(model.into());
        self
    }

    pub fn max_turns(mut self, turns: usize) -> Self {
        self.config.max_turns = turns;
        self
    }

    pub fn parallel_tools(mut self, enabled: bool) -> Self {
        self.config.parallel_tools = enabled;
        self
    }

    pub fn max_tool_concurrency(mut self, limit: usize) -> Self {
        self.config.max_tool_concurrency = Some(limit);
        self
    }

    pub fn tool_error_policy(mut self, policy: ToolErrorPolicy) -> Self {
        self.config.tool_error_policy = policy;
        self
    }

    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.config.log_filter = filter.into();
        self
    }

    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.log_format = format;
        self
    }

    pub fn session_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.session_db_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<RuntimeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
