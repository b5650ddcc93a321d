//! Subscriber setup for the runtime's `tracing` events.
//!
//! The library only emits events; binaries and tests decide where they go.
//! [`init`] installs a `tracing-subscriber` fmt subscriber filtered by an
//! `EnvFilter`. `RUST_LOG` wins over the configured filter when set.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::config::RuntimeConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Installs the global subscriber. Returns `false` if one was already installed.
pub fn init(filter: &str, format: LogFormat) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);
    let installed = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.is_ok()
}

pub fn init_from_config(config: &RuntimeConfig) -> bool {
    init(&config.log_filter, config.log_format)
}

/// Subscriber for tests: output captured per test, `RUST_LOG` respected.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
