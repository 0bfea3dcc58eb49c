// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[derive(Error, Debug)]
pub enum TracingError {
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct TracingConfiguration {
    #[serde(default = "default_log_level")]
    log_level: String,

    #[serde(default = "default_display_thread_names")]
    display_thread_names: bool,

    #[serde(default = "default_display_thread_ids")]
    display_thread_ids: bool,

    /// extra directives in `RUST_LOG` syntax, e.g. `greet_rpc=trace`
    #[serde(default)]
    filter: String,
}

impl Default for TracingConfiguration {
    fn default() -> Self {
        TracingConfiguration {
            log_level: default_log_level(),
            display_thread_names: default_display_thread_names(),
            display_thread_ids: default_display_thread_ids(),
            filter: String::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_display_thread_names() -> bool {
    true
}

fn default_display_thread_ids() -> bool {
    false
}

// unknown levels fall back to info
fn resolve_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

impl TracingConfiguration {
    pub fn with_log_level(self, log_level: impl Into<String>) -> Self {
        TracingConfiguration {
            log_level: log_level.into(),
            ..self
        }
    }

    pub fn with_display_thread_names(self, display_thread_names: bool) -> Self {
        TracingConfiguration {
            display_thread_names,
            ..self
        }
    }

    pub fn with_display_thread_ids(self, display_thread_ids: bool) -> Self {
        TracingConfiguration {
            display_thread_ids,
            ..self
        }
    }

    pub fn with_filter(self, filter: impl Into<String>) -> Self {
        TracingConfiguration {
            filter: filter.into(),
            ..self
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn display_thread_names(&self) -> bool {
        self.display_thread_names
    }

    pub fn display_thread_ids(&self) -> bool {
        self.display_thread_ids
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Filter built from the log level, refined by the configured directives.
    ///
    /// `RUST_LOG` wins over both when set.
    pub fn env_filter(&self) -> EnvFilter {
        let level = LevelFilter::from_level(resolve_level(&self.log_level));
        let builder = EnvFilter::builder().with_default_directive(level.into());

        match std::env::var(EnvFilter::DEFAULT_ENV) {
            Ok(directives) if !directives.is_empty() => builder.parse_lossy(directives),
            _ => builder.parse_lossy(&self.filter),
        }
    }

    /// Set up a subscriber that logs to stdout
    pub fn setup_tracing_subscriber(&self) -> Result<(), TracingError> {
        tracing_subscriber::fmt()
            .with_env_filter(self.env_filter())
            .with_thread_names(self.display_thread_names)
            .with_thread_ids(self.display_thread_ids)
            .try_init()
            .map_err(|e| TracingError::Install(e.to_string()))
    }
}
