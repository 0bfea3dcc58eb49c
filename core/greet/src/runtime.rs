// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time;

use duration_str::deserialize_duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("failed to build runtime: {0}")]
    Build(#[from] std::io::Error),
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RuntimeConfiguration {
    /// the number of cores to use for this runtime
    #[serde(default = "default_n_cores")]
    n_cores: usize,

    /// the thread name for the runtime
    #[serde(default = "default_thread_name")]
    thread_name: String,

    /// the time the server gets to drain its calls on shutdown
    #[serde(
        default = "default_drain_timeout",
        deserialize_with = "deserialize_duration"
    )]
    drain_timeout: time::Duration,
}

impl Default for RuntimeConfiguration {
    fn default() -> Self {
        RuntimeConfiguration {
            n_cores: default_n_cores(),
            thread_name: default_thread_name(),
            drain_timeout: default_drain_timeout(),
        }
    }
}

fn default_n_cores() -> usize {
    // 0 means use all available cores
    0
}

fn default_thread_name() -> String {
    "greet".to_string()
}

fn default_drain_timeout() -> time::Duration {
    time::Duration::from_secs(10)
}

impl RuntimeConfiguration {
    pub fn new() -> Self {
        RuntimeConfiguration::default()
    }

    pub fn with_cores(self, n_cores: usize) -> Self {
        RuntimeConfiguration { n_cores, ..self }
    }

    pub fn with_thread_name(self, thread_name: &str) -> Self {
        RuntimeConfiguration {
            thread_name: thread_name.to_string(),
            ..self
        }
    }

    pub fn with_drain_timeout(self, drain_timeout: time::Duration) -> Self {
        RuntimeConfiguration {
            drain_timeout,
            ..self
        }
    }

    pub fn n_cores(&self) -> usize {
        self.n_cores
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn drain_timeout(&self) -> time::Duration {
        self.drain_timeout
    }
}

pub struct GreetRuntime {
    pub config: RuntimeConfiguration,
    pub runtime: Runtime,
}

// cores requested beyond the machine's count are capped
fn resolve_cores(requested: usize, available: usize) -> usize {
    if requested > available {
        warn!(
            "Requested number of cores ({}) is greater than available cores ({}). Using all available cores",
            requested, available
        );
        available
    } else if requested == 0 {
        info!(n_cpu = available, "Using all available cores");
        available
    } else {
        requested
    }
}

pub fn build(config: &RuntimeConfiguration) -> Result<GreetRuntime, RuntimeError> {
    let n_cpu = num_cpus::get();
    debug_assert!(n_cpu > 0, "failed to get number of CPUs");

    let cores = resolve_cores(config.n_cores, n_cpu);

    let runtime = match cores {
        1 => {
            info!("Using single-threaded runtime");
            Builder::new_current_thread()
                .enable_all()
                .thread_name(config.thread_name.as_str())
                .build()?
        }
        _ => {
            info!(%cores, "Using multi-threaded runtime");
            Builder::new_multi_thread()
                .enable_all()
                .thread_name(config.thread_name.as_str())
                .worker_threads(cores)
                .max_blocking_threads(cores)
                .build()?
        }
    };

    Ok(GreetRuntime {
        config: config.clone(),
        runtime,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_configuration() {
        let config = RuntimeConfiguration::default();
        assert_eq!(config.n_cores(), 0);
        assert_eq!(config.thread_name(), "greet");
        assert_eq!(config.drain_timeout(), time::Duration::from_secs(10));

        let config = RuntimeConfiguration::new()
            .with_cores(1)
            .with_thread_name("test")
            .with_drain_timeout(time::Duration::from_secs(5));
        assert_eq!(config.n_cores(), 1);
        assert_eq!(config.thread_name(), "test");
        assert_eq!(config.drain_timeout(), time::Duration::from_secs(5));
    }

    #[test]
    fn test_resolve_cores() {
        assert_eq!(resolve_cores(0, 8), 8);
        assert_eq!(resolve_cores(3, 8), 3);
        assert_eq!(resolve_cores(100, 8), 8);
    }

    #[test]
    fn test_runtime_builder() {
        let runtime = build(&RuntimeConfiguration::new().with_cores(1)).unwrap();
        assert_eq!(runtime.config.n_cores(), 1);
        let value = runtime.runtime.block_on(async { 40 + 2 });
        assert_eq!(value, 42);
    }
}
