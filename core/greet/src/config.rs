// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0
//
// ConfigLoader reads the configuration file once and exposes lazy, cached
// accessors for every section. A section that fails to parse falls back to
// its defaults with a warning; unknown top-level keys are rejected up front.

use std::collections::HashSet;
use std::fmt::Debug;

use lazy_static::lazy_static;
use serde::de::DeserializeOwned;
use serde_yaml::{Value, from_str};
use thiserror::Error;
use tracing::{debug, warn};

use greet_rpc::ChannelConfig;
use greet_rpc::memory::MemoryConfig;
use greet_tracing::TracingConfiguration;

use crate::demo::DemoConfig;
use crate::runtime::RuntimeConfiguration;
use crate::service::GreetConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid configuration - impossible to parse yaml")]
    InvalidYaml,
    #[error("invalid configuration - key {0} not valid")]
    InvalidKey(String),
}

lazy_static! {
    static ref CONFIG_KEYS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("tracing");
        s.insert("runtime");
        s.insert("greet");
        s.insert("client");
        s.insert("transport");
        s.insert("demo");
        s
    };
}

#[derive(Default)]
pub struct ConfigLoader {
    root: Value,
    tracing: Option<TracingConfiguration>,
    runtime: Option<RuntimeConfiguration>,
    greet: Option<GreetConfig>,
    client: Option<ChannelConfig>,
    transport: Option<MemoryConfig>,
    demo: Option<DemoConfig>,
}

impl Debug for ConfigLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let root_keys = self
            .root
            .as_mapping()
            .map(|m| {
                m.keys()
                    .filter_map(|k| k.as_str())
                    .map(|s| s.to_string())
                    .collect::<Vec<String>>()
            })
            .unwrap_or_default();

        f.debug_struct("ConfigLoader")
            .field("root_keys", &root_keys)
            .field("tracing_loaded", &self.tracing.is_some())
            .field("runtime_loaded", &self.runtime.is_some())
            .finish()
    }
}

impl ConfigLoader {
    /// Load the configuration from a YAML file.
    pub fn new(file_path: &str) -> Result<Self, ConfigError> {
        let config_str =
            std::fs::read_to_string(file_path).map_err(|e| ConfigError::NotFound(e.to_string()))?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, ConfigError> {
        let root: Value = from_str(config_str).map_err(|_| ConfigError::InvalidYaml)?;

        // an empty document is a valid, all-defaults configuration
        if root.is_null() {
            return Ok(Self::empty());
        }

        let mapping = root.as_mapping().ok_or(ConfigError::InvalidYaml)?;
        for key in mapping.keys() {
            let k = key.as_str().ok_or(ConfigError::InvalidYaml)?;
            if !CONFIG_KEYS.contains(k) {
                return Err(ConfigError::InvalidKey(k.to_string()));
            }
        }

        Ok(Self {
            root,
            ..Self::default()
        })
    }

    /// Configuration made of defaults only
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn tracing(&mut self) -> &TracingConfiguration {
        self.tracing
            .get_or_insert_with(|| section(&self.root, "tracing"))
    }

    pub fn runtime(&mut self) -> &RuntimeConfiguration {
        self.runtime
            .get_or_insert_with(|| section(&self.root, "runtime"))
    }

    pub fn greet(&mut self) -> &GreetConfig {
        self.greet.get_or_insert_with(|| section(&self.root, "greet"))
    }

    pub fn client(&mut self) -> &ChannelConfig {
        self.client
            .get_or_insert_with(|| section(&self.root, "client"))
    }

    pub fn transport(&mut self) -> &MemoryConfig {
        self.transport
            .get_or_insert_with(|| section(&self.root, "transport"))
    }

    pub fn demo(&mut self) -> &DemoConfig {
        self.demo.get_or_insert_with(|| section(&self.root, "demo"))
    }
}

fn section<T>(root: &Value, key: &str) -> T
where
    T: DeserializeOwned + Default + Debug,
{
    let cfg = root
        .get(key)
        .cloned()
        .map(|v| {
            serde_yaml::from_value(v).unwrap_or_else(|e| {
                warn!(error = ?e, section = key, "invalid config section, falling back to default");
                T::default()
            })
        })
        .unwrap_or_default();
    debug!(section = key, ?cfg, "configuration section loaded");
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_sections_from_yaml() {
        let mut loader = ConfigLoader::from_yaml(
            r#"
tracing:
  log_level: debug
runtime:
  n_cores: 1
  thread_name: greet-test
greet:
  many_times_count: 3
  many_times_interval: 100ms
client:
  default_timeout: 2s
transport:
  buffer: 4
demo:
  short_deadline: 500ms
"#,
        )
        .unwrap();

        assert_eq!(loader.tracing().log_level(), "debug");
        assert_eq!(loader.runtime().n_cores(), 1);
        assert_eq!(loader.runtime().thread_name(), "greet-test");
        assert_eq!(loader.greet().many_times_count(), 3);
        assert_eq!(
            loader.greet().many_times_interval(),
            Duration::from_millis(100)
        );
        assert_eq!(
            loader.client().default_timeout(),
            Some(Duration::from_secs(2))
        );
        assert_eq!(loader.transport().buffer(), 4);
        assert_eq!(loader.demo().short_deadline(), Duration::from_millis(500));
        assert_eq!(loader.demo().long_deadline(), Duration::from_secs(5));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = ConfigLoader::from_yaml("services: {}\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidKey(k) if k == "services"));
    }

    #[test]
    fn test_invalid_section_falls_back_to_default() {
        let mut loader = ConfigLoader::from_yaml("greet:\n  many_times_count: lots\n").unwrap();
        assert_eq!(*loader.greet(), GreetConfig::default());
    }

    #[test]
    fn test_empty_document() {
        let mut loader = ConfigLoader::from_yaml("").unwrap();
        assert_eq!(loader.greet().many_times_count(), 10);
        assert_eq!(loader.client().default_timeout(), None);
    }

    #[test]
    fn test_sample_config() {
        let mut loader =
            ConfigLoader::new(concat!(env!("CARGO_MANIFEST_DIR"), "/config/greet.yaml")).unwrap();
        assert_eq!(loader.client().send_pacing(), Duration::from_secs(1));
        assert_eq!(loader.client().default_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(loader.greet().many_times_count(), 10);
        assert_eq!(loader.runtime().drain_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigLoader::new("/nonexistent/greet.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
