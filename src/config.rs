//! Configuration management for Floodgate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{FloodgateError, Result};
use crate::throttle::{ThrottleConfig, DEFAULT_DECAY_SECONDS, DEFAULT_MAX_ATTEMPTS};

/// Main configuration for Floodgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Throttle limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Which counter store to run on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// In-process store; counters do not outlive the process
    Memory,
    /// Redis store
    Redis(RedisConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory
    }
}

/// Redis store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Prefix prepended to every counter key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "floodgate:".to_string()
}

/// Throttle limits: a default plus overrides per key namespace.
///
/// A key's namespace is the part before its first `:`, so `login:10.0.0.1`
/// picks up the `login` override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Hits allowed per window when no override matches
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u64,

    /// Window length in seconds when no override matches
    #[serde(default = "default_decay_seconds")]
    pub decay_seconds: u64,

    /// Overrides by key namespace
    #[serde(default)]
    pub resources: HashMap<String, LimitRule>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            decay_seconds: default_decay_seconds(),
            resources: HashMap::new(),
        }
    }
}

fn default_max_attempts() -> u64 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_decay_seconds() -> u64 {
    DEFAULT_DECAY_SECONDS
}

/// A limit override for one key namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRule {
    /// Hits allowed per window
    pub max_attempts: u64,
    /// Window length in seconds
    #[serde(default = "default_decay_seconds")]
    pub decay_seconds: u64,
}

impl LimitsConfig {
    /// Find the override for a key's namespace, if any.
    pub fn find_rule(&self, key: &str) -> Option<&LimitRule> {
        let namespace = key.split(':').next().unwrap_or(key);
        self.resources.get(namespace)
    }

    /// Build the validated throttle configuration for a key.
    pub fn resolve(&self, key: &str) -> Result<ThrottleConfig> {
        let (max_attempts, decay_seconds) = match self.find_rule(key) {
            Some(rule) => (rule.max_attempts, rule.decay_seconds),
            None => (self.max_attempts, self.decay_seconds),
        };
        ThrottleConfig::with_limits(key, max_attempts, decay_seconds)
    }
}

impl FloodgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(format!("Failed to parse configuration: {}", e)))
    }
}
