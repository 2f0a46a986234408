//! Agent configuration structures.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bucket::DEFAULT_PUBLISH_SIZE_LIMIT;
use crate::connector::DEFAULT_DISPATCH_INTERVAL;
use crate::source::{DEFAULT_IMMEDIATE_THRESHOLD, DEFAULT_STOP_POLL, DEFAULT_STOP_TIMEOUT};

use super::validation::{ConfigError, expand_env_vars, require_positive, require_topic};

// =============================================================================
// Constants
// =============================================================================

/// Default pull scheduler tick (1 second).
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Default publish interval (2 seconds).
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(2);

/// Default heartbeat interval (20 seconds).
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Default heartbeat topic.
pub const DEFAULT_HEARTBEAT_TOPIC: &str = "heartbeat";

/// Default tracing filter.
pub const DEFAULT_LOG_FILTER: &str = "info,oculus_agent=debug";

// =============================================================================
// Scheduler Configuration
// =============================================================================

/// Pull scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Tick length; pull intervals are counted in ticks (default: 1s).
    #[serde(with = "humantime_serde")]
    pub tick: Duration,

    /// Immediate updates only force sources whose next pull is more than
    /// this many ticks away (default: 120).
    pub immediate_threshold: u32,

    /// Upper bound on waiting for workers at shutdown (default: 5s).
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,

    /// Delay between stopped-checks at shutdown (default: 100ms).
    #[serde(with = "humantime_serde")]
    pub stop_poll: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            immediate_threshold: DEFAULT_IMMEDIATE_THRESHOLD,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            stop_poll: DEFAULT_STOP_POLL,
        }
    }
}

// =============================================================================
// Publisher Configuration
// =============================================================================

/// Publish loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Delay between publish passes (default: 2s).
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Maximum bytes per transmission (default: 1 MiB).
    pub size_limit: u32,

    /// Maximum resident persistent bytes per bucket (default: bucket capacity).
    pub persistent_limit: Option<u32>,

    /// Delay between heartbeats (default: 20s).
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    /// Topic heartbeats are sent on (default: "heartbeat").
    pub heartbeat_topic: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_PUBLISH_INTERVAL,
            size_limit: DEFAULT_PUBLISH_SIZE_LIMIT,
            persistent_limit: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_topic: DEFAULT_HEARTBEAT_TOPIC.to_string(),
        }
    }
}

// =============================================================================
// Router Configuration
// =============================================================================

/// Message router configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Delay between inbound dispatch passes (default: 1s).
    #[serde(with = "humantime_serde")]
    pub dispatch_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            dispatch_interval: DEFAULT_DISPATCH_INTERVAL,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

// =============================================================================
// Agent Configuration
// =============================================================================

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub scheduler: SchedulerConfig,

    pub publisher: PublisherConfig,

    pub router: RouterConfig,

    pub logging: LoggingConfig,

    /// Properties handed to plugins at init.
    pub properties: BTreeMap<String, String>,
}

impl AgentConfig {
    /// Load configuration from a YAML file.
    ///
    /// `${VAR}` and `${VAR:-default}` references are expanded before parsing.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate configuration from YAML text.
    ///
    /// # Errors
    /// Returns `ConfigError` if the text cannot be parsed or validated.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(&expand_env_vars(content))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("scheduler tick", self.scheduler.tick)?;
        require_positive("scheduler stop_poll", self.scheduler.stop_poll)?;
        require_positive("publisher interval", self.publisher.interval)?;
        require_positive("router dispatch_interval", self.router.dispatch_interval)?;

        if self.publisher.size_limit == 0 {
            return Err(ConfigError::ValidationError(
                "publisher size_limit must be positive".to_string(),
            ));
        }

        if self.publisher.heartbeat_interval < self.publisher.interval {
            return Err(ConfigError::ValidationError(format!(
                "publisher heartbeat_interval ({:?}) must not be shorter than interval ({:?})",
                self.publisher.heartbeat_interval, self.publisher.interval
            )));
        }

        require_topic("publisher heartbeat_topic", &self.publisher.heartbeat_topic)?;

        if let Some(key) = self.properties.keys().find(|k| k.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "property key must not be empty: '{key}'"
            )));
        }

        Ok(())
    }

    /// Properties rendered as `key=value` lines, the form plugins receive.
    pub fn properties_blob(&self) -> String {
        self.properties
            .iter()
            .map(|(k, v)| format!("{k}={v}\n"))
            .collect()
    }
}
