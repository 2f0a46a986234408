//! Configuration module for the agent.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Scheduler settings (tick, immediate threshold, stop bounds)
//! - Publisher settings (interval, batch size limit, persistent limit, heartbeat)
//! - Router settings (dispatch interval)
//! - Logging filter and plugin properties

mod app;
mod validation;

pub use app::{AgentConfig, LoggingConfig, PublisherConfig, RouterConfig, SchedulerConfig};
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use app::{
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_HEARTBEAT_TOPIC, DEFAULT_LOG_FILTER,
    DEFAULT_PUBLISH_INTERVAL, DEFAULT_TICK,
};
