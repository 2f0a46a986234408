//! Agent and plugin error types.

use thiserror::Error;

use crate::config::ConfigError;
use crate::connector::RouterError;
use crate::source::SchedulerError;

/// Failure reported by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    /// Initialization failed; the plugin is skipped.
    #[error("plugin init failed: {0}")]
    Init(String),

    /// Start or stop failed.
    #[error("plugin lifecycle error: {0}")]
    Lifecycle(String),
}

/// Errors that can occur while building or starting the agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Pull workers could not be started.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// The router could not be started.
    #[error("router error: {0}")]
    Router(#[from] RouterError),

    /// A driver thread could not be created.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// `start` was called on a running agent.
    #[error("agent already running")]
    AlreadyRunning,
}
