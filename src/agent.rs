//! Agent Layer
//!
//! The orchestrator owning buckets, scheduler and router through one explicit
//! context, plus the plugin boundary and the built-in control receiver.
//!
//! # Architecture
//!
//! - [`AgentBuilder`]: Initializes plugins and creates one bucket per source
//! - [`Agent`]: Start/stop lifecycle, pull tick and publish drivers
//! - [`AgentHandle`]: Weak access for plugins, push sources and receivers
//! - [`Plugin`]: Contributes sources, a connector and a receiver
//! - [`SystemReceiver`]: Answers `datasources`, `history` and `headless`
//! - [`ConfigurationConnector`]: Records `configuration/<source>` messages
//!
//! # Example
//!
//! ```rust,no_run
//! use oculus_agent::agent::Agent;
//! use oculus_agent::config::AgentConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let agent = Agent::builder(AgentConfig::default()).build()?;
//! agent.start()?;
//! // ...
//! agent.stop();
//! # Ok(())
//! # }
//! ```

mod config_connector;
mod context;
mod error;
mod handle;
mod plugin;
mod runtime;
mod system_receiver;

pub use config_connector::{
    CONFIGURATION_CONNECTOR_ID, CONFIGURATION_TOPIC_PREFIX, ConfigurationConnector,
};
pub use context::ArchiveHook;
pub use error::{AgentError, PluginError};
pub use handle::AgentHandle;
pub use plugin::Plugin;
pub use runtime::{Agent, AgentBuilder, VERSION};
pub use system_receiver::{SystemReceiver, SystemTopic};
