//! Oculus Agent - Telemetry Agent Runtime
//!
//! This crate provides the runtime core of a pluggable telemetry agent. Data
//! produced by plugin sources is buffered per source under a byte budget and
//! periodically published to every registered connector, while inbound
//! control messages are routed back to receivers.
//!
//! # Architecture
//!
//! - **Source**: Data record contract and the pull scheduler (one worker per source)
//! - **Bucket**: Bounded per-source buffers with spill and a publish cursor
//! - **Connector**: Outbound fan-out and inbound dispatch
//! - **Agent**: Orchestration of the above through one owned context
//! - **Config**: YAML configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use oculus_agent::{Agent, AgentConfig};
//!
//! let agent = Agent::builder(AgentConfig::load("configs/agent.yaml")?)
//!     .plugin(CpuPlugin::default())
//!     .connector(Arc::new(MqttConnector::new(broker)))
//!     .build()?;
//! agent.start()?;
//! ```

pub mod agent;
pub mod bucket;
pub mod config;
pub mod connector;
pub mod source;

pub use agent::{Agent, AgentBuilder, AgentError, AgentHandle, Plugin, PluginError};
pub use bucket::{BucketError, BucketRegistry, DataBucket};
pub use config::{AgentConfig, ConfigError};
pub use connector::{Connector, ConnectorError, FanOutReport, MessageRouter, Receiver};
pub use source::{MonitorData, PullSource, PushSource, SourceHeader};
