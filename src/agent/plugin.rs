//! Plugin capability trait.

use std::sync::Arc;

use crate::connector::{Connector, Receiver};
use crate::source::{PullSource, PushSource};

use super::error::PluginError;
use super::handle::AgentHandle;

/// A unit of extension wired into the agent at build time.
///
/// A plugin may contribute any mix of push sources, pull sources, one
/// connector and one receiver. Its position in the builder becomes its
/// provider id, which every record from its sources must carry.
pub trait Plugin: Send + Sync + 'static {
    /// Plugin name used in logs.
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "1.0"
    }

    /// Called once with the agent properties as `key=value` lines.
    ///
    /// An error removes the plugin from the agent.
    fn init(&self, properties: &str) -> Result<(), PluginError> {
        let _ = properties;
        Ok(())
    }

    /// Push sources; `agent` is how they submit data later.
    fn push_sources(&self, provider_id: u32, agent: &AgentHandle) -> Vec<Arc<dyn PushSource>> {
        let _ = (provider_id, agent);
        Vec::new()
    }

    /// Pull sources driven by the scheduler.
    fn pull_sources(&self, provider_id: u32) -> Vec<Arc<dyn PullSource>> {
        let _ = provider_id;
        Vec::new()
    }

    /// Outbound connector, created on every agent start.
    fn connector(&self, properties: &str) -> Option<Arc<dyn Connector>> {
        let _ = properties;
        None
    }

    /// Inbound receiver, registered on every agent start.
    fn receiver(&self) -> Option<Arc<dyn Receiver>> {
        None
    }

    fn start(&self) -> Result<(), PluginError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), PluginError> {
        Ok(())
    }
}
