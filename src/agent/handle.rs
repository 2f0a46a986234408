//! Weak handle to the agent for plugins and built-in receivers.

use std::sync::{Arc, Weak};

use crate::bucket::PublishSummary;
use crate::connector::FanOutReport;
use crate::source::MonitorData;

use super::context::AgentContext;

/// Cloneable, non-owning access to a running agent.
///
/// The router owns the receivers that hold handles, so the handle must not
/// keep the agent alive. Every call is a no-op once the agent is dropped.
#[derive(Clone)]
pub struct AgentHandle {
    context: Weak<AgentContext>,
}

impl AgentHandle {
    pub(crate) fn new(context: &Arc<AgentContext>) -> Self {
        Self {
            context: Arc::downgrade(context),
        }
    }

    /// A handle not attached to any agent.
    pub fn detached() -> Self {
        Self {
            context: Weak::new(),
        }
    }

    /// Store a record in its bucket. Returns `false` if it was dropped.
    pub fn push_data(&self, data: &MonitorData) -> bool {
        self.context
            .upgrade()
            .is_some_and(|context| context.add_data(data))
    }

    /// Send to every connector.
    pub fn send_message(&self, topic: &str, data: &[u8]) -> FanOutReport {
        self.context
            .upgrade()
            .map(|context| context.router.send_message(topic, data))
            .unwrap_or_default()
    }

    /// Queue an inbound message for the receivers.
    pub fn receive_message(&self, id: &str, data: &[u8]) {
        if let Some(context) = self.context.upgrade() {
            context.router.receive_message(id, data);
        }
    }

    /// Request a pull of every source on the next tick.
    pub fn immediate_update(&self) {
        if let Some(context) = self.context.upgrade() {
            context.immediate_update();
        }
    }

    /// Replay all published history under `prefix`.
    pub fn republish(&self, prefix: &str) -> PublishSummary {
        self.context
            .upgrade()
            .map(|context| context.republish(prefix))
            .unwrap_or_default()
    }

    pub fn property(&self, key: &str) -> Option<String> {
        self.context.upgrade()?.property(key)
    }

    pub fn bucket_ids(&self) -> Vec<String> {
        self.context
            .upgrade()
            .map(|context| context.bucket_ids())
            .unwrap_or_default()
    }

    /// Latest configuration string published for `source`.
    pub fn config_for(&self, source: &str) -> String {
        self.context
            .upgrade()
            .map(|context| context.config_for(source))
            .unwrap_or_default()
    }

    pub(crate) fn archive(&self, request: &str) {
        if let Some(context) = self.context.upgrade() {
            context.archive(request);
        }
    }

    /// Returns `true` while the agent still exists.
    pub fn is_attached(&self) -> bool {
        self.context.strong_count() > 0
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("attached", &self.is_attached())
            .finish()
    }
}
