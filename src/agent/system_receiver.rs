//! Built-in receiver for agent control topics.

use strum_macros::{AsRefStr, EnumString};

use crate::connector::Receiver;

use super::handle::AgentHandle;

/// Control topics understood by [`SystemReceiver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SystemTopic {
    /// List data sources; payload is the reply topic prefix.
    Datasources,
    /// Replay history under `<payload>/history/`; an empty payload still
    /// replays, under `/history/`.
    History,
    /// Empty payload forces an immediate pull, otherwise an archive request.
    Headless,
}

/// Answers `datasources`, `history` and `headless` requests.
pub struct SystemReceiver {
    agent: AgentHandle,
}

impl SystemReceiver {
    pub fn new(agent: AgentHandle) -> Self {
        Self { agent }
    }
}

impl Receiver for SystemReceiver {
    fn receive(&self, id: &str, data: &[u8]) {
        let Ok(topic) = id.parse::<SystemTopic>() else {
            return;
        };
        let payload = String::from_utf8_lossy(data);

        match topic {
            SystemTopic::Datasources if !payload.is_empty() => {
                let reply = format!("{payload}/datasource");
                for unique_id in self.agent.bucket_ids() {
                    let config = self.agent.config_for(&unique_id);
                    let line = format!("{unique_id},{config}\n");
                    self.agent.send_message(&reply, line.as_bytes());
                }
            }
            SystemTopic::History => {
                let summary = self.agent.republish(&format!("{payload}/history/"));
                tracing::debug!(client = %payload, entries = summary.entries, "History replayed");
            }
            SystemTopic::Headless if payload.is_empty() => self.agent.immediate_update(),
            SystemTopic::Headless => self.agent.archive(&payload),
            SystemTopic::Datasources => {
                tracing::debug!(topic = %topic.as_ref(), "Control message without payload ignored")
            }
        }
    }
}

impl std::fmt::Debug for SystemReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemReceiver").finish_non_exhaustive()
    }
}
