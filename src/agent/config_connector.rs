//! Connector capturing per-source configuration messages.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::connector::{Connector, ConnectorError};

/// Topic prefix sources publish their configuration under.
pub const CONFIGURATION_TOPIC_PREFIX: &str = "configuration/";

/// Connector id.
pub const CONFIGURATION_CONNECTOR_ID: &str = "ConfigurationConnector";

/// Keeps the latest configuration string sent on `configuration/<source>`.
///
/// Messages on other topics are accepted and ignored.
#[derive(Debug, Default)]
pub struct ConfigurationConnector {
    configs: RwLock<BTreeMap<String, String>>,
}

impl ConfigurationConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest configuration recorded for `source`.
    pub fn config(&self, source: &str) -> Option<String> {
        self.configs.read().get(source).cloned()
    }
}

impl Connector for ConfigurationConnector {
    fn id(&self) -> &str {
        CONFIGURATION_CONNECTOR_ID
    }

    fn send(&self, topic: &str, data: &[u8]) -> Result<(), ConnectorError> {
        if let Some(source) = topic.strip_prefix(CONFIGURATION_TOPIC_PREFIX) {
            self.configs
                .write()
                .insert(source.to_string(), String::from_utf8_lossy(data).into_owned());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captures_configuration_topics() {
        let connector = ConfigurationConnector::new();
        connector.send("configuration/cpu", b"interval=2").unwrap();
        connector.send("configuration/cpu", b"interval=5").unwrap();
        assert_eq!(connector.config("cpu").as_deref(), Some("interval=5"));
    }

    #[test]
    fn test_ignores_other_topics() {
        let connector = ConfigurationConnector::new();
        connector.send("cpu", b"sample").unwrap();
        connector.send("heartbeat", b"").unwrap();
        assert!(connector.config("cpu").is_none());
    }
}
