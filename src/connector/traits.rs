//! Sink and receiver capabilities.

use std::sync::Arc;

use crate::bucket::PersistentHistory;

use super::error::ConnectorError;

/// Outbound transport for agent data.
///
/// Implementations must be callable from several threads; the router
/// serializes `send` calls but `start`/`stop` and registration may arrive from
/// the orchestrator thread.
pub trait Connector: Send + Sync + 'static {
    /// Stable identifier, unique among registered connectors.
    fn id(&self) -> &str;

    /// Deliver `data` on `topic`.
    fn send(&self, topic: &str, data: &[u8]) -> Result<(), ConnectorError>;

    /// Deliver a batch published from a bucket.
    ///
    /// `history` exposes that bucket's published persistent entries. The
    /// default ignores it.
    fn send_published(
        &self,
        topic: &str,
        data: &[u8],
        history: &PersistentHistory<'_>,
    ) -> Result<(), ConnectorError> {
        let _ = history;
        self.send(topic, data)
    }

    /// Hand the connector the handle inbound messages should be passed to.
    fn register_receiver(&self, receiver: Arc<dyn Receiver>) {
        let _ = receiver;
    }

    fn start(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// Handler for inbound control messages.
pub trait Receiver: Send + Sync + 'static {
    /// Handle a message addressed to `id`.
    fn receive(&self, id: &str, data: &[u8]);
}
