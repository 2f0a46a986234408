//! Connector and router error types.

use thiserror::Error;

/// Failure reported by a single connector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    /// Delivery to the transport failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Start or stop failed.
    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    /// The connector panicked inside a call.
    #[error("connector panicked: {0}")]
    Panicked(String),
}

/// Errors from the router itself.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The dispatch thread could not be created.
    #[error("failed to spawn dispatch thread: {0}")]
    Spawn(#[from] std::io::Error),
}
