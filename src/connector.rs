//! Connector Layer
//!
//! Outbound fan-out of published data to every registered sink and inbound
//! fan-in of control messages to every registered receiver.
//!
//! # Architecture
//!
//! - [`Connector`]: An outbound transport (sink)
//! - [`Receiver`]: An inbound message handler
//! - [`MessageRouter`]: Holds both sets; a send lock serializes outbound
//!   traffic, while inbound messages are queued and delivered by a dedicated
//!   dispatch thread
//!
//! Fan-out never stops at the first failing sink: every call returns a
//! [`FanOutReport`] with one outcome per connector.

mod error;
mod router;
mod traits;

pub use error::{ConnectorError, RouterError};
pub use router::{
    DEFAULT_DISPATCH_INTERVAL, FanOutReport, MessageRouter, ReceivedMessage, SinkFailure,
};
pub use traits::{Connector, Receiver};
