//! The [`Protocol`] trait and supporting types.
//!
//! Every protocol that sits on top of the forwarding engine implements
//! [`Protocol`] and is registered with [`Ipv4::register`](crate::protocols::Ipv4::register)
//! under its protocol number. Locally delivered packets carrying that number
//! are handed to [`Protocol::demux`].
//!
//! # Async trait
//!
//! Due to the nature of the [`async_trait::async_trait`] macro,
//! this looks like a mess when viewed with `cargo doc`.
//! When you create your own protocol, you can do it like so:
//!
//! ```
//! use vnet_core::protocol::*;
//! use vnet_core::protocols::ipv4::{Ipv4Packet, ProtocolNumber};
//! use vnet_core::Shutdown;
//!
//! struct MyProtocol {}
//!
//! #[async_trait::async_trait]
//! impl Protocol for MyProtocol {
//!     fn protocol_number(&self) -> ProtocolNumber {
//!         ProtocolNumber::Other(143)
//!     }
//!
//!     async fn start(&self, shutdown: Shutdown) -> Result<(), StartError> {
//!         Ok(())
//!     }
//!
//!     fn demux(&self, packet: Ipv4Packet) -> Result<(), DemuxError> {
//!         Ok(())
//!     }
//! }
//! ```

use crate::{
    protocols::ipv4::{ipv4_parsing, Ipv4Packet, ProtocolNumber},
    Shutdown,
};
use std::sync::Arc;

/// A protocol stacked on the forwarding engine.
#[async_trait::async_trait]
pub trait Protocol: Send + Sync + 'static {
    /// The IP protocol number this protocol receives packets for.
    fn protocol_number(&self) -> ProtocolNumber;

    /// Starts the protocol running. This gives protocols an opportunity to
    /// spawn background tasks. Implementors may store the `shutdown` handle
    /// and wait on it to stop those tasks.
    async fn start(&self, shutdown: Shutdown) -> Result<(), StartError>;

    /// Accepts a packet addressed to this node. Implementors should not
    /// block here; work that waits belongs in a task.
    fn demux(&self, packet: Ipv4Packet) -> Result<(), DemuxError>;
}

pub type SharedProtocol = Arc<dyn Protocol>;

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum DemuxError {
    #[error("Failed to find a session to demux to")]
    MissingSession,
    #[error("The session was closed")]
    ClosedSession,
    #[error("No protocol is registered for {0:?}")]
    MissingProtocol(ProtocolNumber),
    #[error("Failed to parse a header during demux")]
    Header,
    #[error("Unspecified demux error")]
    Other,
}

impl From<ipv4_parsing::ParseError> for DemuxError {
    fn from(_: ipv4_parsing::ParseError) -> Self {
        Self::Header
    }
}

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum StartError {
    #[error("The protocol could not reach its neighbors")]
    Unreachable,
    #[error("Unspecified error")]
    Other,
}
