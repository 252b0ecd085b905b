//! Contains the [`Link`] trait and supporting types.
//!
//! A link is the physical layer beneath the virtual network. Each interface
//! of a node is one point-to-point link to one neighbor, identified by the
//! neighbor's virtual address.

use crate::protocols::ipv4::Ipv4Address;
use std::fmt::{self, Display};
use tokio::sync::mpsc;

/// The largest frame any link carries.
pub const UDP_FRAME_SIZE: usize = 1400;

/// A frame received from a neighbor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The virtual address of the neighbor at the far end of the link the
    /// frame arrived on.
    pub neighbor: Ipv4Address,
    pub bytes: Vec<u8>,
}

/// The channel on which links hand received frames to the node.
pub type FrameSender = mpsc::UnboundedSender<Frame>;
pub type FrameReceiver = mpsc::UnboundedReceiver<Frame>;

/// Transmits frames to the neighbors of a node.
pub trait Link: Send + Sync + 'static {
    /// Sends one frame to the neighbor with the given virtual address.
    fn send(&self, frame: &[u8], neighbor: Ipv4Address) -> Result<(), LinkError>;
}

/// A physical endpoint, such as `localhost:5000`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhysicalAddress {
    pub host: String,
    pub port: u16,
}

impl PhysicalAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One line of a topology file: the two ends of a link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkConfig {
    pub local: PhysicalAddress,
    pub local_vip: Ipv4Address,
    pub remote: PhysicalAddress,
    pub remote_vip: Ipv4Address,
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("No link leads to {0}")]
    NoSuchNeighbor(Ipv4Address),
    #[error("A frame of {0} bytes exceeds the link frame size")]
    FrameTooLarge(usize),
    #[error("Could not resolve {0}")]
    Resolve(PhysicalAddress),
    #[error("The link is not accepting frames")]
    Closed,
    #[error("{0}")]
    Io(#[from] std::io::Error),
}
