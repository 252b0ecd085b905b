//! A virtual internetwork run in user space.
//!
//! Each process is one [`Node`]. Nodes reach their neighbors over
//! point-to-point links, usually UDP sockets on the host, and run the
//! virtual network on top of them.
//!
//! # Organization
//! - [`Link`](link::Link) carries frames between neighboring nodes
//! - [`Ipv4`](protocols::Ipv4) delivers packets locally or forwards them
//!   along the routes in its [`Rib`](rib::Rib)
//! - [`Protocol`] is implemented by everything stacked on top: the
//!   [`Rip`](protocols::Rip) routing protocol, the [`Echo`](protocols::Echo)
//!   test protocol, and the [`Tcp`](protocols::Tcp) transport
//!
//! # Logging
//!
//! The library reports through [`tracing`] and never installs a subscriber.
//! Packets are logged under the `PACKET` target, segments under `SEGMENT`,
//! and route changes under `ROUTE`.

pub mod logging;

pub mod shutdown;
pub use shutdown::Shutdown;

pub mod protocol;
pub use protocol::Protocol;

pub mod link;
pub mod links;

pub mod interfaces;
pub mod rib;

pub mod protocols;

mod node;
pub use node::{Node, NodeError};

/// A [`dashmap::DashMap`] using the faster [`rustc_hash`] hasher.
pub type FxDashMap<K, V> =
    dashmap::DashMap<K, V, std::hash::BuildHasherDefault<rustc_hash::FxHasher>>;
