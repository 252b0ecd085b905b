//! The protocols a node runs.

pub mod ipv4;
pub use ipv4::Ipv4;

pub mod rip;
pub use rip::Rip;

pub mod echo;
pub use echo::Echo;

pub mod tcp;
pub use tcp::Tcp;

pub mod utility;
pub use utility::{Endpoint, Endpoints};
