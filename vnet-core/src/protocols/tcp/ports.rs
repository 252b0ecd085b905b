use super::{SocketError, SocketId};
use crate::protocols::utility::Endpoints;
use rand::Rng;
use rustc_hash::FxHashMap;

pub const MIN_PORT: u16 = 1024;
pub const MAX_PORT: u16 = 65535;

/// Which socket owns each port, and which socket each connection or
/// listening address belongs to.
///
/// Listening sockets are filed under [`Endpoints::wildcard`].
#[derive(Debug, Default)]
pub struct PortTable {
    owners: FxHashMap<u16, SocketId>,
    connections: FxHashMap<Endpoints, SocketId>,
}

impl PortTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gives `port` to `socket`.
    pub fn claim(&mut self, port: u16, socket: SocketId) -> Result<(), SocketError> {
        if self.owners.contains_key(&port) {
            Err(SocketError::AddressInUse)?
        }
        self.owners.insert(port, socket);
        Ok(())
    }

    /// Gives `socket` an unused port from the ephemeral range.
    pub fn claim_ephemeral(&mut self, socket: SocketId) -> Result<u16, SocketError> {
        let span = (MAX_PORT - MIN_PORT) as u32 + 1;
        let start = rand::thread_rng().gen_range(0..span);
        let port = (0..span)
            .map(|i| MIN_PORT + ((start + i) % span) as u16)
            .find(|port| !self.owners.contains_key(port))
            .ok_or(SocketError::NoFreePorts)?;
        self.owners.insert(port, socket);
        Ok(port)
    }

    pub fn add(&mut self, endpoints: Endpoints, socket: SocketId) {
        self.connections.insert(endpoints, socket);
    }

    pub fn is_connected(&self, endpoints: Endpoints) -> bool {
        self.connections.contains_key(&endpoints)
    }

    /// Finds the socket for a segment arriving on `endpoints`, seen from
    /// this side. A listening socket catches what no connection claims.
    pub fn lookup(&self, endpoints: Endpoints) -> Option<SocketId> {
        self.connections
            .get(&endpoints)
            .or_else(|| {
                self.connections
                    .get(&Endpoints::wildcard(endpoints.local.port))
            })
            .copied()
    }

    /// Removes everything `socket` holds.
    pub fn release(&mut self, socket: SocketId) {
        self.connections.retain(|_, owner| *owner != socket);
        self.owners.retain(|_, owner| *owner != socket);
    }
}
