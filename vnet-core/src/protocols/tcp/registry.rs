use super::{
    ports::PortTable, tcb::Tcb, tcp_session::VSocket, SocketError, SocketId, FIRST_SOCKET_ID,
};
use crate::{protocols::utility::Endpoints, FxDashMap};
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

/// Every live socket, and the ports they hold.
///
/// Lock order: a socket's control block may be locked before the port
/// table, never after.
pub struct Registry {
    sockets: FxDashMap<SocketId, Arc<VSocket>>,
    ports: Mutex<PortTable>,
    next_id: AtomicU32,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            sockets: Default::default(),
            ports: Mutex::new(PortTable::new()),
            next_id: AtomicU32::new(FIRST_SOCKET_ID),
        }
    }

    pub fn create(&self, tcb: Tcb) -> Arc<VSocket> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let socket = VSocket::new(id, tcb);
        self.sockets.insert(id, socket.clone());
        socket
    }

    pub fn get(&self, id: SocketId) -> Result<Arc<VSocket>, SocketError> {
        self.sockets
            .get(&id)
            .map(|socket| socket.clone())
            .ok_or(SocketError::NotSocket)
    }

    /// All sockets in order of creation.
    pub fn all(&self) -> Vec<Arc<VSocket>> {
        let mut sockets: Vec<_> = self.sockets.iter().map(|s| s.value().clone()).collect();
        sockets.sort_by_key(|socket| socket.id());
        sockets
    }

    pub fn ports(&self) -> MutexGuard<'_, PortTable> {
        self.ports.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The socket a segment arriving on `endpoints` belongs to.
    pub fn lookup(&self, endpoints: Endpoints) -> Option<Arc<VSocket>> {
        let id = self.ports().lookup(endpoints)?;
        self.get(id).ok()
    }

    /// Frees everything a socket holds and stops its tasks.
    pub fn release(&self, id: SocketId) {
        if let Some((_, socket)) = self.sockets.remove(&id) {
            self.ports().release(id);
            socket.terminate();
            tracing::info!("Released socket {}", id);
        }
    }

    pub fn release_all(&self) {
        let ids: Vec<_> = self.sockets.iter().map(|s| *s.key()).collect();
        for id in ids {
            self.release(id);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
