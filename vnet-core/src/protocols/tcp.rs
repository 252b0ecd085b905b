//! A reliable byte-stream transport in the style of the [Transmission Control
//! Protocol](https://www.rfc-editor.org/rfc/rfc9293.html).
//!
//! Applications name sockets by the integers [`Tcp::socket`] hands out and
//! drive them through calls shaped like the BSD socket API. Each connected
//! socket is served by a receive task and a send task, see
//! `tcp_session.rs`. The per-connection rules live in the control block in
//! `tcb.rs`, which does no I/O of its own.

use self::{
    registry::Registry,
    tcb::{Action, Handshake, Tcb},
    tcp_parsing::TcpSegment,
    tcp_session::{Incoming, VSocket},
};
use crate::{
    logging::segment_event,
    protocol::{DemuxError, Protocol, StartError},
    protocols::{
        ipv4::{Ipv4, Ipv4Address, Ipv4Packet, ProtocolNumber},
        utility::{Endpoint, Endpoints},
    },
    Shutdown,
};
use std::{str::FromStr, sync::Arc, time::Duration};
use tokio::time::{timeout, timeout_at, Instant};

mod ports;
mod registry;
mod socket_error;
pub mod tcb;
pub mod tcp_parsing;
mod tcp_session;

pub use ports::{MAX_PORT, MIN_PORT};
pub use socket_error::SocketError;
pub use tcb::State;

/// Identifies a socket on one node.
pub type SocketId = u32;

/// The most payload carried by one segment.
pub const TCP_MTU: usize = 1350;
/// Receive buffer capacity, and the largest window we advertise.
pub const DEFAULT_WINDOW: u16 = 65535;
/// How long a socket lingers in TIME_WAIT.
pub const TIME_WAIT: Duration = Duration::from_secs(60);
/// How many times `connect` resends its SYN before giving up.
pub const HANDSHAKE_RETRIES: u32 = 3;
/// How long `connect` first waits for a reply. Doubles with each retry.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);
/// How long `accept` waits for the last ACK of the handshake.
pub const ACCEPT_ACK_TIMEOUT: Duration = Duration::from_secs(8);
/// The id of the first socket created. Lower ids are never used.
pub const FIRST_SOCKET_ID: SocketId = 2;

/// Which halves of a connection [`Tcp::shutdown`] closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Write,
    Read,
    Both,
}

impl ShutdownMode {
    fn reads(self) -> bool {
        matches!(self, Self::Read | Self::Both)
    }

    fn writes(self) -> bool {
        matches!(self, Self::Write | Self::Both)
    }
}

impl FromStr for ShutdownMode {
    type Err = SocketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "write" => Ok(Self::Write),
            "read" => Ok(Self::Read),
            "both" => Ok(Self::Both),
            _ => Err(SocketError::InvalidShutdown),
        }
    }
}

impl TryFrom<u8> for ShutdownMode {
    type Error = SocketError;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        match n {
            1 => Ok(Self::Write),
            2 => Ok(Self::Read),
            3 => Ok(Self::Both),
            _ => Err(SocketError::InvalidShutdown),
        }
    }
}

/// A snapshot of one socket for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketInfo {
    pub id: SocketId,
    pub state: State,
    pub endpoints: Endpoints,
    /// Bytes we may still send before filling the peer's window
    pub send_window: u32,
    /// Free space in our receive buffer
    pub recv_window: u16,
}

/// The transport protocol and its socket API.
pub struct Tcp {
    ipv4: Arc<Ipv4>,
    registry: Arc<Registry>,
}

impl Tcp {
    pub fn new(ipv4: Arc<Ipv4>) -> Self {
        Self {
            ipv4,
            registry: Arc::new(Registry::new()),
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Creates a closed, unbound socket.
    pub fn socket(&self) -> SocketId {
        let socket = self.registry.create(Tcb::new(Endpoints::default()));
        tracing::debug!("Created socket {}", socket.id());
        socket.id()
    }

    /// Gives a closed socket a local port.
    pub fn bind(&self, id: SocketId, port: u16) -> Result<(), SocketError> {
        let socket = self.registry.get(id)?;
        let mut tcb = socket.tcb();
        if tcb.state() != State::Closed || tcb.endpoints().local.port != 0 {
            Err(SocketError::BadDescriptor)?
        }
        self.registry.ports().claim(port, id)?;
        tcb.set_local_port(port);
        Ok(())
    }

    /// Starts accepting connections on the socket's port, binding an
    /// ephemeral one first if needed.
    pub fn listen(&self, id: SocketId) -> Result<(), SocketError> {
        let socket = self.registry.get(id)?;
        let mut tcb = socket.tcb();
        tcb.check(Action::PassiveOpen)?;
        let port = match tcb.endpoints().local.port {
            0 => self.registry.ports().claim_ephemeral(id)?,
            port => port,
        };
        tcb.set_local_port(port);
        self.registry.ports().add(Endpoints::wildcard(port), id);
        tcb.listen()
    }

    /// Waits for a connection on a listening socket and completes its
    /// handshake, returning the new connection's socket.
    pub async fn accept(&self, id: SocketId) -> Result<SocketId, SocketError> {
        let listener = self.registry.get(id)?;
        listener.tcb().check(Action::ReceiveSyn)?;

        let (syn, endpoints) = {
            let mut inbound = listener.inbound().await;
            loop {
                let incoming = tokio::select! {
                    _ = listener.cancelled() => return Err(SocketError::BadDescriptor),
                    incoming = inbound.recv() => match incoming {
                        Some(incoming) => incoming,
                        None => return Err(SocketError::BadDescriptor),
                    },
                };
                let ctl = incoming.segment.header.ctl;
                // A resent SYN may be queued here after its connection
                // already exists
                if ctl.syn()
                    && !ctl.ack()
                    && !self.registry.ports().is_connected(incoming.endpoints)
                {
                    break (incoming.segment, incoming.endpoints);
                }
                tracing::debug!(
                    "Listening socket {} ignored a {} segment",
                    id,
                    incoming.segment.header.ctl
                );
            }
        };

        let socket = self
            .registry
            .create(Tcb::accept(endpoints, &syn, rand::random())?);
        self.registry.ports().add(endpoints, socket.id());
        if socket.flush(&self.ipv4).is_err() {
            self.registry.release(socket.id());
            Err(SocketError::CommunicationError)?
        }

        let deadline = Instant::now() + ACCEPT_ACK_TIMEOUT;
        let mut inbound = socket.inbound().await;
        loop {
            let incoming = match timeout_at(deadline, inbound.recv()).await {
                Ok(Some(incoming)) => incoming,
                Ok(None) | Err(_) => {
                    drop(inbound);
                    self.registry.release(socket.id());
                    return Err(SocketError::TimerExpired);
                }
            };
            let handshake = socket
                .tcb()
                .handshake_arrives(incoming.segment, incoming.arrived);
            match handshake {
                Ok(handshake) => {
                    socket.flush_or_log(&self.ipv4);
                    if handshake == Handshake::Established {
                        break;
                    }
                }
                Err(e) => {
                    drop(inbound);
                    self.registry.release(socket.id());
                    return Err(e);
                }
            }
        }
        drop(inbound);

        tracing::info!("Socket {} accepted {} as socket {}", id, endpoints, socket.id());
        let new_id = socket.id();
        tcp_session::spawn(socket, self.ipv4.clone(), self.registry.clone());
        Ok(new_id)
    }

    /// Opens a connection to `address:port`. Gives up after the SYN has
    /// gone unanswered [`HANDSHAKE_RETRIES`] times.
    pub async fn connect(
        &self,
        id: SocketId,
        address: Ipv4Address,
        port: u16,
    ) -> Result<(), SocketError> {
        let socket = self.registry.get(id)?;
        // A socket that is already open stays as it is
        socket.tcb().check(Action::ActiveOpen)?;

        let Some(local) = self.ipv4.local_vip_toward_destination(address) else {
            self.registry.release(id);
            return Err(SocketError::HostUnreachable);
        };
        let bound = socket.tcb().endpoints().local.port;
        let claimed = match bound {
            0 => self.registry.ports().claim_ephemeral(id),
            port => Ok(port),
        };
        let local_port = match claimed {
            Ok(port) => port,
            Err(e) => {
                self.registry.release(id);
                return Err(e);
            }
        };
        let endpoints = Endpoints::new(
            Endpoint::new(local, local_port),
            Endpoint::new(address, port),
        );
        self.registry.ports().add(endpoints, id);
        socket.tcb().open(endpoints, rand::random())?;

        let mut inbound = socket.inbound().await;
        let mut wait = HANDSHAKE_TIMEOUT;
        let mut retries = 0;
        let result = loop {
            if socket.flush(&self.ipv4).is_err() {
                break Err(SocketError::CommunicationError);
            }
            match timeout(wait, inbound.recv()).await {
                Err(_) => {
                    if retries == HANDSHAKE_RETRIES {
                        break Err(SocketError::TimerExpired);
                    }
                    retries += 1;
                    wait *= 2;
                    tracing::debug!("Socket {} resending SYN, attempt {}", id, retries);
                    socket.tcb().resend_syn();
                }
                Ok(None) => break Err(SocketError::ConnectionReset),
                Ok(Some(incoming)) => {
                    let handshake = socket
                        .tcb()
                        .handshake_arrives(incoming.segment, incoming.arrived);
                    match handshake {
                        Ok(Handshake::Established) => {
                            break socket
                                .flush(&self.ipv4)
                                .map_err(|_| SocketError::CommunicationError)
                        }
                        Ok(_) => {}
                        Err(e) => break Err(e),
                    }
                }
            }
        };
        drop(inbound);

        match result {
            Ok(()) => {
                tracing::info!("Socket {} connected {}", id, endpoints);
                tcp_session::spawn(socket, self.ipv4.clone(), self.registry.clone());
                Ok(())
            }
            Err(e) => {
                tracing::info!("Socket {} failed to connect to {}: {}", id, endpoints.remote, e);
                self.registry.release(id);
                Err(e)
            }
        }
    }

    /// Reads up to `n` bytes, waiting while none are available. An empty
    /// result means the peer has finished sending.
    pub async fn read(&self, id: SocketId, n: usize) -> Result<Vec<u8>, SocketError> {
        let socket = self.registry.get(id)?;
        let data = socket.wait_for(|tcb| tcb.read(n).transpose()).await?;
        // Reading may have opened the window enough to announce it
        socket.flush_or_log(&self.ipv4);
        Ok(data)
    }

    /// Reads until `n` bytes arrive or the stream ends.
    pub async fn read_all(&self, id: SocketId, n: usize) -> Result<Vec<u8>, SocketError> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let data = self.read(id, n - out.len()).await?;
            if data.is_empty() {
                break;
            }
            out.extend_from_slice(&data);
        }
        Ok(out)
    }

    /// Queues as much of `data` as the send buffer holds.
    pub fn write(&self, id: SocketId, data: &[u8]) -> Result<usize, SocketError> {
        let socket = self.registry.get(id)?;
        let written = socket.tcb().write(data)?;
        socket.wake_sender();
        Ok(written)
    }

    /// Queues all of `data`, waiting for buffer space as needed.
    pub async fn write_all(&self, id: SocketId, data: &[u8]) -> Result<usize, SocketError> {
        let socket = self.registry.get(id)?;
        let mut written = 0;
        while written < data.len() {
            let rest = &data[written..];
            written += socket
                .wait_for(|tcb| match tcb.write(rest) {
                    Err(SocketError::WouldBlock) => None,
                    result => Some(result),
                })
                .await?;
            socket.wake_sender();
        }
        Ok(written)
    }

    pub async fn shutdown(&self, id: SocketId, mode: ShutdownMode) -> Result<(), SocketError> {
        let socket = self.registry.get(id)?;
        if mode.reads() {
            socket.tcb().shut_read();
        }
        if mode.writes() {
            self.shut_write(&socket).await?;
        }
        Ok(())
    }

    /// Shuts the socket for writing. A socket that never connected is
    /// released outright.
    pub async fn close(&self, id: SocketId) -> Result<(), SocketError> {
        let socket = self.registry.get(id)?;
        if self.shut_write(&socket).await? {
            self.registry.release(id);
        }
        Ok(())
    }

    /// Returns whether the socket closed without a FIN exchange.
    async fn shut_write(&self, socket: &VSocket) -> Result<bool, SocketError> {
        {
            let mut tcb = socket.tcb();
            if tcb.state().allows(Action::Close) {
                tcb.close()?;
                return Ok(true);
            }
            tcb.check(Action::SendFin)?;
        }
        socket
            .wait_for(|tcb| {
                if !tcb.state().allows(Action::SendFin) {
                    Some(Err(tcb.state().error(Action::SendFin)))
                } else if tcb.all_sent() {
                    Some(tcb.send_fin(Instant::now()))
                } else {
                    None
                }
            })
            .await?;
        socket.flush_or_log(&self.ipv4);
        socket.wake_sender();
        Ok(false)
    }

    pub fn sockets(&self) -> Vec<SocketInfo> {
        self.registry
            .all()
            .iter()
            .map(|socket| info(socket))
            .collect()
    }

    /// The send and receive windows of one socket.
    pub fn window(&self, id: SocketId) -> Result<(u32, u16), SocketError> {
        let socket = self.registry.get(id)?;
        let tcb = socket.tcb();
        Ok((tcb.send_window(), tcb.recv_window()))
    }
}

fn info(socket: &VSocket) -> SocketInfo {
    let tcb = socket.tcb();
    SocketInfo {
        id: socket.id(),
        state: tcb.state(),
        endpoints: tcb.endpoints(),
        send_window: tcb.send_window(),
        recv_window: tcb.recv_window(),
    }
}

#[async_trait::async_trait]
impl Protocol for Tcp {
    fn protocol_number(&self) -> ProtocolNumber {
        ProtocolNumber::Tcp
    }

    async fn start(&self, shutdown: Shutdown) -> Result<(), StartError> {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            shutdown.wait_for_shutdown().await;
            registry.release_all();
        });
        Ok(())
    }

    fn demux(&self, packet: Ipv4Packet) -> Result<(), DemuxError> {
        let source = packet.header.source;
        let destination = packet.header.destination;
        let segment = TcpSegment::decode(&packet.payload, source, destination).map_err(|e| {
            tracing::info!("Dropping a malformed segment from {}: {}", source, e);
            DemuxError::Header
        })?;

        let endpoints = Endpoints::new(
            Endpoint::new(destination, segment.header.dst_port),
            Endpoint::new(source, segment.header.src_port),
        );
        let Some(socket) = self.registry.lookup(endpoints) else {
            tracing::debug!("No socket for a segment on {}", endpoints);
            return Err(DemuxError::MissingSession);
        };
        segment_event(
            socket.id(),
            false,
            endpoints,
            &segment.header,
            segment.payload.len(),
        );
        socket
            .deliver(Incoming {
                segment,
                endpoints,
                arrived: Instant::now(),
            })
            .map_err(|_| DemuxError::ClosedSession)
    }
}
