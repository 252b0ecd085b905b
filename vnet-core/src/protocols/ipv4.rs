//! The virtual internet layer: packet construction, local delivery, and
//! hop-by-hop forwarding over the routes in a node's [`Rib`].

use crate::{
    interfaces::{Interface, InterfaceTable},
    link::{Frame, Link, LinkConfig, LinkError},
    logging::{packet_event, route_event, PacketAction},
    protocol::SharedProtocol,
    rib::{Rib, Route, INFINITY},
    FxDashMap,
};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod ipv4_parsing;
pub use ipv4_parsing::{Ipv4Header, Ipv4Packet};
use ipv4_parsing::HeaderBuildError;

mod ipv4_address;
pub use ipv4_address::{AddressParseError, Ipv4Address};

/// Identifies the protocol a packet's payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolNumber {
    /// Plain text messages typed at the command line
    Test,
    Tcp,
    Rip,
    Other(u8),
}

impl From<u8> for ProtocolNumber {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Test,
            6 => Self::Tcp,
            200 => Self::Rip,
            other => Self::Other(other),
        }
    }
}

impl From<ProtocolNumber> for u8 {
    fn from(number: ProtocolNumber) -> Self {
        match number {
            ProtocolNumber::Test => 0,
            ProtocolNumber::Tcp => 6,
            ProtocolNumber::Rip => 200,
            ProtocolNumber::Other(other) => other,
        }
    }
}

/// The forwarding engine of a node.
pub struct Ipv4 {
    rib: RwLock<Rib>,
    interfaces: InterfaceTable,
    link: Arc<dyn Link>,
    handlers: FxDashMap<ProtocolNumber, SharedProtocol>,
}

impl Ipv4 {
    /// Creates the engine for a node with the given links. The routing table
    /// starts out knowing the node's own addresses and, as unreachable, its
    /// neighbors.
    pub fn new(links: &[LinkConfig], link: Arc<dyn Link>) -> Arc<Self> {
        let mut rib = Rib::new();
        for config in links {
            rib.add_local(config.local_vip);
        }
        for config in links {
            rib.add_neighbor(config.remote_vip);
        }
        Arc::new(Self {
            rib: RwLock::new(rib),
            interfaces: InterfaceTable::new(links),
            link,
            handlers: Default::default(),
        })
    }

    /// Registers the handler for locally delivered packets of its protocol
    /// number, replacing any previous one.
    pub fn register(&self, handler: SharedProtocol) {
        self.handlers.insert(handler.protocol_number(), handler);
    }

    /// Drops every registered handler.
    pub fn clear_handlers(&self) {
        self.handlers.clear();
    }

    pub fn interfaces(&self) -> &InterfaceTable {
        &self.interfaces
    }

    /// A snapshot of the routing table.
    pub fn routes(&self) -> Vec<Route> {
        self.rib().routes()
    }

    pub fn route(&self, destination: Ipv4Address) -> Option<Route> {
        self.rib().get(destination)
    }

    pub(crate) fn rib(&self) -> RwLockReadGuard<'_, Rib> {
        self.rib.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn rib_mut(&self) -> RwLockWriteGuard<'_, Rib> {
        self.rib.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Brings interface `id` up or down. The interface table changes first,
    /// then the route to the interface's own address.
    pub fn change_interface(&self, id: usize, up: bool) -> Option<Interface> {
        let interface = self.interfaces.set_up(id, up)?;
        let mut rib = self.rib_mut();
        rib.set_local_up(interface.local_vip, up);
        if let Some(route) = rib.get(interface.local_vip) {
            route_event(route.destination, route.next_hop, route.cost);
        }
        Some(interface)
    }

    /// The local address packets to `destination` leave from.
    pub fn local_vip_toward_destination(&self, destination: Ipv4Address) -> Option<Ipv4Address> {
        if self.interfaces.is_local(destination) {
            return Some(destination);
        }
        let route = self.route(destination)?;
        self.interfaces.local_vip_toward(route.next_hop)
    }

    /// Sends `payload` to `destination`. A `source` of `None` picks the
    /// address of the interface facing the next hop.
    pub fn send_message(
        &self,
        source: Option<Ipv4Address>,
        destination: Ipv4Address,
        protocol: ProtocolNumber,
        payload: Vec<u8>,
    ) -> Result<(), SendError> {
        let route = self
            .route(destination)
            .ok_or(SendError::UnknownDestination(destination))?;
        let source = source
            .or_else(|| self.interfaces.local_vip_toward(route.next_hop))
            .unwrap_or(destination);
        let packet = Ipv4Packet::new(source, destination, protocol, payload)?;

        if self.interfaces.is_local(destination) {
            if route.cost != 0 {
                packet_event(PacketAction::Dropped, &packet, "local address is down");
                Err(SendError::LinkDown(destination))?
            }
            self.deliver(packet);
            return Ok(());
        }

        self.send_packet(packet, protocol == ProtocolNumber::Rip)
    }

    /// Puts a finished packet on the link toward its next hop. Routing
    /// traffic may use routes that are unreachable.
    fn send_packet(&self, packet: Ipv4Packet, routing: bool) -> Result<(), SendError> {
        let destination = packet.header.destination;
        let route = match self.route(destination) {
            Some(route) => route,
            None => {
                packet_event(PacketAction::Dropped, &packet, "unknown destination");
                Err(SendError::UnknownDestination(destination))?
            }
        };
        if !self.interfaces.is_up(route.next_hop) {
            packet_event(PacketAction::Dropped, &packet, "link down");
            Err(SendError::LinkDown(route.next_hop))?
        }
        if route.cost >= INFINITY && !routing {
            packet_event(PacketAction::Dropped, &packet, "infinite distance");
            Err(SendError::InfinityDistance(destination))?
        }
        self.link.send(&packet.encode(), route.next_hop)?;
        packet_event(PacketAction::Sent, &packet, "");
        Ok(())
    }

    /// Processes a frame received from a neighbor: deliver it here, or
    /// forward it one hop closer to its destination. Bad packets are dropped.
    pub fn handle_packet_input(&self, frame: Frame) {
        if !self.interfaces.is_up(frame.neighbor) {
            tracing::debug!("Dropping a frame from {} on a down link", frame.neighbor);
            return;
        }
        let mut packet = match Ipv4Packet::decode(&frame.bytes) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::info!(target: "PACKET", "Dropping a packet from {}: {}", frame.neighbor, e);
                return;
            }
        };
        packet_event(PacketAction::Received, &packet, "");

        if self.interfaces.is_local(packet.header.destination) {
            self.deliver(packet);
            return;
        }

        if packet.header.time_to_live == 0 {
            packet_event(PacketAction::Dropped, &packet, "ttl expired");
            return;
        }
        packet.header.time_to_live -= 1;
        packet.header.refresh_checksum();
        packet_event(PacketAction::Forwarded, &packet, "");
        // Failures were already logged
        let _ = self.send_packet(packet, false);
    }

    fn deliver(&self, packet: Ipv4Packet) {
        let protocol = packet.header.protocol;
        // Clone out of the map so the handler may touch the registry
        let handler = self.handlers.get(&protocol).map(|entry| entry.clone());
        match handler {
            Some(handler) => {
                packet_event(PacketAction::Delivered, &packet, "");
                if let Err(e) = handler.demux(packet) {
                    tracing::debug!("{:?} handler rejected a packet: {}", protocol, e);
                }
            }
            None => packet_event(PacketAction::Dropped, &packet, "no handler for protocol"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("No route to {0}")]
    UnknownDestination(Ipv4Address),
    #[error("The link toward {0} is down")]
    LinkDown(Ipv4Address),
    #[error("{0} is at infinite distance")]
    InfinityDistance(Ipv4Address),
    #[error("Could not build the packet: {0}")]
    Build(#[from] HeaderBuildError),
    #[error("{0}")]
    Link(#[from] LinkError),
}
