//! Wrapper functions for logging structured events.
//!
//! Each function corresponds to one kind of event and always logs under the
//! same target so that a subscriber can filter for it. Installing the
//! subscriber is left to the binary.

use crate::protocols::{
    ipv4::{Ipv4Address, Ipv4Packet},
    tcp::{tcp_parsing::TcpHeader, SocketId},
    utility::Endpoints,
};
use tracing::{event, Level};

/// What happened to a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketAction {
    Sent,
    Received,
    Forwarded,
    Delivered,
    Dropped,
}

/// Packet event handler.
/// Captures: action, source, destination, protocol, ttl, length, reason.
pub fn packet_event(action: PacketAction, packet: &Ipv4Packet, reason: &str) {
    macro_rules! packet {
        ($level:expr) => {
            event!(
                target: "PACKET",
                $level,
                action = ?action,
                source = %packet.header.source,
                destination = %packet.header.destination,
                protocol = u8::from(packet.header.protocol),
                ttl = packet.header.time_to_live,
                length = packet.header.total_length,
                reason
            )
        };
    }
    if action == PacketAction::Dropped {
        packet!(Level::INFO)
    } else {
        packet!(Level::DEBUG)
    }
}

/// Segment event handler.
/// Captures: socket, sent or received, endpoints, seq, ack, flags, window, length.
pub fn segment_event(
    socket: SocketId,
    sent: bool,
    endpoints: Endpoints,
    header: &TcpHeader,
    length: usize,
) {
    event!(
        target: "SEGMENT",
        Level::DEBUG,
        socket,
        direction = if sent { "send" } else { "recv" },
        local = %endpoints.local,
        remote = %endpoints.remote,
        seq = header.seq,
        ack = header.ack,
        flags = %header.ctl,
        window = header.wnd,
        length
    );
}

/// Route change handler.
/// Captures: destination, next_hop, cost.
pub fn route_event(destination: Ipv4Address, next_hop: Ipv4Address, cost: u32) {
    event!(
        target: "ROUTE",
        Level::DEBUG,
        destination = %destination,
        next_hop = %next_hop,
        cost
    );
}
