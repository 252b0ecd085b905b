//! A RIP-style distance vector protocol.
//!
//! Every node periodically tells each neighbor the cost of every route it
//! knows. Routes learned this way go stale if they are not refreshed.

use crate::{
    link::UDP_FRAME_SIZE,
    logging::route_event,
    protocol::{DemuxError, Protocol, StartError},
    protocols::ipv4::{ipv4_parsing::BASE_OCTETS, Ipv4, Ipv4Address, Ipv4Packet, ProtocolNumber},
    Shutdown,
};
use std::{sync::Arc, time::Duration};

pub mod rip_parsing;
pub use rip_parsing::{Command, RipEntry, RipMessage};

/// How often routes age.
pub const TICK: Duration = Duration::from_secs(1);
/// Full advertisements go out once every this many ticks.
pub const ADVERTISE_EVERY: u32 = 5;
/// The most entries that fit in one frame.
const MAX_ENTRIES: usize = (UDP_FRAME_SIZE - BASE_OCTETS as usize - 4) / 8;

/// The routing protocol handler.
pub struct Rip {
    ipv4: Arc<Ipv4>,
}

impl Rip {
    pub fn new(ipv4: Arc<Ipv4>) -> Self {
        Self { ipv4 }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

/// Sends our routes to one neighbor, poisoned for that neighbor.
fn advertise_to(ipv4: &Ipv4, neighbor: Ipv4Address, source: Option<Ipv4Address>) {
    let entries = ipv4.rib().advertisement(neighbor);
    for chunk in entries.chunks(MAX_ENTRIES) {
        send(ipv4, neighbor, source, RipMessage::response(chunk.to_vec()));
    }
}

/// Sends our routes to every neighbor whose link is up.
fn advertise(ipv4: &Ipv4) {
    for neighbor in ipv4.interfaces().live_neighbors() {
        advertise_to(ipv4, neighbor, None);
    }
}

fn send(ipv4: &Ipv4, neighbor: Ipv4Address, source: Option<Ipv4Address>, message: RipMessage) {
    let bytes = match message.to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("Failed to build a RIP message: {}", e);
            return;
        }
    };
    if let Err(e) = ipv4.send_message(source, neighbor, ProtocolNumber::Rip, bytes) {
        tracing::debug!("Failed to send RIP {:?} to {}: {}", message.command, neighbor, e);
    }
}

#[async_trait::async_trait]
impl Protocol for Rip {
    fn protocol_number(&self) -> ProtocolNumber {
        ProtocolNumber::Rip
    }

    async fn start(&self, shutdown: Shutdown) -> Result<(), StartError> {
        for neighbor in self.ipv4.interfaces().live_neighbors() {
            send(&self.ipv4, neighbor, None, RipMessage::request());
        }

        let ipv4 = self.ipv4.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK);
            let mut counter = 0;
            loop {
                tokio::select! {
                    _ = shutdown.wait_for_shutdown() => break,
                    _ = interval.tick() => {}
                }
                if counter % ADVERTISE_EVERY == 0 {
                    advertise(&ipv4);
                }
                counter = (counter + 1) % ADVERTISE_EVERY;

                let expired = ipv4.rib_mut().tick();
                if expired {
                    tracing::debug!("Routes expired, sending a triggered update");
                    advertise(&ipv4);
                }
            }
        });
        Ok(())
    }

    fn demux(&self, packet: Ipv4Packet) -> Result<(), DemuxError> {
        let message = RipMessage::from_bytes(&packet.payload).map_err(|e| {
            tracing::info!("Dropping a malformed RIP message: {}", e);
            DemuxError::Header
        })?;
        let sender = packet.header.source;

        match message.command {
            Command::Request => {
                advertise_to(&self.ipv4, sender, Some(packet.header.destination));
            }
            Command::Response => {
                let mut changed = vec![];
                {
                    let mut rib = self.ipv4.rib_mut();
                    for entry in message.entries.iter() {
                        if rib.update(sender, entry.destination, entry.cost) {
                            changed.extend(rib.get(entry.destination));
                        }
                    }
                }
                for route in changed.iter() {
                    route_event(route.destination, route.next_hop, route.cost);
                }
                if !changed.is_empty() {
                    advertise(&self.ipv4);
                }
            }
        }
        Ok(())
    }
}
