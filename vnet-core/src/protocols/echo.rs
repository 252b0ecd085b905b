use crate::{
    protocol::{DemuxError, Protocol, StartError},
    protocols::ipv4::{Ipv4Packet, ProtocolNumber},
    Shutdown,
};
use tokio::sync::mpsc;

/// Receives test-protocol packets and hands them to whoever is watching,
/// usually the command line which prints them.
pub struct Echo {
    received: mpsc::UnboundedSender<Ipv4Packet>,
}

impl Echo {
    /// Creates the handler along with the stream of packets it receives.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Ipv4Packet>) {
        let (received, recv) = mpsc::unbounded_channel();
        (Self { received }, recv)
    }
}

#[async_trait::async_trait]
impl Protocol for Echo {
    fn protocol_number(&self) -> ProtocolNumber {
        ProtocolNumber::Test
    }

    async fn start(&self, _shutdown: Shutdown) -> Result<(), StartError> {
        Ok(())
    }

    fn demux(&self, packet: Ipv4Packet) -> Result<(), DemuxError> {
        self.received
            .send(packet)
            .map_err(|_| DemuxError::ClosedSession)
    }
}
