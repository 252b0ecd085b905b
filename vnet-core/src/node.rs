use crate::{
    link::{FrameReceiver, Link, LinkConfig, LinkError},
    links::UdpLink,
    protocol::{SharedProtocol, StartError},
    protocols::{ipv4::Ipv4Packet, Echo, Ipv4, Rip, Tcp},
    Shutdown,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One host of the virtual network.
///
/// A node owns the forwarding engine and the three protocols on top of it.
/// Frames from the links are fed to the engine by a background task until
/// [`Node::shut_down`] is called.
pub struct Node {
    ipv4: Arc<Ipv4>,
    tcp: Arc<Tcp>,
    shutdown: Shutdown,
}

impl Node {
    /// Binds a UDP socket for every link and starts the node. Also returns
    /// the packets the test protocol receives.
    pub async fn start(
        links: &[LinkConfig],
    ) -> Result<(Self, mpsc::UnboundedReceiver<Ipv4Packet>), NodeError> {
        let shutdown = Shutdown::new();
        let (frames_send, frames) = mpsc::unbounded_channel();
        let link = UdpLink::bind(links, frames_send, shutdown.clone()).await?;
        Self::with_link(links, Arc::new(link), frames, shutdown).await
    }

    /// Starts a node over an existing link layer. `frames` must be the
    /// channel `link` delivers received frames to.
    pub async fn with_link(
        links: &[LinkConfig],
        link: Arc<dyn Link>,
        frames: FrameReceiver,
        shutdown: Shutdown,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Ipv4Packet>), NodeError> {
        let ipv4 = Ipv4::new(links, link);
        let (echo, received) = Echo::new();
        let tcp = Tcp::new(ipv4.clone()).shared();
        let protocols: [SharedProtocol; 3] = [
            Arc::new(echo),
            Rip::new(ipv4.clone()).shared(),
            tcp.clone(),
        ];
        for protocol in protocols.iter() {
            ipv4.register(protocol.clone());
        }

        tokio::spawn(frame_loop(ipv4.clone(), frames, shutdown.clone()));
        for protocol in protocols {
            protocol.start(shutdown.clone()).await?;
        }

        let vips: Vec<_> = ipv4
            .interfaces()
            .local_vips()
            .iter()
            .map(ToString::to_string)
            .collect();
        tracing::info!("Node started with addresses {}", vips.join(", "));
        Ok((
            Self {
                ipv4,
                tcp,
                shutdown,
            },
            received,
        ))
    }

    pub fn ipv4(&self) -> &Arc<Ipv4> {
        &self.ipv4
    }

    pub fn tcp(&self) -> &Arc<Tcp> {
        &self.tcp
    }

    /// Stops every background task. The handlers hold the engine, so they
    /// are dropped here too.
    pub fn shut_down(&self) {
        self.shutdown.shut_down();
        self.ipv4.clear_handlers();
    }
}

async fn frame_loop(ipv4: Arc<Ipv4>, mut frames: FrameReceiver, shutdown: Shutdown) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        ipv4.handle_packet_input(frame);
    }
    tracing::debug!("Frame loop stopped");
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Could not set up the links: {0}")]
    Link(#[from] LinkError),
    #[error("A protocol failed to start: {0}")]
    Start(#[from] StartError),
}
