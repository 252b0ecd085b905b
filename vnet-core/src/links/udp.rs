use crate::{
    link::{Frame, FrameSender, Link, LinkConfig, LinkError, UDP_FRAME_SIZE},
    protocols::ipv4::Ipv4Address,
    Shutdown,
};
use rustc_hash::FxHashMap;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::{lookup_host, UdpSocket};

/// Carries frames over real UDP sockets, one socket per configured link.
pub struct UdpLink {
    /// Maps each neighbor to the socket bound for its link and its physical
    /// address.
    routes: FxHashMap<Ipv4Address, (Arc<UdpSocket>, SocketAddr)>,
}

impl UdpLink {
    /// Binds a socket for every link and spawns a reader for each that feeds
    /// `inbound` until `shutdown` fires.
    pub async fn bind(
        links: &[LinkConfig],
        inbound: FrameSender,
        shutdown: Shutdown,
    ) -> Result<Self, LinkError> {
        let mut routes = FxHashMap::default();
        for config in links {
            let socket = Arc::new(
                UdpSocket::bind((config.local.host.as_str(), config.local.port)).await?,
            );
            let remote = lookup_host((config.remote.host.as_str(), config.remote.port))
                .await?
                .find(|address| address.is_ipv4())
                .ok_or_else(|| LinkError::Resolve(config.remote.clone()))?;
            routes.insert(config.remote_vip, (socket.clone(), remote));

            tokio::spawn(receive_loop(
                socket,
                config.remote_vip,
                inbound.clone(),
                shutdown.clone(),
            ));
        }
        Ok(Self { routes })
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    neighbor: Ipv4Address,
    inbound: FrameSender,
    shutdown: Shutdown,
) {
    let mut buf = [0u8; UDP_FRAME_SIZE];
    loop {
        tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((0, _)) => continue,
                Ok((len, _)) => {
                    let frame = Frame { neighbor, bytes: buf[..len].to_vec() };
                    if inbound.send(frame).is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!("Failed to read from the link to {}: {}", neighbor, e),
            },
        }
    }
}

impl Link for UdpLink {
    fn send(&self, frame: &[u8], neighbor: Ipv4Address) -> Result<(), LinkError> {
        if frame.len() > UDP_FRAME_SIZE {
            Err(LinkError::FrameTooLarge(frame.len()))?
        }
        let (socket, remote) = self
            .routes
            .get(&neighbor)
            .ok_or(LinkError::NoSuchNeighbor(neighbor))?;
        socket.try_send_to(frame, *remote)?;
        Ok(())
    }
}
