use crate::{
    link::{Frame, FrameSender, Link, LinkError, UDP_FRAME_SIZE},
    protocols::ipv4::Ipv4Address,
};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

/// An in-process link layer for wiring nodes together without sockets.
///
/// Each node owns one `MemoryLink`. Calling [`MemoryLink::connect`] joins two
/// of them with a point-to-point link. An optional failure rate drops frames
/// at random, which is useful for exercising retransmission.
pub struct MemoryLink {
    inbound: FrameSender,
    local_vips: RwLock<FxHashMap<Ipv4Address, Ipv4Address>>,
    peers: RwLock<FxHashMap<Ipv4Address, Weak<MemoryLink>>>,
    rng: Mutex<SmallRng>,
    failure_rate: f64,
}

impl MemoryLink {
    pub fn new(inbound: FrameSender) -> Arc<Self> {
        Self::unreliable(inbound, 0.0)
    }

    /// Creates a link that silently drops the given fraction of frames.
    pub fn unreliable(inbound: FrameSender, failure_rate: f64) -> Arc<Self> {
        Arc::new(Self {
            inbound,
            local_vips: Default::default(),
            peers: Default::default(),
            rng: Mutex::new(SmallRng::seed_from_u64(0xBAD5EED)),
            failure_rate,
        })
    }

    /// Joins `a` (addressed as `a_vip` on this link) to `b` (addressed as
    /// `b_vip`).
    pub fn connect(
        a: &Arc<MemoryLink>,
        a_vip: Ipv4Address,
        b: &Arc<MemoryLink>,
        b_vip: Ipv4Address,
    ) {
        a.attach(a_vip, b_vip, Arc::downgrade(b));
        b.attach(b_vip, a_vip, Arc::downgrade(a));
    }

    fn attach(&self, local_vip: Ipv4Address, remote_vip: Ipv4Address, peer: Weak<MemoryLink>) {
        if let Ok(mut vips) = self.local_vips.write() {
            vips.insert(remote_vip, local_vip);
        }
        if let Ok(mut peers) = self.peers.write() {
            peers.insert(remote_vip, peer);
        }
    }

    fn should_drop(&self) -> bool {
        self.failure_rate > 0.0
            && self
                .rng
                .lock()
                .map(|mut rng| rng.gen_bool(self.failure_rate))
                .unwrap_or(false)
    }
}

impl Link for MemoryLink {
    fn send(&self, frame: &[u8], neighbor: Ipv4Address) -> Result<(), LinkError> {
        if frame.len() > UDP_FRAME_SIZE {
            Err(LinkError::FrameTooLarge(frame.len()))?
        }
        let peer = self
            .peers
            .read()
            .map_err(|_| LinkError::Closed)?
            .get(&neighbor)
            .cloned()
            .ok_or(LinkError::NoSuchNeighbor(neighbor))?
            .upgrade()
            .ok_or(LinkError::Closed)?;
        let local_vip = self
            .local_vips
            .read()
            .map_err(|_| LinkError::Closed)?
            .get(&neighbor)
            .copied()
            .ok_or(LinkError::NoSuchNeighbor(neighbor))?;
        if self.should_drop() {
            return Ok(());
        }
        // The peer sees the frame as coming from our end of the link
        let frame = Frame {
            neighbor: local_vip,
            bytes: frame.to_vec(),
        };
        peer.inbound.send(frame).map_err(|_| LinkError::Closed)?;
        Ok(())
    }
}
