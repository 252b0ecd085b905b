use crate::{link::LinkConfig, protocols::ipv4::Ipv4Address};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

/// One end of a point-to-point link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interface {
    /// Interfaces are numbered from zero in topology file order.
    pub id: usize,
    pub local_vip: Ipv4Address,
    pub remote_vip: Ipv4Address,
    pub up: bool,
}

/// The liveness table of a node's interfaces.
#[derive(Debug, Default)]
pub struct InterfaceTable {
    interfaces: RwLock<Vec<Interface>>,
}

impl InterfaceTable {
    pub fn new(links: &[LinkConfig]) -> Self {
        let interfaces = links
            .iter()
            .enumerate()
            .map(|(id, link)| Interface {
                id,
                local_vip: link.local_vip,
                remote_vip: link.remote_vip,
                up: true,
            })
            .collect();
        Self {
            interfaces: RwLock::new(interfaces),
        }
    }

    /// A snapshot of every interface.
    pub fn interfaces(&self) -> Vec<Interface> {
        self.read().clone()
    }

    /// Whether the link to the given neighbor is operable. Unknown neighbors
    /// are never up.
    pub fn is_up(&self, neighbor: Ipv4Address) -> bool {
        self.find(|i| i.remote_vip == neighbor)
            .map(|i| i.up)
            .unwrap_or(false)
    }

    /// The local address of the interface facing `neighbor`.
    pub fn local_vip_toward(&self, neighbor: Ipv4Address) -> Option<Ipv4Address> {
        self.find(|i| i.remote_vip == neighbor).map(|i| i.local_vip)
    }

    /// Whether `address` is one of this node's own addresses.
    pub fn is_local(&self, address: Ipv4Address) -> bool {
        self.find(|i| i.local_vip == address).is_some()
    }

    /// The distinct local addresses of this node.
    pub fn local_vips(&self) -> Vec<Ipv4Address> {
        let mut vips: Vec<_> = self.interfaces().into_iter().map(|i| i.local_vip).collect();
        vips.sort();
        vips.dedup();
        vips
    }

    /// Neighbors whose links are currently up.
    pub fn live_neighbors(&self) -> Vec<Ipv4Address> {
        self.interfaces()
            .into_iter()
            .filter(|i| i.up)
            .map(|i| i.remote_vip)
            .collect()
    }

    /// Sets the operable flag of interface `id`, returning the updated
    /// interface, or `None` if no such interface exists.
    pub fn set_up(&self, id: usize, up: bool) -> Option<Interface> {
        let mut interfaces = self
            .interfaces
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let interface = interfaces.get_mut(id)?;
        interface.up = up;
        Some(*interface)
    }

    fn find(&self, predicate: impl Fn(&Interface) -> bool) -> Option<Interface> {
        self.read()
            .iter()
            .find(|interface| predicate(interface))
            .copied()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Interface>> {
        self.interfaces.read().unwrap_or_else(PoisonError::into_inner)
    }
}
