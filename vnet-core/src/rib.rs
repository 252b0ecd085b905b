//! The routing information base of a node.
//!
//! Routes are learned with a RIP-style distance vector. Every destination maps
//! to the neighbor through which it is currently reached, a hop count, and the
//! number of advertisement rounds left before the route goes stale.

use crate::protocols::{ipv4::Ipv4Address, rip::RipEntry};
use std::collections::BTreeMap;

/// The hop count meaning "unreachable".
pub const INFINITY: u32 = 16;
/// The number of ticks a learned route survives without being refreshed.
pub const ROUTE_TTL: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub destination: Ipv4Address,
    pub next_hop: Ipv4Address,
    pub cost: u32,
    pub ttl: u32,
    /// Routes to the node's own addresses never decay and are not changed
    /// by advertisements.
    pub local: bool,
}

impl Route {
    pub fn is_reachable(&self) -> bool {
        self.cost < INFINITY
    }
}

#[derive(Debug, Default, Clone)]
pub struct Rib {
    routes: BTreeMap<Ipv4Address, Route>,
}

impl Rib {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route to one of the node's own addresses.
    pub fn add_local(&mut self, vip: Ipv4Address) {
        self.routes.insert(
            vip,
            Route {
                destination: vip,
                next_hop: vip,
                cost: 0,
                ttl: ROUTE_TTL,
                local: true,
            },
        );
    }

    /// Seeds a route to a directly attached neighbor. It stays unreachable
    /// until the neighbor advertises itself.
    pub fn add_neighbor(&mut self, neighbor: Ipv4Address) {
        self.routes.entry(neighbor).or_insert(Route {
            destination: neighbor,
            next_hop: neighbor,
            cost: INFINITY,
            ttl: 0,
            local: false,
        });
    }

    pub fn get(&self, destination: Ipv4Address) -> Option<Route> {
        self.routes.get(&destination).copied()
    }

    /// Every route, ordered by destination.
    pub fn routes(&self) -> Vec<Route> {
        self.routes.values().copied().collect()
    }

    /// Applies one entry of an advertisement received from `sender`. Returns
    /// whether the route's next hop or cost changed.
    pub fn update(&mut self, sender: Ipv4Address, destination: Ipv4Address, cost: u32) -> bool {
        let cost = if cost >= INFINITY {
            INFINITY
        } else {
            cost + 1
        };

        let route = match self.routes.get_mut(&destination) {
            Some(route) => route,
            None => {
                self.routes.insert(
                    destination,
                    Route {
                        destination,
                        next_hop: sender,
                        cost,
                        ttl: ROUTE_TTL,
                        local: false,
                    },
                );
                return true;
            }
        };

        if route.local {
            return false;
        }

        let before = (route.next_hop, route.cost);
        if cost < route.cost {
            route.next_hop = sender;
            route.cost = cost;
            route.ttl = ROUTE_TTL;
        } else if cost == route.cost {
            route.ttl = ROUTE_TTL;
        }

        // A poisoned route from the neighbor we route through is believed
        // even though it is not an improvement
        if cost == INFINITY && route.next_hop == sender {
            route.cost = INFINITY;
        }
        before != (route.next_hop, route.cost)
    }

    /// Builds the advertisement to send to `neighbor`, using split horizon
    /// with poison reverse. Routes through `neighbor` are reported as
    /// unreachable, except the node's own addresses.
    pub fn advertisement(&self, neighbor: Ipv4Address) -> Vec<RipEntry> {
        self.routes
            .values()
            .map(|route| {
                let cost = if route.cost != 0 && route.next_hop == neighbor {
                    INFINITY
                } else {
                    route.cost
                };
                RipEntry {
                    cost,
                    destination: route.destination,
                }
            })
            .collect()
    }

    /// Ages every learned route by one tick. Routes whose time runs out
    /// become unreachable but stay in the table. Returns whether any route
    /// expired.
    pub fn tick(&mut self) -> bool {
        let mut expired = false;
        for route in self.routes.values_mut().filter(|route| !route.local) {
            if route.ttl == 0 {
                continue;
            }
            route.ttl -= 1;
            if route.ttl == 0 && route.cost != INFINITY {
                route.cost = INFINITY;
                expired = true;
            }
        }
        expired
    }

    /// Marks one of the node's own addresses reachable or not. Returns
    /// whether the address was known.
    pub fn set_local_up(&mut self, vip: Ipv4Address, up: bool) -> bool {
        match self.routes.get_mut(&vip) {
            Some(route) if route.local => {
                route.cost = if up { 0 } else { INFINITY };
                true
            }
            _ => false,
        }
    }
}
