// src/neighbor.rs
//! Neighbor liveness tracking for an AODV node.
//!
//! This module handles:
//! - Tracking one-hop neighbors heard via Hello or any other control packet
//! - Expiry of neighbors that went silent
//! - Immediate removal on link-layer transmission failure
//!
//! The table never touches routes. Every removal is reported back to the
//! caller as a list of addresses, which the engine treats as broken links.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Instant;

/// A one-hop neighbor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    pub address: Ipv4Addr,
    /// Link-layer address, once learned.
    pub hardware_addr: Option<[u8; 6]>,
    pub expire: Instant,
    /// Set when the link is known to be gone; removed on the next purge.
    pub close: bool,
}

impl Neighbor {
    pub fn new(address: Ipv4Addr, expire: Instant) -> Self {
        Neighbor {
            address,
            hardware_addr: None,
            expire,
            close: false,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.close || self.expire <= now
    }
}

/// Table of all known neighbors.
#[derive(Debug, Default)]
pub struct NeighborTable {
    neighbors: HashMap<Ipv4Addr, Neighbor>,
}

impl NeighborTable {
    pub fn new() -> Self {
        NeighborTable {
            neighbors: HashMap::new(),
        }
    }

    pub fn all(&self) -> impl Iterator<Item = &Neighbor> {
        self.neighbors.values()
    }

    pub fn get(&self, addr: &Ipv4Addr) -> Option<&Neighbor> {
        self.neighbors.get(addr)
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Insert a neighbor or push its expiry out to `expire`. An expiry is
    /// never shortened by an update.
    pub fn update(&mut self, address: Ipv4Addr, expire: Instant) {
        let n = self
            .neighbors
            .entry(address)
            .or_insert_with(|| Neighbor::new(address, expire));
        if expire > n.expire {
            n.expire = expire;
        }
        n.close = false;
    }

    /// Record the link-layer address of a known neighbor.
    pub fn update_hardware(&mut self, address: Ipv4Addr, hw: [u8; 6]) {
        if let Some(n) = self.neighbors.get_mut(&address) {
            n.hardware_addr = Some(hw);
        }
    }

    pub fn is_neighbor(&self, address: Ipv4Addr, now: Instant) -> bool {
        self.neighbors
            .get(&address)
            .is_some_and(|n| !n.is_expired(now))
    }

    pub fn get_expire_time(&self, address: Ipv4Addr) -> Option<Instant> {
        self.neighbors.get(&address).map(|n| n.expire)
    }

    /// Remove expired and closed neighbors; returns their addresses.
    pub fn purge(&mut self, now: Instant) -> Vec<Ipv4Addr> {
        let mut removed = Vec::new();
        self.neighbors.retain(|addr, n| {
            if n.is_expired(now) {
                removed.push(*addr);
                false
            } else {
                true
            }
        });
        removed.sort_unstable();
        removed
    }

    /// The link to `address` failed: close it and purge.
    pub fn notify_transmission_failure(&mut self, address: Ipv4Addr, now: Instant) -> Vec<Ipv4Addr> {
        if let Some(n) = self.neighbors.get_mut(&address) {
            n.close = true;
        }
        self.purge(now)
    }

    /// Same as `notify_transmission_failure`, keyed by link-layer address.
    pub fn notify_hw_transmission_failure(&mut self, hw: [u8; 6], now: Instant) -> Vec<Ipv4Addr> {
        for n in self.neighbors.values_mut() {
            if n.hardware_addr == Some(hw) {
                n.close = true;
            }
        }
        self.purge(now)
    }

    pub fn clear(&mut self) {
        self.neighbors.clear();
    }
}
