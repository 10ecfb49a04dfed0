// src/routing.rs
//! AODV routing table.
//!
//! One entry per destination, carrying the destination sequence number,
//! validity state, lifetime and the precursors that route through us.
//! Expired entries age in two steps on every sweep: a Valid entry whose
//! lifetime passed becomes Invalid for `bad_link_lifetime`, and an Invalid
//! entry whose lifetime passed is deleted.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::timer::TimerId;

/// True if sequence number `a` is fresher than `b` (RFC 3561 §6.1,
/// signed rollover comparison).
pub fn is_newer_seq(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteState {
    Valid,
    Invalid,
    InSearch,
}

/// A resolved next-hop decision handed to the forwarding plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub destination: Ipv4Addr,
    pub source: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub interface: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub destination: Ipv4Addr,
    /// False while the sequence number is unknown or stale.
    pub valid_seq_no: bool,
    pub seq_no: u32,
    pub next_hop: Ipv4Addr,
    pub interface: u32,
    pub hops: u8,
    pub state: RouteState,
    /// Absolute expiry.
    pub lifetime: Instant,
    pub rreq_count: u8,
    pub unidirectional: bool,
    pub blacklist_timeout: Option<Instant>,
    precursors: Vec<Ipv4Addr>,
    /// Pending RREP-ACK wait on the link to this (neighbor) destination.
    pub ack_timer: Option<TimerId>,
}

impl RouteEntry {
    pub fn new(
        destination: Ipv4Addr,
        seq_no: Option<u32>,
        interface: u32,
        hops: u8,
        next_hop: Ipv4Addr,
        lifetime: Instant,
    ) -> Self {
        RouteEntry {
            destination,
            valid_seq_no: seq_no.is_some(),
            seq_no: seq_no.unwrap_or(0),
            next_hop,
            interface,
            hops,
            state: RouteState::Valid,
            lifetime,
            rreq_count: 0,
            unidirectional: false,
            blacklist_timeout: None,
            precursors: Vec::new(),
            ack_timer: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.state == RouteState::Valid
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.lifetime.saturating_duration_since(now)
    }

    /// Mark Invalid and keep the entry around until `until`.
    pub fn invalidate(&mut self, until: Instant) {
        self.state = RouteState::Invalid;
        self.lifetime = until;
    }

    /// Whether RREQs from this neighbor are currently ignored.
    pub fn is_blacklisted(&self, now: Instant) -> bool {
        self.unidirectional && self.blacklist_timeout.is_some_and(|t| t > now)
    }

    /// Returns false if `addr` was already a precursor.
    pub fn insert_precursor(&mut self, addr: Ipv4Addr) -> bool {
        if self.precursors.contains(&addr) {
            return false;
        }
        self.precursors.push(addr);
        true
    }

    pub fn lookup_precursor(&self, addr: Ipv4Addr) -> bool {
        self.precursors.contains(&addr)
    }

    pub fn delete_precursor(&mut self, addr: Ipv4Addr) -> bool {
        let before = self.precursors.len();
        self.precursors.retain(|p| *p != addr);
        self.precursors.len() != before
    }

    pub fn delete_all_precursors(&mut self) {
        self.precursors.clear();
    }

    pub fn precursors(&self) -> &[Ipv4Addr] {
        &self.precursors
    }

    pub fn route(&self, source: Ipv4Addr) -> Route {
        Route {
            destination: self.destination,
            source,
            gateway: self.next_hop,
            interface: self.interface,
        }
    }

    /// Return a short human-ish description string for debugging/logging.
    pub fn summary(&self, now: Instant) -> String {
        let seq = if self.valid_seq_no {
            self.seq_no.to_string()
        } else {
            "?".to_string()
        };
        format!(
            "dst={} via={} iface={} hops={} seq={} state={:?} ttl={}ms precursors={}",
            self.destination,
            self.next_hop,
            self.interface,
            self.hops,
            seq,
            self.state,
            self.remaining(now).as_millis(),
            self.precursors.len()
        )
    }

    pub fn snapshot(&self, now: Instant) -> RouteSnapshot {
        RouteSnapshot {
            destination: self.destination,
            next_hop: self.next_hop,
            interface: self.interface,
            hops: self.hops,
            seq_no: self.valid_seq_no.then_some(self.seq_no),
            state: self.state,
            lifetime_ms: self.remaining(now).as_millis() as u64,
            unidirectional: self.unidirectional,
            precursors: self.precursors.clone(),
        }
    }
}

/// Read-only, serializable view of one routing table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSnapshot {
    pub destination: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub interface: u32,
    pub hops: u8,
    pub seq_no: Option<u32>,
    pub state: RouteState,
    /// Remaining lifetime at the time of the dump.
    pub lifetime_ms: u64,
    pub unidirectional: bool,
    pub precursors: Vec<Ipv4Addr>,
}

/// Destination-keyed routing table.
#[derive(Debug)]
pub struct RoutingTable {
    routes: HashMap<Ipv4Addr, RouteEntry>,
    bad_link_lifetime: Duration,
    // Timer handles held by entries that left the table.
    released: Vec<TimerId>,
}

impl RoutingTable {
    pub fn new(bad_link_lifetime: Duration) -> Self {
        RoutingTable {
            routes: HashMap::new(),
            bad_link_lifetime,
            released: Vec::new(),
        }
    }

    pub fn bad_link_lifetime(&self) -> Duration {
        self.bad_link_lifetime
    }

    pub fn set_bad_link_lifetime(&mut self, lifetime: Duration) {
        self.bad_link_lifetime = lifetime;
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Fails if the destination already has an entry.
    pub fn add_route(&mut self, entry: RouteEntry) -> bool {
        if self.routes.contains_key(&entry.destination) {
            return false;
        }
        debug!(dst = %entry.destination, via = %entry.next_hop, hops = entry.hops, "route added");
        self.routes.insert(entry.destination, entry);
        true
    }

    /// Replace an existing entry. Fails if the destination is unknown.
    pub fn update(&mut self, mut entry: RouteEntry) -> bool {
        let Some(existing) = self.routes.get_mut(&entry.destination) else {
            return false;
        };
        if entry.state != RouteState::InSearch {
            entry.rreq_count = 0;
        }
        if let Some(old) = existing.ack_timer {
            if entry.ack_timer != Some(old) {
                self.released.push(old);
            }
        }
        debug!(
            dst = %entry.destination,
            via = %entry.next_hop,
            hops = entry.hops,
            seq = entry.seq_no,
            state = ?entry.state,
            "route updated"
        );
        *existing = entry;
        true
    }

    /// Any entry for `dst`, regardless of state, after sweeping at `now`.
    pub fn lookup(&mut self, dst: Ipv4Addr, now: Instant) -> Option<RouteEntry> {
        self.purge(now);
        self.routes.get(&dst).cloned()
    }

    /// A Valid, unexpired entry for `dst`.
    pub fn lookup_valid(&mut self, dst: Ipv4Addr, now: Instant) -> Option<RouteEntry> {
        self.lookup(dst, now).filter(RouteEntry::is_valid)
    }

    /// Direct access without sweeping.
    pub fn get(&self, dst: &Ipv4Addr) -> Option<&RouteEntry> {
        self.routes.get(dst)
    }

    pub fn get_mut(&mut self, dst: &Ipv4Addr) -> Option<&mut RouteEntry> {
        self.routes.get_mut(dst)
    }

    pub fn set_entry_state(&mut self, dst: Ipv4Addr, state: RouteState) -> bool {
        match self.routes.get_mut(&dst) {
            Some(e) => {
                e.state = state;
                e.rreq_count = 0;
                true
            }
            None => false,
        }
    }

    pub fn delete_route(&mut self, dst: Ipv4Addr) -> bool {
        match self.routes.remove(&dst) {
            Some(e) => {
                self.released.extend(e.ack_timer);
                debug!(dst = %dst, "route deleted");
                true
            }
            None => false,
        }
    }

    /// Drop every route out of interface `iface`; returns their destinations.
    pub fn delete_routes_with_interface(&mut self, iface: u32) -> Vec<Ipv4Addr> {
        let mut doomed: Vec<Ipv4Addr> = self
            .routes
            .values()
            .filter(|e| e.interface == iface)
            .map(|e| e.destination)
            .collect();
        doomed.sort_unstable();
        for dst in &doomed {
            self.delete_route(*dst);
        }
        doomed
    }

    /// Blacklist the link to `neighbor` until `now + blacklist`.
    pub fn mark_link_unidirectional(
        &mut self,
        neighbor: Ipv4Addr,
        blacklist: Duration,
        now: Instant,
    ) -> bool {
        match self.routes.get_mut(&neighbor) {
            Some(e) => {
                e.unidirectional = true;
                e.blacklist_timeout = Some(now + blacklist);
                debug!(neighbor = %neighbor, ?blacklist, "link marked unidirectional");
                true
            }
            None => false,
        }
    }

    /// Destinations (with their sequence numbers) currently routed
    /// through `next_hop`. Invalid entries are skipped.
    pub fn destinations_using_next_hop(
        &mut self,
        next_hop: Ipv4Addr,
        now: Instant,
    ) -> HashMap<Ipv4Addr, u32> {
        self.purge(now);
        self.routes
            .values()
            .filter(|e| e.next_hop == next_hop && e.state != RouteState::Invalid)
            .map(|e| (e.destination, e.seq_no))
            .collect()
    }

    /// Invalidate the Valid entries named in `unreachable`, recording the
    /// given sequence number when it is fresher than the known one.
    /// Returns the destinations actually invalidated.
    pub fn invalidate_routes_to(
        &mut self,
        unreachable: &HashMap<Ipv4Addr, u32>,
        now: Instant,
    ) -> Vec<Ipv4Addr> {
        let until = now + self.bad_link_lifetime;
        let mut done = Vec::new();
        for (dst, seq) in unreachable {
            let Some(e) = self.routes.get_mut(dst) else {
                continue;
            };
            if e.state != RouteState::Valid {
                continue;
            }
            if !e.valid_seq_no || is_newer_seq(*seq, e.seq_no) {
                e.seq_no = *seq;
            }
            e.invalidate(until);
            debug!(dst = %dst, seq = e.seq_no, "route invalidated");
            done.push(*dst);
        }
        done.sort_unstable();
        done
    }

    /// Age expired entries: Valid becomes Invalid, Invalid is deleted.
    /// InSearch entries are left to the discovery timers.
    pub fn purge(&mut self, now: Instant) {
        let bad_link = now + self.bad_link_lifetime;
        let mut doomed = Vec::new();
        for e in self.routes.values_mut() {
            if e.lifetime > now {
                continue;
            }
            match e.state {
                RouteState::Valid => {
                    debug!(dst = %e.destination, "route expired");
                    e.invalidate(bad_link);
                }
                RouteState::Invalid => doomed.push(e.destination),
                RouteState::InSearch => {}
            }
        }
        for dst in doomed {
            self.delete_route(dst);
        }
    }

    /// Timer handles owned by entries that were deleted or replaced since
    /// the last call. The caller cancels them.
    pub fn take_released_timers(&mut self) -> Vec<TimerId> {
        std::mem::take(&mut self.released)
    }

    pub fn dump(&self, now: Instant) -> Vec<RouteSnapshot> {
        let mut out: Vec<RouteSnapshot> = self.routes.values().map(|e| e.snapshot(now)).collect();
        out.sort_by_key(|s| s.destination);
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.values()
    }

    pub fn clear(&mut self) {
        for e in self.routes.values() {
            self.released.extend(e.ack_timer);
        }
        self.routes.clear();
    }
}
