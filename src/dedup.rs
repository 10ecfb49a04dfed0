// src/dedup.rs
//! Duplicate suppression.
//!
//! - `BroadcastIdCache`: (originator, RREQ id) pairs already processed
//! - `SeenPacketCache`: (source, IP identification) fingerprints of
//!   broadcast data packets already relayed
//!
//! Both are a time-bounded set: an entry suppresses repeats until its
//! expiry instant, then disappears on the next sweep.

use std::collections::HashMap;
use std::hash::Hash;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crate::packet::IpHeader;

/// Set of keys that each expire a fixed lifetime after first insertion.
#[derive(Debug, Clone)]
struct ExpiringSet<K> {
    entries: HashMap<K, Instant>,
    lifetime: Duration,
}

impl<K: Eq + Hash> ExpiringSet<K> {
    fn new(lifetime: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            lifetime,
        }
    }

    /// True if `key` is present and unexpired; otherwise records it and
    /// returns false.
    fn check_and_insert(&mut self, key: K, now: Instant) -> bool {
        self.purge(now);
        if self.entries.contains_key(&key) {
            return true;
        }
        self.entries.insert(key, now + self.lifetime);
        false
    }

    fn purge(&mut self, now: Instant) {
        self.entries.retain(|_, expire| *expire > now);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Cache of RREQ (originator, id) pairs.
#[derive(Debug, Clone)]
pub struct BroadcastIdCache {
    set: ExpiringSet<(Ipv4Addr, u32)>,
}

impl BroadcastIdCache {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            set: ExpiringSet::new(lifetime),
        }
    }

    /// Returns true if this RREQ instance was already seen within the
    /// cache lifetime. The first sighting is recorded and returns false.
    pub fn is_duplicate(&mut self, origin: Ipv4Addr, id: u32, now: Instant) -> bool {
        self.set.check_and_insert((origin, id), now)
    }

    pub fn purge(&mut self, now: Instant) {
        self.set.purge(now);
    }

    /// Number of unexpired entries, after sweeping at `now`.
    pub fn len(&mut self, now: Instant) -> usize {
        self.purge(now);
        self.set.len()
    }

    pub fn lifetime(&self) -> Duration {
        self.set.lifetime
    }

    /// Applies to entries inserted from now on.
    pub fn set_lifetime(&mut self, lifetime: Duration) {
        self.set.lifetime = lifetime;
    }
}

/// Coarse fingerprint cache for relayed broadcast data.
#[derive(Debug, Clone)]
pub struct SeenPacketCache {
    set: ExpiringSet<(Ipv4Addr, u16)>,
}

impl SeenPacketCache {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            set: ExpiringSet::new(lifetime),
        }
    }

    pub fn is_duplicate(&mut self, header: &IpHeader, now: Instant) -> bool {
        self.set
            .check_and_insert((header.source, header.identification), now)
    }

    pub fn purge(&mut self, now: Instant) {
        self.set.purge(now);
    }

    pub fn len(&mut self, now: Instant) -> usize {
        self.purge(now);
        self.set.len()
    }

    pub fn set_lifetime(&mut self, lifetime: Duration) {
        self.set.lifetime = lifetime;
    }
}
