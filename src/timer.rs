// src/timer.rs
//! One-shot timers driven by the caller's clock.
//!
//! The engine never sleeps. It schedules deadlines here, the driver asks
//! for the earliest one and calls back in once it has passed. Ids are
//! never reused, so a stale handle can neither cancel nor match a newer
//! timer.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// Handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug)]
pub struct Timers<K> {
    next_id: u64,
    // (deadline, id) orders equal deadlines by scheduling order.
    queue: BTreeMap<(Instant, u64), K>,
    deadlines: HashMap<u64, Instant>,
}

impl<K> Default for Timers<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Timers<K> {
    pub fn new() -> Self {
        Timers {
            next_id: 0,
            queue: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    pub fn schedule(&mut self, at: Instant, kind: K) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.queue.insert((at, id), kind);
        self.deadlines.insert(id, at);
        TimerId(id)
    }

    /// Cancel a pending timer. Returns false if it already fired or was
    /// cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.deadlines.remove(&id.0) {
            Some(at) => self.queue.remove(&(at, id.0)).is_some(),
            None => false,
        }
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id.0)
    }

    pub fn deadline(&self, id: TimerId) -> Option<Instant> {
        self.deadlines.get(&id.0).copied()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(at, _)| *at)
    }

    /// Remove and return the earliest timer due at or before `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<(TimerId, K)> {
        let (&(at, id), _) = self.queue.iter().next()?;
        if at > now {
            return None;
        }
        let kind = self.queue.remove(&(at, id))?;
        self.deadlines.remove(&id);
        Some((TimerId(id), kind))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.deadlines.clear();
    }
}
