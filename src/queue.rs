// src/queue.rs
//! Packets waiting for a route.
//!
//! While a destination is being discovered, outbound packets for it sit
//! here with their completion. Each entry is completed exactly once:
//! forwarded when a route shows up, or failed on timeout, overflow or
//! discovery failure.

use std::collections::VecDeque;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::config::OverflowPolicy;
use crate::error::RouteError;
use crate::packet::DataPacket;
use crate::routing::Route;

/// Final result handed to a packet's completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Forward { route: Route, packet: DataPacket },
    Error { packet: DataPacket, error: RouteError },
}

pub type Completion = Box<dyn FnOnce(Outcome)>;

pub struct QueueEntry {
    pub packet: DataPacket,
    completion: Completion,
    pub expire: Instant,
}

impl fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueEntry")
            .field("packet", &self.packet)
            .field("expire", &self.expire)
            .finish_non_exhaustive()
    }
}

impl QueueEntry {
    /// The expiry is set by the queue on enqueue.
    pub fn new(packet: DataPacket, completion: Completion, now: Instant) -> Self {
        QueueEntry {
            packet,
            completion,
            expire: now,
        }
    }

    pub fn destination(&self) -> Ipv4Addr {
        self.packet.header.destination
    }

    fn same_packet(&self, other: &QueueEntry) -> bool {
        let (a, b) = (&self.packet.header, &other.packet.header);
        a.source == b.source && a.destination == b.destination && a.identification == b.identification
    }

    pub fn forward(self, route: Route) {
        (self.completion)(Outcome::Forward {
            route,
            packet: self.packet,
        });
    }

    pub fn fail(self, error: RouteError) {
        (self.completion)(Outcome::Error {
            packet: self.packet,
            error,
        });
    }
}

/// Bounded FIFO of packets awaiting route discovery.
#[derive(Debug)]
pub struct RequestQueue {
    entries: VecDeque<QueueEntry>,
    max_len: usize,
    timeout: Duration,
    overflow: OverflowPolicy,
}

impl RequestQueue {
    pub fn new(max_len: usize, timeout: Duration) -> Self {
        RequestQueue {
            entries: VecDeque::new(),
            max_len,
            timeout,
            overflow: OverflowPolicy::DropOldest,
        }
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = policy;
        self
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Shrinking below the current size evicts the oldest entries.
    pub fn set_max_len(&mut self, max_len: usize) {
        self.max_len = max_len;
        self.evict_to(max_len);
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Applies to entries enqueued from now on.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow
    }

    pub fn set_overflow_policy(&mut self, policy: OverflowPolicy) {
        self.overflow = policy;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Buffer `entry` until a route appears or it times out.
    ///
    /// A packet already queued (same source, destination and IP
    /// identification) is not queued twice; the duplicate's completion is
    /// dropped unused. At capacity the overflow policy either evicts the
    /// oldest entry or fails the new one with `QueueFull`, completing the
    /// loser synchronously.
    pub fn enqueue(&mut self, mut entry: QueueEntry, now: Instant) -> Result<(), RouteError> {
        self.purge(now);
        if self.entries.iter().any(|e| e.same_packet(&entry)) {
            trace!(dst = %entry.destination(), "packet already queued");
            return Ok(());
        }
        if self.entries.len() >= self.max_len {
            match self.overflow {
                OverflowPolicy::DropOldest => self.evict_to(self.max_len.saturating_sub(1)),
                OverflowPolicy::RejectNew => {
                    warn!(dst = %entry.destination(), "request queue full, packet dropped");
                    entry.fail(RouteError::QueueFull);
                    return Err(RouteError::QueueFull);
                }
            }
        }
        if self.max_len == 0 {
            entry.fail(RouteError::QueueFull);
            return Err(RouteError::QueueFull);
        }
        entry.expire = now + self.timeout;
        self.entries.push_back(entry);
        Ok(())
    }

    /// Oldest unexpired entry for `dst`, removed from the queue.
    pub fn dequeue(&mut self, dst: Ipv4Addr, now: Instant) -> Option<QueueEntry> {
        self.purge(now);
        let pos = self.entries.iter().position(|e| e.destination() == dst)?;
        self.entries.remove(pos)
    }

    pub fn find(&self, dst: Ipv4Addr) -> bool {
        self.entries.iter().any(|e| e.destination() == dst)
    }

    /// Fail every entry for `dst` with `error`.
    pub fn drop_all_for(&mut self, dst: Ipv4Addr, error: RouteError) -> usize {
        let (doomed, kept): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.destination() == dst);
        self.entries = kept;
        let n = doomed.len();
        if n > 0 {
            warn!(dst = %dst, dropped = n, %error, "dropping queued packets");
        }
        for e in doomed {
            e.fail(error);
        }
        n
    }

    /// Fail every queued entry with `error`.
    pub fn drop_all(&mut self, error: RouteError) {
        for e in std::mem::take(&mut self.entries) {
            e.fail(error);
        }
    }

    /// Fail entries whose timeout elapsed.
    pub fn purge(&mut self, now: Instant) {
        if self.entries.iter().all(|e| e.expire > now) {
            return;
        }
        let (expired, kept): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.expire <= now);
        self.entries = kept;
        for e in expired {
            warn!(dst = %e.destination(), "queued packet timed out");
            e.fail(RouteError::QueueTimeout);
        }
    }

    fn evict_to(&mut self, len: usize) {
        while self.entries.len() > len {
            if let Some(old) = self.entries.pop_front() {
                warn!(dst = %old.destination(), "request queue full, oldest packet dropped");
                old.fail(RouteError::QueueFull);
            }
        }
    }
}
