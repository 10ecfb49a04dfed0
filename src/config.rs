// src/config.rs
//! Protocol parameters for an AODV node.
//!
//! Defaults follow RFC 3561 §10. Intervals are stored in milliseconds so a
//! config file stays readable; the derived timeouts are computed on demand.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// When an intermediate node that holds a fresh route may answer an RREQ
/// itself instead of forwarding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntermediateReply {
    /// Reply unless the RREQ carries the destination-only flag.
    RespectDestinationOnly,
    /// Only the destination replies.
    Never,
    /// Reply even if the destination-only flag is set.
    Always,
}

/// What the request queue does when a packet arrives while it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Fail the oldest queued packet and accept the new one.
    DropOldest,
    /// Fail the new packet.
    RejectNew,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AodvConfig {
    /// Network-wide RREQ attempts before discovery fails.
    pub rreq_retries: u8,
    /// RREQs originated or forwarded per second.
    pub rreq_rate_limit: u16,
    /// RERRs sent per second.
    pub rerr_rate_limit: u16,
    pub active_route_timeout_ms: u64,
    pub net_diameter: u8,
    pub node_traversal_time_ms: u64,
    pub hello_interval_ms: u64,
    pub allowed_hello_loss: u16,
    pub timeout_buffer: u8,
    pub ttl_start: u8,
    pub ttl_increment: u8,
    pub ttl_threshold: u8,
    pub max_queue_len: usize,
    pub max_queue_time_ms: u64,
    pub purge_interval_ms: u64,
    pub enable_hello: bool,
    pub enable_broadcast: bool,
    /// Set the gratuitous-RREP flag on originated RREQs.
    pub gratuitous_reply: bool,
    /// Set the destination-only flag on originated RREQs.
    pub destination_only: bool,
    pub intermediate_reply: IntermediateReply,
    pub queue_overflow: OverflowPolicy,
    /// Seed for Hello jitter; `None` seeds from the OS.
    pub rng_seed: Option<u64>,
}

impl Default for AodvConfig {
    fn default() -> Self {
        AodvConfig {
            rreq_retries: 2,
            rreq_rate_limit: 10,
            rerr_rate_limit: 10,
            active_route_timeout_ms: 3000,
            net_diameter: 35,
            node_traversal_time_ms: 40,
            hello_interval_ms: 1000,
            allowed_hello_loss: 2,
            timeout_buffer: 2,
            ttl_start: 1,
            ttl_increment: 2,
            ttl_threshold: 7,
            max_queue_len: 64,
            max_queue_time_ms: 30_000,
            purge_interval_ms: 1000,
            enable_hello: true,
            enable_broadcast: true,
            gratuitous_reply: true,
            destination_only: false,
            intermediate_reply: IntermediateReply::RespectDestinationOnly,
            queue_overflow: OverflowPolicy::DropOldest,
            rng_seed: None,
        }
    }
}

/// Upper bound on every millisecond setting: one day.
pub const MAX_TIME_MS: u64 = 86_400_000;

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn invalid(field: &'static str, reason: &'static str) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

impl AodvConfig {
    /// Create a new config with RFC defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject settings the engine cannot run with. Nothing is clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero: [(&'static str, bool); 12] = [
            ("rreq_retries", self.rreq_retries == 0),
            ("max_queue_len", self.max_queue_len == 0),
            ("max_queue_time_ms", self.max_queue_time_ms == 0),
            ("hello_interval_ms", self.hello_interval_ms == 0),
            ("allowed_hello_loss", self.allowed_hello_loss == 0),
            ("ttl_start", self.ttl_start == 0),
            ("ttl_increment", self.ttl_increment == 0),
            ("purge_interval_ms", self.purge_interval_ms == 0),
            ("node_traversal_time_ms", self.node_traversal_time_ms == 0),
            ("active_route_timeout_ms", self.active_route_timeout_ms == 0),
            ("rreq_rate_limit", self.rreq_rate_limit == 0),
            ("rerr_rate_limit", self.rerr_rate_limit == 0),
        ];
        if let Some(&(field, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(invalid(field, "must be non-zero"));
        }
        let times: [(&'static str, u64); 5] = [
            ("max_queue_time_ms", self.max_queue_time_ms),
            ("hello_interval_ms", self.hello_interval_ms),
            ("purge_interval_ms", self.purge_interval_ms),
            ("node_traversal_time_ms", self.node_traversal_time_ms),
            ("active_route_timeout_ms", self.active_route_timeout_ms),
        ];
        // Keeps every derived timeout and deadline within `Duration` and `Instant`.
        if let Some(&(field, _)) = times.iter().find(|(_, v)| *v > MAX_TIME_MS) {
            return Err(invalid(field, "must not exceed one day"));
        }
        if self.ttl_start > self.ttl_threshold {
            return Err(invalid("ttl_start", "must not exceed ttl_threshold"));
        }
        if self.ttl_threshold >= self.net_diameter {
            return Err(invalid("ttl_threshold", "must be below net_diameter"));
        }
        Ok(())
    }

    //=== Derived timeouts ===

    pub fn active_route_timeout(&self) -> Duration {
        ms(self.active_route_timeout_ms)
    }

    pub fn node_traversal_time(&self) -> Duration {
        ms(self.node_traversal_time_ms)
    }

    pub fn hello_interval(&self) -> Duration {
        ms(self.hello_interval_ms)
    }

    pub fn max_queue_time(&self) -> Duration {
        ms(self.max_queue_time_ms)
    }

    pub fn purge_interval(&self) -> Duration {
        ms(self.purge_interval_ms)
    }

    pub fn net_traversal_time(&self) -> Duration {
        self.node_traversal_time() * 2 * self.net_diameter as u32
    }

    pub fn path_discovery_time(&self) -> Duration {
        self.net_traversal_time() * 2
    }

    pub fn my_route_timeout(&self) -> Duration {
        self.path_discovery_time().max(self.active_route_timeout()) * 2
    }

    pub fn delete_period(&self) -> Duration {
        self.active_route_timeout().max(self.hello_interval()) * 5
    }

    pub fn next_hop_wait(&self) -> Duration {
        self.node_traversal_time() + Duration::from_millis(10)
    }

    pub fn blacklist_timeout(&self) -> Duration {
        self.net_traversal_time() * self.rreq_retries as u32
    }

    /// How long a silent neighbor is kept, and the lifetime advertised in Hellos.
    pub fn neighbor_lifetime(&self) -> Duration {
        self.hello_interval() * self.allowed_hello_loss as u32
    }

    //=== Builder setters ===

    pub fn rreq_retries(mut self, value: u8) -> Self {
        self.rreq_retries = value;
        self
    }

    pub fn rreq_rate_limit(mut self, value: u16) -> Self {
        self.rreq_rate_limit = value;
        self
    }

    pub fn rerr_rate_limit(mut self, value: u16) -> Self {
        self.rerr_rate_limit = value;
        self
    }

    pub fn active_route_timeout_ms(mut self, value: u64) -> Self {
        self.active_route_timeout_ms = value;
        self
    }

    pub fn net_diameter(mut self, value: u8) -> Self {
        self.net_diameter = value;
        self
    }

    pub fn node_traversal_time_ms(mut self, value: u64) -> Self {
        self.node_traversal_time_ms = value;
        self
    }

    pub fn hello_interval_ms(mut self, value: u64) -> Self {
        self.hello_interval_ms = value;
        self
    }

    pub fn allowed_hello_loss(mut self, value: u16) -> Self {
        self.allowed_hello_loss = value;
        self
    }

    pub fn ttl_bounds(mut self, start: u8, increment: u8, threshold: u8) -> Self {
        self.ttl_start = start;
        self.ttl_increment = increment;
        self.ttl_threshold = threshold;
        self
    }

    pub fn max_queue_len(mut self, value: usize) -> Self {
        self.max_queue_len = value;
        self
    }

    pub fn max_queue_time_ms(mut self, value: u64) -> Self {
        self.max_queue_time_ms = value;
        self
    }

    pub fn enable_hello(mut self, value: bool) -> Self {
        self.enable_hello = value;
        self
    }

    pub fn enable_broadcast(mut self, value: bool) -> Self {
        self.enable_broadcast = value;
        self
    }

    pub fn gratuitous_reply(mut self, value: bool) -> Self {
        self.gratuitous_reply = value;
        self
    }

    pub fn destination_only(mut self, value: bool) -> Self {
        self.destination_only = value;
        self
    }

    pub fn intermediate_reply(mut self, value: IntermediateReply) -> Self {
        self.intermediate_reply = value;
        self
    }

    pub fn queue_overflow(mut self, value: OverflowPolicy) -> Self {
        self.queue_overflow = value;
        self
    }

    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }
}
