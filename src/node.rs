// src/node.rs
//! High-level AODV node abstraction.
//!
//! This wraps the routing table, request queue, duplicate caches and
//! neighbor table into one sans-IO engine. The embedding stack feeds it
//! three kinds of input, always with the current time:
//! - outbound data (`route_output`) and transit data (`route_input`)
//! - received control packets (`recv_control`)
//! - timer expiry (`poll_timeout` / `handle_timeout`)
//!
//! Control packets leave through the `Transport`. Route discovery and
//! route maintenance live in `discovery.rs` and `maintenance.rs`.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace, warn};

use crate::config::AodvConfig;
use crate::dedup::{BroadcastIdCache, SeenPacketCache};
use crate::error::{ConfigError, RouteError};
use crate::event::Event;
use crate::neighbor::NeighborTable;
use crate::packet::{ControlPacket, DataPacket, IpHeader};
use crate::queue::{Completion, Outcome, QueueEntry, RequestQueue};
use crate::routing::{Route, RouteEntry, RouteSnapshot, RoutingTable};
use crate::timer::{TimerId, Timers};
use crate::transport::{Interface, RecvMeta, Transmission, Transport};

/// Counters for RREQ/RERR rate limiting reset on this period.
const RATE_LIMIT_PERIOD: Duration = Duration::from_secs(1);

/// Upper bound on the random delay added to each Hello.
const HELLO_JITTER_MS: u64 = 10;

/// What the forwarding plane should do with a transit or inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardingDecision {
    /// Hand to the local stack.
    Deliver,
    /// Hand to the local stack and re-broadcast.
    DeliverAndForward(Route),
    Forward(Route),
    Drop(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Duplicate,
    NoRoute,
    TtlExpired,
    NoInterface,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    Hello,
    Purge,
    RateLimitReset,
    /// No RREP yet for this destination: widen the search or give up.
    RouteRequest(Ipv4Addr),
    /// Origination was rate limited: try again.
    RetryRequest(Ipv4Addr),
    /// No RREP-ACK from this neighbor in time.
    RrepAck(Ipv4Addr),
}

/// A single-threaded AODV routing engine.
pub struct AodvNode<T: Transport> {
    pub(crate) config: AodvConfig,
    pub(crate) transport: T,
    pub(crate) interfaces: Vec<Interface>,

    /// Own destination sequence number.
    pub(crate) seq_no: u32,
    /// Id of the last RREQ we originated.
    pub(crate) request_id: u32,

    pub(crate) routes: RoutingTable,
    pub(crate) queue: RequestQueue,
    pub(crate) neighbors: NeighborTable,
    pub(crate) rreq_ids: BroadcastIdCache,
    pub(crate) seen: SeenPacketCache,

    pub(crate) timers: Timers<TimerKind>,
    /// Outstanding discovery timer per destination.
    pub(crate) request_timers: HashMap<Ipv4Addr, TimerId>,
    pub(crate) hello_timer: Option<TimerId>,
    pub(crate) purge_timer: Option<TimerId>,
    pub(crate) rate_timer: Option<TimerId>,

    pub(crate) rreq_count: u16,
    pub(crate) rerr_count: u16,
    pub(crate) last_broadcast: Option<Instant>,
    pub(crate) rng: StdRng,

    events: Vec<Event>,
}

fn millis(field: &'static str, d: Duration) -> Result<u64, ConfigError> {
    u64::try_from(d.as_millis()).map_err(|_| ConfigError::Invalid {
        field,
        reason: "does not fit in milliseconds",
    })
}

impl<T: Transport> AodvNode<T> {
    /// Create an engine with no interfaces. Nothing is sent until the first
    /// `notify_interface_up`.
    pub fn new(config: AodvConfig, transport: T, now: Instant) -> Result<Self, ConfigError> {
        config.validate()?;

        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut node = AodvNode {
            routes: RoutingTable::new(config.delete_period()),
            queue: RequestQueue::new(config.max_queue_len, config.max_queue_time())
                .with_overflow_policy(config.queue_overflow),
            neighbors: NeighborTable::new(),
            rreq_ids: BroadcastIdCache::new(config.path_discovery_time()),
            seen: SeenPacketCache::new(config.path_discovery_time()),
            config,
            transport,
            interfaces: Vec::new(),
            seq_no: 0,
            request_id: 0,
            timers: Timers::new(),
            request_timers: HashMap::new(),
            hello_timer: None,
            purge_timer: None,
            rate_timer: None,
            rreq_count: 0,
            rerr_count: 0,
            last_broadcast: None,
            rng,
            events: Vec::new(),
        };

        node.purge_timer = Some(
            node.timers
                .schedule(now + node.config.purge_interval(), TimerKind::Purge),
        );
        node.rate_timer = Some(
            node.timers
                .schedule(now + RATE_LIMIT_PERIOD, TimerKind::RateLimitReset),
        );
        Ok(node)
    }

    //=== Accessors ===

    pub fn config(&self) -> &AodvConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn seq_no(&self) -> u32 {
        self.seq_no
    }

    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routes
    }

    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    /// Number of packets waiting for a route.
    pub fn queued_packets(&self) -> usize {
        self.queue.len()
    }

    /// Whether a route discovery for `dst` is in progress.
    pub fn is_searching(&self, dst: Ipv4Addr) -> bool {
        self.request_timers.contains_key(&dst)
    }

    /// Read-only dump of the routing table, sorted by destination.
    pub fn routing_table_dump(&self, now: Instant) -> Vec<RouteSnapshot> {
        self.routes.dump(now)
    }

    /// Take and return all pending events since the last call.
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn push_event(&mut self, ev: Event) {
        self.events.push(ev);
    }

    //=== Configuration ===

    /// Replace the whole configuration. Rejected settings leave the node
    /// untouched.
    pub fn set_config(&mut self, config: AodvConfig, now: Instant) -> Result<(), ConfigError> {
        config.validate()?;
        let hello_was = self.config.enable_hello;
        self.config = config;
        self.queue.set_max_len(self.config.max_queue_len);
        self.queue.set_timeout(self.config.max_queue_time());
        self.queue.set_overflow_policy(self.config.queue_overflow);
        self.routes.set_bad_link_lifetime(self.config.delete_period());
        self.rreq_ids.set_lifetime(self.config.path_discovery_time());
        self.seen.set_lifetime(self.config.path_discovery_time());
        if hello_was != self.config.enable_hello {
            self.apply_hello_enable(now);
        }
        Ok(())
    }

    fn update_config(
        &mut self,
        now: Instant,
        f: impl FnOnce(&mut AodvConfig),
    ) -> Result<(), ConfigError> {
        let mut cfg = self.config.clone();
        f(&mut cfg);
        self.set_config(cfg, now)
    }

    pub fn set_rreq_retries(&mut self, retries: u8, now: Instant) -> Result<(), ConfigError> {
        self.update_config(now, |c| c.rreq_retries = retries)
    }

    pub fn set_max_queue_len(&mut self, len: usize, now: Instant) -> Result<(), ConfigError> {
        self.update_config(now, |c| c.max_queue_len = len)
    }

    pub fn set_max_queue_time(&mut self, time: Duration, now: Instant) -> Result<(), ConfigError> {
        let ms = millis("max_queue_time_ms", time)?;
        self.update_config(now, |c| c.max_queue_time_ms = ms)
    }

    pub fn set_hello_enable(&mut self, enable: bool, now: Instant) -> Result<(), ConfigError> {
        self.update_config(now, |c| c.enable_hello = enable)
    }

    pub fn set_hello_interval(&mut self, interval: Duration, now: Instant) -> Result<(), ConfigError> {
        let ms = millis("hello_interval_ms", interval)?;
        self.update_config(now, |c| c.hello_interval_ms = ms)
    }

    pub fn set_ttl_bounds(
        &mut self,
        start: u8,
        increment: u8,
        threshold: u8,
        now: Instant,
    ) -> Result<(), ConfigError> {
        self.update_config(now, |c| {
            c.ttl_start = start;
            c.ttl_increment = increment;
            c.ttl_threshold = threshold;
        })
    }

    pub fn set_destination_only(&mut self, on: bool, now: Instant) -> Result<(), ConfigError> {
        self.update_config(now, |c| c.destination_only = on)
    }

    pub fn set_gratuitous_reply(&mut self, on: bool, now: Instant) -> Result<(), ConfigError> {
        self.update_config(now, |c| c.gratuitous_reply = on)
    }

    pub fn set_broadcast_enable(&mut self, on: bool, now: Instant) -> Result<(), ConfigError> {
        self.update_config(now, |c| c.enable_broadcast = on)
    }

    fn apply_hello_enable(&mut self, now: Instant) {
        if self.config.enable_hello {
            if self.hello_timer.is_none() && !self.interfaces.is_empty() {
                self.schedule_hello(now, Duration::ZERO);
            }
        } else if let Some(id) = self.hello_timer.take() {
            self.timers.cancel(id);
        }
    }

    //=== Interfaces ===

    /// Register a local interface. Hello starts with the first one.
    pub fn notify_interface_up(&mut self, iface: Interface, now: Instant) {
        let first = self.interfaces.is_empty();
        match self.interfaces.iter_mut().find(|i| i.index == iface.index) {
            Some(existing) => *existing = iface,
            None => self.interfaces.push(iface),
        }
        debug!(index = iface.index, local = %iface.local, "interface up");
        if first && self.config.enable_hello && self.hello_timer.is_none() {
            self.schedule_hello(now, Duration::ZERO);
        }
    }

    /// Drop an interface and every route through it. With no interfaces
    /// left the node forgets all state.
    pub fn notify_interface_down(&mut self, index: u32) {
        let before = self.interfaces.len();
        self.interfaces.retain(|i| i.index != index);
        if self.interfaces.len() == before {
            return;
        }
        let gone = self.routes.delete_routes_with_interface(index);
        debug!(index, routes = gone.len(), "interface down");

        if self.interfaces.is_empty() {
            if let Some(id) = self.hello_timer.take() {
                self.timers.cancel(id);
            }
            for (_, id) in self.request_timers.drain() {
                self.timers.cancel(id);
            }
            self.routes.clear();
            self.neighbors.clear();
            self.queue.drop_all(RouteError::NoInterface);
        }
        self.release_timers();
    }

    //=== Data path ===

    /// Route an outbound packet originated by this node.
    ///
    /// The completion always runs exactly once: at once with
    /// `Outcome::Forward` when a route is known, or later when discovery
    /// succeeds, fails or the packet times out. `Err(NoRouteYet)` means
    /// the packet is buffered.
    pub fn route_output(
        &mut self,
        packet: DataPacket,
        completion: Completion,
        now: Instant,
    ) -> Result<Route, RouteError> {
        let result = self.route_output_inner(packet, completion, now);
        self.release_timers();
        result
    }

    fn route_output_inner(
        &mut self,
        packet: DataPacket,
        completion: Completion,
        now: Instant,
    ) -> Result<Route, RouteError> {
        let dst = packet.destination();
        let Some(first) = self.interfaces.first().copied() else {
            completion(Outcome::Error {
                packet,
                error: RouteError::NoInterface,
            });
            return Err(RouteError::NoInterface);
        };

        if self.is_broadcast(dst) {
            let route = Route {
                destination: dst,
                source: first.local,
                gateway: dst,
                interface: first.index,
            };
            completion(Outcome::Forward { route, packet });
            return Ok(route);
        }

        if let Some(rt) = self.routes.lookup_valid(dst, now) {
            let route = rt.route(self.local_address(rt.interface));
            self.update_route_lifetime(dst, self.config.active_route_timeout(), now);
            trace!(dst = %dst, via = %route.gateway, "route output");
            completion(Outcome::Forward { route, packet });
            return Ok(route);
        }

        self.queue.enqueue(QueueEntry::new(packet, completion, now), now)?;
        if !self.request_timers.contains_key(&dst) {
            self.send_request(dst, now);
        }
        Err(RouteError::NoRouteYet)
    }

    /// Decide what to do with a data packet that arrived on `interface`.
    pub fn route_input(
        &mut self,
        header: &IpHeader,
        interface: u32,
        now: Instant,
    ) -> ForwardingDecision {
        let decision = self.route_input_inner(header, interface, now);
        self.release_timers();
        trace!(src = %header.source, dst = %header.destination, ?decision, "route input");
        decision
    }

    fn route_input_inner(
        &mut self,
        header: &IpHeader,
        interface: u32,
        now: Instant,
    ) -> ForwardingDecision {
        if self.interfaces.is_empty() {
            return ForwardingDecision::Drop(DropReason::NoInterface);
        }
        let origin = header.source;
        let dst = header.destination;
        let active = self.config.active_route_timeout();

        if self.is_local(origin) {
            return ForwardingDecision::Drop(DropReason::Duplicate);
        }

        if self.is_broadcast(dst) {
            if self.seen.is_duplicate(header, now) {
                return ForwardingDecision::Drop(DropReason::Duplicate);
            }
            self.update_route_lifetime(origin, active, now);
            if self.config.enable_broadcast && header.ttl > 1 {
                let source = self.local_address(interface);
                return ForwardingDecision::DeliverAndForward(Route {
                    destination: dst,
                    source,
                    gateway: dst,
                    interface,
                });
            }
            return ForwardingDecision::Deliver;
        }

        if self.is_local(dst) {
            self.update_route_lifetime(origin, active, now);
            if let Some(to_origin) = self.routes.lookup_valid(origin, now) {
                self.update_route_lifetime(to_origin.next_hop, active, now);
                self.refresh_neighbor(to_origin.next_hop, active, now);
            }
            return ForwardingDecision::Deliver;
        }

        if header.ttl <= 1 {
            return ForwardingDecision::Drop(DropReason::TtlExpired);
        }

        match self.routes.lookup_valid(dst, now) {
            Some(to_dst) => {
                let route = to_dst.route(self.local_address(to_dst.interface));
                self.update_route_lifetime(dst, active, now);
                self.update_route_lifetime(to_dst.next_hop, active, now);
                self.refresh_neighbor(to_dst.next_hop, active, now);
                if let Some(to_origin) = self.routes.lookup_valid(origin, now) {
                    self.update_route_lifetime(origin, active, now);
                    self.update_route_lifetime(to_origin.next_hop, active, now);
                    self.refresh_neighbor(to_origin.next_hop, active, now);
                }
                ForwardingDecision::Forward(route)
            }
            None => {
                let seq = self.routes.get(&dst).map_or(0, |e| e.seq_no);
                self.send_rerr_when_no_route_to_forward(dst, seq, origin, now);
                ForwardingDecision::Drop(DropReason::NoRoute)
            }
        }
    }

    /// Process one received AODV control packet. Malformed input is
    /// logged and dropped.
    pub fn recv_control(&mut self, bytes: &[u8], meta: RecvMeta, now: Instant) {
        self.recv_control_inner(bytes, meta, now);
        self.release_timers();
    }

    fn recv_control_inner(&mut self, bytes: &[u8], meta: RecvMeta, now: Instant) {
        if self.interface(meta.interface).is_none() {
            trace!(interface = meta.interface, "control packet on unknown interface");
            return;
        }
        if self.is_local(meta.sender) {
            // Our own broadcast echoed back.
            return;
        }
        let pkt = match ControlPacket::from_bytes(bytes) {
            Ok(p) => p,
            Err(e) => {
                warn!(sender = %meta.sender, error = %e, "dropping malformed control packet");
                return;
            }
        };

        self.update_route_to_neighbor(meta.sender, meta.interface, now);

        match pkt {
            ControlPacket::Rreq(h) => self.recv_request(h, meta, now),
            ControlPacket::Rrep(h) => self.recv_reply(h, meta, now),
            ControlPacket::Rerr(h) => self.recv_error(h, meta.sender, now),
            ControlPacket::RrepAck(_) => self.recv_reply_ack(meta.sender),
        }

        if let Some(hw) = meta.sender_hw {
            self.neighbors.update_hardware(meta.sender, hw);
        }
    }

    //=== Link layer feedback ===

    /// Delivery to `next_hop` failed at the link layer.
    pub fn notify_transmission_failure(&mut self, next_hop: Ipv4Addr, now: Instant) {
        let mut broken = self.neighbors.notify_transmission_failure(next_hop, now);
        if !broken.contains(&next_hop) {
            // Not a tracked neighbor (e.g. Hello disabled), still a broken link.
            self.handle_link_failure(next_hop, false, now);
        }
        broken.sort_unstable();
        for addr in broken {
            self.handle_link_failure(addr, true, now);
        }
        self.release_timers();
    }

    /// Delivery to the station with link-layer address `hw` failed.
    pub fn notify_hw_transmission_failure(&mut self, hw: [u8; 6], now: Instant) {
        for addr in self.neighbors.notify_hw_transmission_failure(hw, now) {
            self.handle_link_failure(addr, true, now);
        }
        self.release_timers();
    }

    //=== Timers ===

    /// Earliest instant at which `handle_timeout` has work to do.
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Fire every timer due at or before `now`, in deadline order.
    pub fn handle_timeout(&mut self, now: Instant) {
        while let Some((id, kind)) = self.timers.pop_expired(now) {
            match kind {
                TimerKind::Hello => {
                    if self.hello_timer == Some(id) {
                        self.hello_timer = None;
                        self.hello_timer_expire(now);
                    }
                }
                TimerKind::Purge => {
                    if self.purge_timer == Some(id) {
                        self.purge(now);
                        self.purge_timer = Some(
                            self.timers
                                .schedule(now + self.config.purge_interval(), TimerKind::Purge),
                        );
                    }
                }
                TimerKind::RateLimitReset => {
                    if self.rate_timer == Some(id) {
                        self.rreq_count = 0;
                        self.rerr_count = 0;
                        self.rate_timer = Some(
                            self.timers
                                .schedule(now + RATE_LIMIT_PERIOD, TimerKind::RateLimitReset),
                        );
                    }
                }
                TimerKind::RouteRequest(dst) => {
                    if self.request_timers.get(&dst) == Some(&id) {
                        self.request_timers.remove(&dst);
                        self.route_request_timer_expire(dst, now);
                    }
                }
                TimerKind::RetryRequest(dst) => {
                    if self.request_timers.get(&dst) == Some(&id) {
                        self.request_timers.remove(&dst);
                        if self.routes.lookup_valid(dst, now).is_some() {
                            self.send_packets_from_queue(dst, now);
                        } else {
                            self.send_request(dst, now);
                        }
                    }
                }
                TimerKind::RrepAck(neighbor) => self.ack_timer_expire(neighbor, id, now),
            }
            self.release_timers();
        }
    }

    /// Periodic sweep of every table, queue and cache.
    fn purge(&mut self, now: Instant) {
        self.routes.purge(now);
        self.queue.purge(now);
        self.rreq_ids.purge(now);
        self.seen.purge(now);
        for addr in self.neighbors.purge(now) {
            self.handle_link_failure(addr, true, now);
        }
    }

    /// Neighbor liveness is only tracked while Hello runs.
    pub(crate) fn refresh_neighbor(&mut self, addr: Ipv4Addr, lifetime: Duration, now: Instant) {
        if self.config.enable_hello {
            self.neighbors.update(addr, now + lifetime);
        }
    }

    pub(crate) fn schedule_hello(&mut self, now: Instant, delay: Duration) {
        let jitter = Duration::from_millis(self.rng.random_range(0..=HELLO_JITTER_MS));
        if let Some(old) = self.hello_timer.take() {
            self.timers.cancel(old);
        }
        self.hello_timer = Some(self.timers.schedule(now + delay + jitter, TimerKind::Hello));
    }

    /// Cancel timers owned by routes that left the table.
    pub(crate) fn release_timers(&mut self) {
        for id in self.routes.take_released_timers() {
            self.timers.cancel(id);
        }
    }

    //=== Addressing and sending ===

    pub(crate) fn interface(&self, index: u32) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.index == index)
    }

    pub(crate) fn local_address(&self, index: u32) -> Ipv4Addr {
        self.interface(index)
            .map_or(Ipv4Addr::UNSPECIFIED, |i| i.local)
    }

    pub(crate) fn is_local(&self, addr: Ipv4Addr) -> bool {
        self.interfaces.iter().any(|i| i.local == addr)
    }

    pub(crate) fn is_broadcast(&self, addr: Ipv4Addr) -> bool {
        addr.is_broadcast() || self.interfaces.iter().any(|i| i.broadcast == addr)
    }

    /// Unicast `pkt` to `next_hop` out of `interface`.
    pub(crate) fn send_to(&mut self, interface: u32, next_hop: Ipv4Addr, ttl: u8, pkt: &ControlPacket) {
        let Some(iface) = self.interface(interface).copied() else {
            trace!(interface, "no such interface, control packet dropped");
            return;
        };
        trace!(to = %next_hop, ttl, kind = ?pkt.message_type(), "send");
        self.transport.transmit(Transmission {
            interface: iface.index,
            source: iface.local,
            destination: next_hop,
            ttl,
            payload: pkt.to_bytes(),
        });
    }

    /// Send a pre-encoded broadcast on `iface`.
    pub(crate) fn broadcast_on(&mut self, iface: Interface, ttl: u8, payload: Vec<u8>, now: Instant) {
        self.transport.transmit(Transmission {
            interface: iface.index,
            source: iface.local,
            destination: iface.broadcast,
            ttl,
            payload,
        });
        self.last_broadcast = Some(now);
    }

    /// Broadcast `pkt` on every interface.
    pub(crate) fn broadcast(&mut self, pkt: &ControlPacket, ttl: u8, now: Instant) {
        let payload = pkt.to_bytes();
        for iface in self.interfaces.clone() {
            self.broadcast_on(iface, ttl, payload.clone(), now);
        }
    }

    /// Add or replace the entry for its destination, announcing material
    /// changes to valid routes.
    pub(crate) fn install_route(&mut self, entry: RouteEntry) {
        let dst = entry.destination;
        let changed = match self.routes.get(&dst) {
            None => true,
            Some(old) => {
                old.next_hop != entry.next_hop
                    || old.hops != entry.hops
                    || old.seq_no != entry.seq_no
                    || old.state != entry.state
            }
        };
        if !self.routes.update(entry.clone()) {
            self.routes.add_route(entry);
        }
        if changed {
            if let Some(rt) = self.routes.get(&dst).filter(|e| e.is_valid()).cloned() {
                self.push_event(Event::RouteUpdated(dst, rt));
            }
        }
    }
}
