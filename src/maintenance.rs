// src/maintenance.rs
//! Route maintenance: neighbor routes, lifetime refresh, link breaks,
//! RERR origination and relaying, and the RREP-ACK handshake.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::event::Event;
use crate::header::RerrHeader;
use crate::node::{AodvNode, TimerKind};
use crate::packet::ControlPacket;
use crate::routing::{RouteEntry, RouteState};
use crate::timer::TimerId;
use crate::transport::Transport;

impl<T: Transport> AodvNode<T> {
    //=== Neighbors and lifetimes ===

    /// Any control packet proves `sender` is one hop away.
    pub(crate) fn update_route_to_neighbor(&mut self, sender: Ipv4Addr, interface: u32, now: Instant) {
        let lifetime = now + self.config.active_route_timeout();
        let rt = match self.routes.lookup(sender, now) {
            None => RouteEntry::new(sender, None, interface, 1, sender, lifetime),
            Some(mut rt) => {
                rt.lifetime = rt.lifetime.max(lifetime);
                rt.next_hop = sender;
                rt.interface = interface;
                rt.hops = 1;
                rt.state = RouteState::Valid;
                rt
            }
        };
        self.install_route(rt);
    }

    /// Extend a valid route to at least `now + lifetime`.
    pub(crate) fn update_route_lifetime(&mut self, dst: Ipv4Addr, lifetime: Duration, now: Instant) -> bool {
        if self.routes.lookup_valid(dst, now).is_none() {
            return false;
        }
        match self.routes.get_mut(&dst) {
            Some(rt) => {
                rt.lifetime = rt.lifetime.max(now + lifetime);
                rt.rreq_count = 0;
                true
            }
            None => false,
        }
    }

    //=== Link breaks ===

    /// The link to `addr` is gone. `was_neighbor` is set when the neighbor
    /// table tracked it.
    pub(crate) fn handle_link_failure(&mut self, addr: Ipv4Addr, was_neighbor: bool, now: Instant) {
        debug!(neighbor = %addr, "link failure");
        if was_neighbor {
            self.push_event(Event::NeighborDown(addr));
        }
        self.send_rerr_when_breaks_link(addr, now);
    }

    /// Invalidate every route through `next_hop` and tell their precursors.
    /// Invalidated routes carry their sequence number plus one.
    fn send_rerr_when_breaks_link(&mut self, next_hop: Ipv4Addr, now: Instant) {
        let mut unreachable: Vec<(Ipv4Addr, u32)> = self
            .routes
            .destinations_using_next_hop(next_hop, now)
            .into_iter()
            .map(|(dst, seq)| (dst, seq.wrapping_add(1)))
            .collect();
        if unreachable.is_empty() {
            return;
        }
        unreachable.sort_unstable();

        let mut rerr = RerrHeader::new();
        let mut precursors: Vec<Ipv4Addr> = Vec::new();
        for &(dst, seq) in &unreachable {
            if !rerr.add_unreachable_destination(dst, seq) {
                self.send_rerr_message(&rerr, &precursors, now);
                rerr.clear();
                precursors.clear();
                rerr.add_unreachable_destination(dst, seq);
            }
            if let Some(rt) = self.routes.get(&dst) {
                merge(&mut precursors, rt.precursors());
            }
        }
        if rerr.dest_count() > 0 {
            self.send_rerr_message(&rerr, &precursors, now);
        }

        let bumped: HashMap<Ipv4Addr, u32> = unreachable.iter().copied().collect();
        self.invalidate(&bumped, now);
    }

    /// A data packet for `dst` from `origin` could not be forwarded.
    pub(crate) fn send_rerr_when_no_route_to_forward(
        &mut self,
        dst: Ipv4Addr,
        dst_seq: u32,
        origin: Ipv4Addr,
        now: Instant,
    ) {
        if self.rerr_count >= self.config.rerr_rate_limit {
            trace!(dst = %dst, "RERR rate limit reached");
            return;
        }
        let mut rerr = RerrHeader::new();
        rerr.add_unreachable_destination(dst, dst_seq);
        let pkt = ControlPacket::Rerr(rerr);

        match self.routes.lookup_valid(origin, now) {
            Some(to_origin) => {
                self.send_to(to_origin.interface, to_origin.next_hop, to_origin.hops, &pkt)
            }
            None => self.broadcast(&pkt, 1, now),
        }
        self.rerr_count += 1;
        debug!(dst = %dst, origin = %origin, "RERR: no route to forward");
    }

    /// Unicast to a lone precursor, otherwise broadcast on each interface
    /// that has one.
    fn send_rerr_message(&mut self, rerr: &RerrHeader, precursors: &[Ipv4Addr], now: Instant) {
        if precursors.is_empty() {
            trace!(count = rerr.dest_count(), "no precursors, RERR not sent");
            return;
        }
        if self.rerr_count >= self.config.rerr_rate_limit {
            trace!(count = rerr.dest_count(), "RERR rate limit reached");
            return;
        }
        let pkt = ControlPacket::Rerr(rerr.clone());

        if let [only] = precursors {
            if let Some(to_precursor) = self.routes.lookup_valid(*only, now) {
                debug!(to = %only, count = rerr.dest_count(), "RERR unicast");
                self.send_to(to_precursor.interface, to_precursor.next_hop, 1, &pkt);
                self.rerr_count += 1;
            }
            return;
        }

        let mut ifaces: Vec<u32> = Vec::new();
        for p in precursors {
            if let Some(rt) = self.routes.lookup_valid(*p, now) {
                if !ifaces.contains(&rt.interface) {
                    ifaces.push(rt.interface);
                }
            }
        }
        let payload = pkt.to_bytes();
        for index in ifaces {
            if let Some(iface) = self.interface(index).copied() {
                self.broadcast_on(iface, 1, payload.clone(), now);
            }
        }
        debug!(count = rerr.dest_count(), precursors = precursors.len(), "RERR broadcast");
        self.rerr_count += 1;
    }

    /// Invalidate routes and report the ones that changed.
    fn invalidate(&mut self, unreachable: &HashMap<Ipv4Addr, u32>, now: Instant) {
        let done = self.routes.invalidate_routes_to(unreachable, now);
        if done.is_empty() {
            return;
        }
        let reported = done
            .into_iter()
            .map(|dst| (dst, self.routes.get(&dst).map_or(unreachable[&dst], |e| e.seq_no)))
            .collect();
        self.push_event(Event::RoutesInvalidated(reported));
    }

    //=== RERR ===

    /// Invalidate the listed destinations we route through `sender`, and
    /// pass the news on to our own precursors.
    pub(crate) fn recv_error(&mut self, h: RerrHeader, sender: Ipv4Addr, now: Instant) {
        if h.no_delete() {
            // The upstream link was repaired locally; keep our routes.
            trace!(sender = %sender, "RERR with no-delete flag");
            return;
        }
        let via_sender = self.routes.destinations_using_next_hop(sender, now);
        let mut unreachable: Vec<(Ipv4Addr, u32)> = h
            .unreachable()
            .iter()
            .copied()
            .filter(|(dst, _)| via_sender.contains_key(dst))
            .collect();
        if unreachable.is_empty() {
            return;
        }
        unreachable.sort_unstable();
        unreachable.dedup_by_key(|(dst, _)| *dst);

        let mut rerr = RerrHeader::new();
        let mut precursors: Vec<Ipv4Addr> = Vec::new();
        for &(dst, seq) in &unreachable {
            if !rerr.add_unreachable_destination(dst, seq) {
                self.send_rerr_message(&rerr, &precursors, now);
                rerr.clear();
                precursors.clear();
                rerr.add_unreachable_destination(dst, seq);
            }
            if let Some(rt) = self.routes.get(&dst) {
                merge(&mut precursors, rt.precursors());
            }
        }
        if rerr.dest_count() > 0 {
            self.send_rerr_message(&rerr, &precursors, now);
        }

        let map: HashMap<Ipv4Addr, u32> = unreachable.into_iter().collect();
        self.invalidate(&map, now);
    }

    //=== RREP-ACK ===

    pub(crate) fn send_reply_ack(&mut self, neighbor: Ipv4Addr) {
        let Some(interface) = self.routes.get(&neighbor).map(|rt| rt.interface) else {
            return;
        };
        trace!(to = %neighbor, "RREP-ACK");
        self.send_to(interface, neighbor, 1, &ControlPacket::build_rrep_ack());
    }

    pub(crate) fn recv_reply_ack(&mut self, neighbor: Ipv4Addr) {
        let Some(rt) = self.routes.get_mut(&neighbor) else {
            return;
        };
        if let Some(id) = rt.ack_timer.take() {
            self.timers.cancel(id);
            trace!(neighbor = %neighbor, "RREP-ACK received");
        }
    }

    /// Wait `next_hop_wait` for an RREP-ACK from `neighbor`.
    pub(crate) fn schedule_ack_timer(&mut self, neighbor: Ipv4Addr, now: Instant) {
        let at = now + self.config.next_hop_wait();
        if self.routes.get(&neighbor).is_none() {
            return;
        }
        let id = self.timers.schedule(at, TimerKind::RrepAck(neighbor));
        if let Some(rt) = self.routes.get_mut(&neighbor) {
            if let Some(old) = rt.ack_timer.replace(id) {
                self.timers.cancel(old);
            }
        }
    }

    pub(crate) fn ack_timer_expire(&mut self, neighbor: Ipv4Addr, id: TimerId, now: Instant) {
        let Some(rt) = self.routes.get_mut(&neighbor) else {
            return;
        };
        if rt.ack_timer != Some(id) {
            return;
        }
        rt.ack_timer = None;
        let blacklist = self.config.blacklist_timeout();
        self.routes.mark_link_unidirectional(neighbor, blacklist, now);
        self.push_event(Event::LinkBlacklisted(neighbor));
    }
}

/// Append the addresses in `from` not already in `into`.
fn merge(into: &mut Vec<Ipv4Addr>, from: &[Ipv4Addr]) {
    for p in from {
        if !into.contains(p) {
            into.push(*p);
        }
    }
}
