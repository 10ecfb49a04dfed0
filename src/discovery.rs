// src/discovery.rs
//! Route discovery: RREQ origination with expanding ring search, RREQ
//! handling, RREP generation and forwarding, and Hello.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::config::IntermediateReply;
use crate::error::RouteError;
use crate::event::Event;
use crate::header::{RrepHeader, RreqHeader};
use crate::node::{AodvNode, TimerKind};
use crate::packet::ControlPacket;
use crate::routing::{RouteEntry, RouteState, is_newer_seq};
use crate::transport::{RecvMeta, Transport};

/// Cap on the exponential backoff between network-wide RREQs.
const MAX_BACKOFF_SHIFT: u32 = 16;

impl<T: Transport> AodvNode<T> {
    //=== Origination ===

    /// Broadcast an RREQ for `dst` and arm the retry timer.
    pub(crate) fn send_request(&mut self, dst: Ipv4Addr, now: Instant) {
        let Some(first) = self.interfaces.first().copied() else {
            return;
        };

        if self.rreq_count >= self.config.rreq_rate_limit {
            let at = self
                .rate_timer
                .and_then(|id| self.timers.deadline(id))
                .unwrap_or(now + Duration::from_secs(1));
            trace!(dst = %dst, "RREQ rate limit reached, deferring");
            self.arm_request_timer(dst, at, TimerKind::RetryRequest(dst));
            return;
        }
        self.rreq_count += 1;

        let cfg = &self.config;
        let (ttl_start, ttl_increment, ttl_threshold, net_diameter) =
            (cfg.ttl_start, cfg.ttl_increment, cfg.ttl_threshold, cfg.net_diameter);
        let lifetime = now + cfg.path_discovery_time();

        let mut dst_seq = None;
        let ttl = match self.routes.lookup(dst, now) {
            Some(mut rt) => {
                let ttl = if rt.state == RouteState::InSearch {
                    let t = rt.hops.saturating_add(ttl_increment);
                    if t > ttl_threshold { net_diameter } else { t }
                } else {
                    rt.hops.saturating_add(ttl_increment).min(net_diameter)
                };
                if ttl == net_diameter {
                    rt.rreq_count = rt.rreq_count.saturating_add(1);
                }
                if rt.valid_seq_no {
                    dst_seq = Some(rt.seq_no);
                }
                rt.hops = ttl;
                rt.state = RouteState::InSearch;
                rt.lifetime = lifetime;
                self.routes.update(rt);
                ttl
            }
            None => {
                let mut entry = RouteEntry::new(
                    dst,
                    None,
                    first.index,
                    ttl_start,
                    Ipv4Addr::UNSPECIFIED,
                    lifetime,
                );
                if ttl_start == net_diameter {
                    entry.rreq_count = 1;
                }
                entry.state = RouteState::InSearch;
                self.routes.add_route(entry);
                ttl_start
            }
        };

        self.seq_no = self.seq_no.wrapping_add(1);
        self.request_id = self.request_id.wrapping_add(1);

        for iface in self.interfaces.clone() {
            let mut pkt = ControlPacket::build_rreq(
                self.request_id,
                dst,
                dst_seq,
                iface.local,
                self.seq_no,
            );
            if let ControlPacket::Rreq(h) = &mut pkt {
                h.set_gratuitous_rrep(self.config.gratuitous_reply);
                h.set_destination_only(self.config.destination_only);
            }
            // Our own RREQ must not be processed when it comes back.
            self.rreq_ids.is_duplicate(iface.local, self.request_id, now);
            self.broadcast_on(iface, ttl, pkt.to_bytes(), now);
        }
        debug!(dst = %dst, ttl, id = self.request_id, "RREQ sent");

        self.schedule_rreq_retry(dst, now);
    }

    /// Ring search while below the network diameter, then binary
    /// exponential backoff over full network traversals.
    fn schedule_rreq_retry(&mut self, dst: Ipv4Addr, now: Instant) {
        let Some(rt) = self.routes.get(&dst) else {
            return;
        };
        let retry = if rt.hops < self.config.net_diameter {
            self.config.node_traversal_time()
                * 2
                * (u32::from(rt.hops) + u32::from(self.config.timeout_buffer))
        } else {
            let shift = u32::from(rt.rreq_count).min(MAX_BACKOFF_SHIFT);
            self.config.net_traversal_time() * (1u32 << shift)
        };
        self.arm_request_timer(dst, now + retry, TimerKind::RouteRequest(dst));
    }

    fn arm_request_timer(&mut self, dst: Ipv4Addr, at: Instant, kind: TimerKind) {
        if let Some(old) = self.request_timers.remove(&dst) {
            self.timers.cancel(old);
        }
        let id = self.timers.schedule(at, kind);
        self.request_timers.insert(dst, id);
    }

    /// No RREP arrived in time.
    pub(crate) fn route_request_timer_expire(&mut self, dst: Ipv4Addr, now: Instant) {
        if self.routes.lookup_valid(dst, now).is_some() {
            self.send_packets_from_queue(dst, now);
            return;
        }
        match self.routes.lookup(dst, now) {
            Some(rt)
                if rt.state == RouteState::InSearch
                    && rt.rreq_count < self.config.rreq_retries =>
            {
                self.send_request(dst, now);
            }
            _ => self.fail_discovery(dst),
        }
    }

    fn fail_discovery(&mut self, dst: Ipv4Addr) {
        debug!(dst = %dst, "route discovery failed");
        if let Some(id) = self.request_timers.remove(&dst) {
            self.timers.cancel(id);
        }
        self.routes.delete_route(dst);
        self.queue.drop_all_for(dst, RouteError::DestinationUnreachable);
        self.push_event(Event::DiscoveryFailed(dst));
    }

    /// Hand every queued packet for `dst` to the current valid route.
    pub(crate) fn send_packets_from_queue(&mut self, dst: Ipv4Addr, now: Instant) {
        let Some(rt) = self.routes.lookup_valid(dst, now) else {
            return;
        };
        let route = rt.route(self.local_address(rt.interface));
        while let Some(entry) = self.queue.dequeue(dst, now) {
            trace!(dst = %dst, via = %route.gateway, "flushing queued packet");
            entry.forward(route);
        }
    }

    //=== RREQ ===

    pub(crate) fn recv_request(&mut self, mut h: RreqHeader, meta: RecvMeta, now: Instant) {
        let src = meta.sender;

        if self
            .routes
            .get(&src)
            .is_some_and(|rt| rt.is_blacklisted(now))
        {
            trace!(sender = %src, "ignoring RREQ over blacklisted link");
            return;
        }
        if self.is_local(h.origin) {
            return;
        }
        if self.rreq_ids.is_duplicate(h.origin, h.id, now) {
            trace!(origin = %h.origin, id = h.id, "duplicate RREQ");
            return;
        }

        let hop = h.hop_count.saturating_add(1);
        h.hop_count = hop;

        // Reverse route towards the originator.
        let reverse = (self.config.net_traversal_time() * 2)
            .saturating_sub(self.config.node_traversal_time() * 2 * u32::from(hop));
        let to_origin = match self.routes.lookup(h.origin, now) {
            Some(mut rt) => {
                if !rt.valid_seq_no || is_newer_seq(h.origin_seq, rt.seq_no) {
                    rt.seq_no = h.origin_seq;
                }
                rt.valid_seq_no = true;
                rt.next_hop = src;
                rt.interface = meta.interface;
                rt.hops = hop;
                rt.state = RouteState::Valid;
                rt.lifetime = rt.lifetime.max(now + reverse);
                rt
            }
            None => RouteEntry::new(
                h.origin,
                Some(h.origin_seq),
                meta.interface,
                hop,
                src,
                now + reverse,
            ),
        };
        self.install_route(to_origin.clone());

        if self.is_local(h.dst) {
            debug!(origin = %h.origin, "RREQ for us, replying");
            self.send_reply(&h, &to_origin);
            return;
        }

        if let Some(to_dst) = self.routes.lookup(h.dst, now) {
            // The RREQ came from our own next hop: answering would loop.
            if to_dst.next_hop == src {
                trace!(dst = %h.dst, "RREQ from next hop towards destination, dropped");
                return;
            }
            let fresh = to_dst.valid_seq_no
                && (h.unknown_seqno() || !is_newer_seq(h.dst_seq, to_dst.seq_no));
            if fresh {
                let allowed = match self.config.intermediate_reply {
                    IntermediateReply::Never => false,
                    IntermediateReply::Always => true,
                    IntermediateReply::RespectDestinationOnly => !h.destination_only(),
                };
                if allowed && to_dst.is_valid() {
                    self.send_reply_by_intermediate(&to_dst, &to_origin, h.gratuitous_rrep(), now);
                    return;
                }
                h.dst_seq = to_dst.seq_no;
                h.set_unknown_seqno(false);
            }
        }

        if meta.ttl < 2 {
            trace!(dst = %h.dst, "RREQ TTL exhausted");
            return;
        }
        if self.rreq_count >= self.config.rreq_rate_limit {
            trace!(dst = %h.dst, "RREQ rate limit reached, not forwarding");
            return;
        }
        self.rreq_count += 1;
        trace!(dst = %h.dst, origin = %h.origin, ttl = meta.ttl - 1, "forwarding RREQ");
        self.broadcast(&ControlPacket::Rreq(h), meta.ttl - 1, now);
    }

    /// Answer an RREQ addressed to us.
    fn send_reply(&mut self, h: &RreqHeader, to_origin: &RouteEntry) {
        if !h.unknown_seqno() && h.dst_seq == self.seq_no.wrapping_add(1) {
            self.seq_no = self.seq_no.wrapping_add(1);
        }
        let rrep = ControlPacket::build_rrep(
            0,
            h.dst,
            self.seq_no,
            h.origin,
            self.config.my_route_timeout(),
        );
        self.send_to(to_origin.interface, to_origin.next_hop, to_origin.hops, &rrep);
    }

    /// Answer an RREQ from our own fresh route, optionally telling the
    /// destination about the originator as well.
    fn send_reply_by_intermediate(
        &mut self,
        to_dst: &RouteEntry,
        to_origin: &RouteEntry,
        gratuitous: bool,
        now: Instant,
    ) {
        let mut rrep = RrepHeader::new(
            to_dst.hops,
            to_dst.destination,
            to_dst.seq_no,
            to_origin.destination,
            to_dst.remaining(now),
        );
        // The destination is our neighbor; the link back to the
        // originator's next hop may be one-way.
        if to_dst.hops == 1 {
            rrep.set_ack_required(true);
            self.schedule_ack_timer(to_origin.next_hop, now);
        }

        if let Some(rt) = self.routes.get_mut(&to_dst.destination) {
            rt.insert_precursor(to_origin.next_hop);
        }
        if let Some(rt) = self.routes.get_mut(&to_origin.destination) {
            rt.insert_precursor(to_dst.next_hop);
        }

        debug!(dst = %to_dst.destination, origin = %to_origin.destination, "intermediate RREP");
        self.send_to(
            to_origin.interface,
            to_origin.next_hop,
            to_origin.hops,
            &ControlPacket::Rrep(rrep),
        );

        if gratuitous {
            let grat = ControlPacket::build_rrep(
                to_origin.hops,
                to_origin.destination,
                to_origin.seq_no,
                to_dst.destination,
                to_origin.remaining(now),
            );
            self.send_to(to_dst.interface, to_dst.next_hop, to_dst.hops, &grat);
        }
    }

    //=== RREP ===

    pub(crate) fn recv_reply(&mut self, mut h: RrepHeader, meta: RecvMeta, now: Instant) {
        if h.is_hello() {
            self.process_hello(&h, meta.interface, now);
            return;
        }
        let sender = meta.sender;
        let dst = h.dst;
        let hop = h.hop_count.saturating_add(1);
        h.hop_count = hop;

        if h.ack_required() {
            self.send_reply_ack(sender);
            h.set_ack_required(false);
        }

        let existing = self.routes.lookup(dst, now);
        let accept = match &existing {
            None => true,
            Some(rt) => {
                !rt.valid_seq_no
                    || is_newer_seq(h.dst_seq, rt.seq_no)
                    || (h.dst_seq == rt.seq_no && (!rt.is_valid() || hop < rt.hops))
            }
        };
        if !accept {
            trace!(dst = %dst, seq = h.dst_seq, "stale RREP ignored");
            return;
        }
        let mut rt = existing.unwrap_or_else(|| {
            RouteEntry::new(dst, Some(h.dst_seq), meta.interface, hop, sender, now)
        });
        rt.seq_no = h.dst_seq;
        rt.valid_seq_no = true;
        rt.next_hop = sender;
        rt.interface = meta.interface;
        rt.hops = hop;
        rt.state = RouteState::Valid;
        rt.lifetime = now + h.lifetime();
        self.install_route(rt);

        if self.is_local(h.origin) {
            if let Some(id) = self.request_timers.remove(&dst) {
                self.timers.cancel(id);
            }
            debug!(dst = %dst, hops = hop, "route discovered");
            self.send_packets_from_queue(dst, now);
            return;
        }

        let Some(mut to_origin) = self.routes.lookup_valid(h.origin, now) else {
            trace!(origin = %h.origin, "no reverse route for RREP");
            return;
        };
        to_origin.lifetime = to_origin
            .lifetime
            .max(now + self.config.active_route_timeout());
        self.routes.update(to_origin.clone());

        let Some(to_dst) = self.routes.get(&dst).cloned() else {
            return;
        };
        if let Some(rt) = self.routes.get_mut(&dst) {
            rt.insert_precursor(to_origin.next_hop);
        }
        if let Some(rt) = self.routes.get_mut(&h.origin) {
            rt.insert_precursor(to_dst.next_hop);
        }
        if let Some(rt) = self.routes.get_mut(&to_dst.next_hop) {
            rt.insert_precursor(to_origin.next_hop);
        }
        if let Some(rt) = self.routes.get_mut(&to_origin.next_hop) {
            rt.insert_precursor(to_dst.next_hop);
        }

        if meta.ttl < 2 {
            trace!(dst = %dst, "RREP TTL exhausted");
            return;
        }
        trace!(dst = %dst, origin = %h.origin, via = %to_origin.next_hop, "forwarding RREP");
        self.send_to(
            to_origin.interface,
            to_origin.next_hop,
            meta.ttl - 1,
            &ControlPacket::Rrep(h),
        );
    }

    //=== Hello ===

    fn process_hello(&mut self, h: &RrepHeader, interface: u32, now: Instant) {
        let neighbor = h.dst;
        let expire = now + h.lifetime();
        let rt = match self.routes.lookup(neighbor, now) {
            Some(mut rt) => {
                if !rt.valid_seq_no || is_newer_seq(h.dst_seq, rt.seq_no) {
                    rt.seq_no = h.dst_seq;
                }
                rt.valid_seq_no = true;
                rt.next_hop = neighbor;
                rt.interface = interface;
                rt.hops = 1;
                rt.state = RouteState::Valid;
                rt.lifetime = rt.lifetime.max(expire);
                rt
            }
            None => RouteEntry::new(neighbor, Some(h.dst_seq), interface, 1, neighbor, expire),
        };
        self.install_route(rt);

        if self.config.enable_hello {
            self.neighbors
                .update(neighbor, now + self.config.neighbor_lifetime());
        }
    }

    fn send_hello(&mut self, now: Instant) {
        let lifetime = self.config.neighbor_lifetime();
        for iface in self.interfaces.clone() {
            let hello = ControlPacket::build_hello(iface.local, self.seq_no, lifetime);
            self.broadcast_on(iface, 1, hello.to_bytes(), now);
        }
        trace!(seq = self.seq_no, "Hello sent");
    }

    /// Send a Hello unless some other broadcast already went out within the
    /// last interval, then rearm.
    pub(crate) fn hello_timer_expire(&mut self, now: Instant) {
        if !self.config.enable_hello || self.interfaces.is_empty() {
            return;
        }
        let interval = self.config.hello_interval();
        let delay = match self.last_broadcast.take() {
            Some(at) if now.saturating_duration_since(at) < interval => {
                interval - now.saturating_duration_since(at)
            }
            _ => {
                self.send_hello(now);
                interval
            }
        };
        self.schedule_hello(now, delay);
    }
}
