// src/event.rs
//! High-level events emitted by an AODV node.
//!
//! This allows applications to react to route and neighbor changes without
//! constantly polling and diffing the routing table.

use std::net::Ipv4Addr;

use crate::routing::RouteEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A route was added or refreshed with new next hop, hops or sequence number.
    RouteUpdated(Ipv4Addr, RouteEntry),

    /// Routes were invalidated; (destination, sequence number) pairs.
    RoutesInvalidated(Vec<(Ipv4Addr, u32)>),

    /// A neighbor expired or its link failed.
    NeighborDown(Ipv4Addr),

    /// Route discovery for a destination gave up.
    DiscoveryFailed(Ipv4Addr),

    /// No RREP-ACK came back; the link to this neighbor is blacklisted.
    LinkBlacklisted(Ipv4Addr),
}
