// src/transport.rs
//! The boundary between the routing engine and the network stack.
//!
//! The engine never opens sockets. It hands every control packet it wants
//! on the wire to a `Transport`, and is told about arrivals through
//! `AodvNode::recv_control` with a `RecvMeta`.

use std::net::Ipv4Addr;

/// A local interface the engine may send on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interface {
    pub index: u32,
    pub local: Ipv4Addr,
    pub broadcast: Ipv4Addr,
}

impl Interface {
    pub fn new(index: u32, local: Ipv4Addr, broadcast: Ipv4Addr) -> Self {
        Interface {
            index,
            local,
            broadcast,
        }
    }
}

/// One encoded control packet to put on the wire. Drivers send it as a UDP
/// datagram to [`AODV_PORT`](crate::packet::AODV_PORT) on `destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub interface: u32,
    pub source: Ipv4Addr,
    /// Unicast next hop, or the interface broadcast address.
    pub destination: Ipv4Addr,
    pub ttl: u8,
    pub payload: Vec<u8>,
}

/// Where a received control packet came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvMeta {
    /// IP source of the packet: the previous hop.
    pub sender: Ipv4Addr,
    /// Interface index it arrived on.
    pub interface: u32,
    /// Remaining IP TTL on arrival.
    pub ttl: u8,
    pub sender_hw: Option<[u8; 6]>,
}

/// Send primitive supplied by the embedding network stack.
pub trait Transport {
    /// Queue `tx` for sending. Delivery failures come back later through
    /// `AodvNode::notify_transmission_failure`.
    fn transmit(&mut self, tx: Transmission);
}

/// Collects transmissions in memory.
impl Transport for Vec<Transmission> {
    fn transmit(&mut self, tx: Transmission) {
        self.push(tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_transport_records() {
        let mut out: Vec<Transmission> = Vec::new();
        out.transmit(Transmission {
            interface: 1,
            source: Ipv4Addr::new(10, 0, 0, 1),
            destination: Ipv4Addr::new(10, 0, 0, 255),
            ttl: 1,
            payload: vec![4, 0],
        });
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload, vec![4, 0]);
    }

    #[test]
    fn interface_new() {
        let iface = Interface::new(2, Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 255));
        assert_eq!(iface.index, 2);
        assert_eq!(iface.broadcast, Ipv4Addr::new(10, 0, 0, 255));
    }
}
