// src/packet.rs
// AODV control packet framing, data packet snapshots and convenience builders

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::PacketError;
use crate::header::{
    Header, MessageType, RerrHeader, RrepAckHeader, RrepHeader, RreqHeader, TypeHeader,
};

/// AODV control traffic UDP port (RFC 3561 §10)
pub const AODV_PORT: u16 = 654;

/// One AODV control message: a type byte followed by the matching body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPacket {
    Rreq(RreqHeader),
    Rrep(RrepHeader),
    Rerr(RerrHeader),
    RrepAck(RrepAckHeader),
}

impl ControlPacket {
    pub fn message_type(&self) -> MessageType {
        match self {
            ControlPacket::Rreq(_) => MessageType::Rreq,
            ControlPacket::Rrep(_) => MessageType::Rrep,
            ControlPacket::Rerr(_) => MessageType::Rerr,
            ControlPacket::RrepAck(_) => MessageType::RrepAck,
        }
    }

    pub fn serialized_size(&self) -> usize {
        1 + match self {
            ControlPacket::Rreq(h) => h.serialized_size(),
            ControlPacket::Rrep(h) => h.serialized_size(),
            ControlPacket::Rerr(h) => h.serialized_size(),
            ControlPacket::RrepAck(h) => h.serialized_size(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = TypeHeader::new(self.message_type()).to_bytes();
        buf.reserve(self.serialized_size() - 1);
        match self {
            ControlPacket::Rreq(h) => buf.extend(h.to_bytes()),
            ControlPacket::Rrep(h) => buf.extend(h.to_bytes()),
            ControlPacket::Rerr(h) => buf.extend(h.to_bytes()),
            ControlPacket::RrepAck(h) => buf.extend(h.to_bytes()),
        }
        buf
    }

    /// Decode one control message. Bytes after the message body are ignored.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, PacketError> {
        let (ty, used) = TypeHeader::deserialize(buf)?;
        let body = &buf[used..];
        let pkt = match ty.get() {
            MessageType::Rreq => ControlPacket::Rreq(RreqHeader::deserialize(body)?.0),
            MessageType::Rrep => ControlPacket::Rrep(RrepHeader::deserialize(body)?.0),
            MessageType::Rerr => ControlPacket::Rerr(RerrHeader::deserialize(body)?.0),
            MessageType::RrepAck => ControlPacket::RrepAck(RrepAckHeader::deserialize(body)?.0),
        };
        Ok(pkt)
    }

    //=== Convenience builders ===

    pub fn build_rreq(
        id: u32,
        dst: Ipv4Addr,
        dst_seq: Option<u32>,
        origin: Ipv4Addr,
        origin_seq: u32,
    ) -> Self {
        let mut h = RreqHeader::new(id, dst, origin, origin_seq);
        match dst_seq {
            Some(seq) => h.dst_seq = seq,
            None => h.set_unknown_seqno(true),
        }
        ControlPacket::Rreq(h)
    }

    pub fn build_rrep(
        hop_count: u8,
        dst: Ipv4Addr,
        dst_seq: u32,
        origin: Ipv4Addr,
        lifetime: Duration,
    ) -> Self {
        ControlPacket::Rrep(RrepHeader::new(hop_count, dst, dst_seq, origin, lifetime))
    }

    pub fn build_hello(addr: Ipv4Addr, seq: u32, lifetime: Duration) -> Self {
        ControlPacket::Rrep(RrepHeader::hello(addr, seq, lifetime))
    }

    pub fn build_rrep_ack() -> Self {
        ControlPacket::RrepAck(RrepAckHeader::new())
    }
}

/// The part of an upper-layer IPv4 header the engine routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpHeader {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    /// IP identification field, used for broadcast duplicate suppression.
    pub identification: u16,
    pub ttl: u8,
}

impl IpHeader {
    pub fn new(source: Ipv4Addr, destination: Ipv4Addr, identification: u16, ttl: u8) -> Self {
        IpHeader {
            source,
            destination,
            identification,
            ttl,
        }
    }
}

/// An outbound data packet handed to the engine by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub header: IpHeader,
    pub payload: Vec<u8>,
}

impl DataPacket {
    pub fn new(header: IpHeader, payload: Vec<u8>) -> Self {
        DataPacket { header, payload }
    }

    pub fn destination(&self) -> Ipv4Addr {
        self.header.destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn rreq_framing() {
        let pkt = ControlPacket::build_rreq(7, ip("10.0.0.4"), None, ip("10.0.0.1"), 3);
        let bytes = pkt.to_bytes();
        assert_eq!(bytes.len(), 24);
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes.len(), pkt.serialized_size());

        match ControlPacket::from_bytes(&bytes).unwrap() {
            ControlPacket::Rreq(h) => {
                assert!(h.unknown_seqno());
                assert_eq!(h.id, 7);
                assert_eq!(h.origin_seq, 3);
            }
            other => panic!("expected RREQ, got {other:?}"),
        }
    }

    #[test]
    fn rrep_and_hello_framing() {
        let pkt = ControlPacket::build_rrep(2, ip("10.0.0.4"), 5, ip("10.0.0.1"), Duration::from_secs(6));
        let bytes = pkt.to_bytes();
        assert_eq!(bytes.len(), 19);
        assert_eq!(bytes[0], 2);
        assert_eq!(ControlPacket::from_bytes(&bytes).unwrap(), pkt);

        let hello = ControlPacket::build_hello(ip("10.0.0.2"), 1, Duration::from_secs(2));
        match ControlPacket::from_bytes(&hello.to_bytes()).unwrap() {
            ControlPacket::Rrep(h) => assert!(h.is_hello()),
            other => panic!("expected RREP, got {other:?}"),
        }
    }

    #[test]
    fn rerr_and_ack_framing() {
        let mut rerr = RerrHeader::new();
        rerr.add_unreachable_destination(ip("10.0.0.9"), 4);
        let pkt = ControlPacket::Rerr(rerr);
        let bytes = pkt.to_bytes();
        assert_eq!(bytes.len(), 11);
        assert_eq!(ControlPacket::from_bytes(&bytes).unwrap(), pkt);

        let ack = ControlPacket::build_rrep_ack();
        assert_eq!(ack.to_bytes(), vec![4, 0]);
        assert_eq!(ack.message_type(), MessageType::RrepAck);
    }

    #[test]
    fn malformed_input_is_an_error() {
        assert_eq!(ControlPacket::from_bytes(&[]), Err(PacketError::Empty));
        assert_eq!(
            ControlPacket::from_bytes(&[0x10, 1, 2]),
            Err(PacketError::UnknownType(0x10))
        );
        assert!(matches!(
            ControlPacket::from_bytes(&[2, 0, 0]),
            Err(PacketError::TooShort { header: "RREP", .. })
        ));
    }

    #[test]
    fn data_packet_destination() {
        let hdr = IpHeader::new(ip("10.0.0.1"), ip("10.0.0.3"), 99, 64);
        let pkt = DataPacket::new(hdr, b"ping".to_vec());
        assert_eq!(pkt.destination(), ip("10.0.0.3"));
    }
}
