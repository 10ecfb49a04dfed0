// src/header.rs
//! AODV control message headers (RFC 3561 §5).
//!
//! Every control message starts with a one-byte `TypeHeader`, followed by
//! one of the fixed (or, for RERR, counted) bodies:
//! - `RreqHeader`: 23 bytes
//! - `RrepHeader`: 18 bytes
//! - `RerrHeader`: 2 + 8 × dest-count bytes
//! - `RrepAckHeader`: 1 byte
//!
//! All multi-byte integers are big-endian. Decoding never trusts a count
//! field without checking it against the bytes actually available.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Write};
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::PacketError;

pub const RREQ_SIZE: usize = 23;
pub const RREP_SIZE: usize = 18;
pub const RREP_ACK_SIZE: usize = 1;
pub const RERR_FIXED_SIZE: usize = 2;
pub const RERR_ENTRY_SIZE: usize = 8;

/// Maximum number of unreachable destinations in one RERR (u8 count field).
pub const RERR_MAX_DESTINATIONS: usize = 255;

/// Largest prefix size the RREP prefix field can carry (5 bits).
pub const RREP_MAX_PREFIX_SIZE: u8 = 0x1f;

const RREQ_FLAG_GRATUITOUS: u8 = 0x01;
const RREQ_FLAG_DESTINATION_ONLY: u8 = 0x02;
const RREQ_FLAG_UNKNOWN_SEQNO: u8 = 0x04;

const RREP_FLAG_ACK_REQUIRED: u8 = 0x80;
const RERR_FLAG_NO_DELETE: u8 = 0x80;

/// Common encode/decode surface of every control header.
pub trait Header: Sized {
    /// Short name used in error messages.
    const NAME: &'static str;

    fn serialized_size(&self) -> usize;

    fn serialize<W: Write>(&self, w: &mut W) -> io::Result<()>;

    /// Decode from the front of `buf`, returning the header and the number
    /// of bytes consumed.
    fn deserialize(buf: &[u8]) -> Result<(Self, usize), PacketError>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        // Writing into a Vec cannot fail.
        self.serialize(&mut buf).expect("Vec<u8> writer is infallible");
        buf
    }
}

fn require(header: &'static str, buf: &[u8], min: usize) -> Result<(), PacketError> {
    if buf.len() < min {
        return Err(PacketError::TooShort {
            header,
            min,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn read_addr(cur: &mut Cursor<&[u8]>) -> io::Result<Ipv4Addr> {
    Ok(Ipv4Addr::from(cur.read_u32::<BigEndian>()?))
}

fn write_addr<W: Write>(w: &mut W, addr: Ipv4Addr) -> io::Result<()> {
    w.write_all(&addr.octets())
}

// --- Type header ---

/// AODV message type, the first byte of every control packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Rreq = 1,
    Rrep = 2,
    Rerr = 3,
    RrepAck = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Rreq),
            2 => Ok(MessageType::Rrep),
            3 => Ok(MessageType::Rerr),
            4 => Ok(MessageType::RrepAck),
            other => Err(PacketError::UnknownType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeHeader {
    message_type: MessageType,
}

impl TypeHeader {
    pub fn new(message_type: MessageType) -> Self {
        TypeHeader { message_type }
    }

    pub fn get(&self) -> MessageType {
        self.message_type
    }

    /// Whether a raw type byte names a known message type.
    pub fn is_valid(byte: u8) -> bool {
        MessageType::try_from(byte).is_ok()
    }
}

impl Header for TypeHeader {
    const NAME: &'static str = "type header";

    fn serialized_size(&self) -> usize {
        1
    }

    fn serialize<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(self.message_type as u8)
    }

    fn deserialize(buf: &[u8]) -> Result<(Self, usize), PacketError> {
        let first = *buf.first().ok_or(PacketError::Empty)?;
        let message_type = MessageType::try_from(first)?;
        Ok((TypeHeader { message_type }, 1))
    }
}

// --- RREQ ---

/// Route request.
///
/// ```text
/// flags(1) reserved(1) hop_count(1) id(4) dst(4) dst_seq(4) origin(4) origin_seq(4)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RreqHeader {
    flags: u8,
    pub reserved: u8,
    pub hop_count: u8,
    pub id: u32,
    pub dst: Ipv4Addr,
    /// Meaningful only while the unknown-seqno flag is clear.
    pub dst_seq: u32,
    pub origin: Ipv4Addr,
    pub origin_seq: u32,
}

impl Default for RreqHeader {
    fn default() -> Self {
        RreqHeader {
            flags: 0,
            reserved: 0,
            hop_count: 0,
            id: 0,
            dst: Ipv4Addr::UNSPECIFIED,
            dst_seq: 0,
            origin: Ipv4Addr::UNSPECIFIED,
            origin_seq: 0,
        }
    }
}

impl RreqHeader {
    pub fn new(id: u32, dst: Ipv4Addr, origin: Ipv4Addr, origin_seq: u32) -> Self {
        RreqHeader {
            id,
            dst,
            origin,
            origin_seq,
            ..Default::default()
        }
    }

    /// Raw flags byte, including any bits this implementation does not interpret.
    pub fn flags(&self) -> u8 {
        self.flags
    }

    fn set_flag(&mut self, mask: u8, on: bool) {
        if on {
            self.flags |= mask;
        } else {
            self.flags &= !mask;
        }
    }

    pub fn gratuitous_rrep(&self) -> bool {
        self.flags & RREQ_FLAG_GRATUITOUS != 0
    }

    pub fn set_gratuitous_rrep(&mut self, on: bool) {
        self.set_flag(RREQ_FLAG_GRATUITOUS, on);
    }

    pub fn destination_only(&self) -> bool {
        self.flags & RREQ_FLAG_DESTINATION_ONLY != 0
    }

    pub fn set_destination_only(&mut self, on: bool) {
        self.set_flag(RREQ_FLAG_DESTINATION_ONLY, on);
    }

    pub fn unknown_seqno(&self) -> bool {
        self.flags & RREQ_FLAG_UNKNOWN_SEQNO != 0
    }

    pub fn set_unknown_seqno(&mut self, on: bool) {
        self.set_flag(RREQ_FLAG_UNKNOWN_SEQNO, on);
    }
}

impl Header for RreqHeader {
    const NAME: &'static str = "RREQ";

    fn serialized_size(&self) -> usize {
        RREQ_SIZE
    }

    fn serialize<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(self.flags)?;
        w.write_u8(self.reserved)?;
        w.write_u8(self.hop_count)?;
        w.write_u32::<BigEndian>(self.id)?;
        write_addr(w, self.dst)?;
        w.write_u32::<BigEndian>(self.dst_seq)?;
        write_addr(w, self.origin)?;
        w.write_u32::<BigEndian>(self.origin_seq)
    }

    fn deserialize(buf: &[u8]) -> Result<(Self, usize), PacketError> {
        require(Self::NAME, buf, RREQ_SIZE)?;
        let mut cur = Cursor::new(buf);
        let read = |cur: &mut Cursor<&[u8]>| -> io::Result<RreqHeader> {
            Ok(RreqHeader {
                flags: cur.read_u8()?,
                reserved: cur.read_u8()?,
                hop_count: cur.read_u8()?,
                id: cur.read_u32::<BigEndian>()?,
                dst: read_addr(cur)?,
                dst_seq: cur.read_u32::<BigEndian>()?,
                origin: read_addr(cur)?,
                origin_seq: cur.read_u32::<BigEndian>()?,
            })
        };
        let h = read(&mut cur).map_err(|_| PacketError::TooShort {
            header: Self::NAME,
            min: RREQ_SIZE,
            actual: buf.len(),
        })?;
        Ok((h, cur.position() as usize))
    }
}

// --- RREP ---

/// Route reply. Also used, with `dst == origin`, as a Hello.
///
/// ```text
/// A|R|R|prefix(5) hop_count(1) dst(4) dst_seq(4) origin(4) lifetime_ms(4)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RrepHeader {
    ack_required: bool,
    prefix_size: u8,
    pub hop_count: u8,
    pub dst: Ipv4Addr,
    pub dst_seq: u32,
    pub origin: Ipv4Addr,
    lifetime_ms: u32,
}

impl Default for RrepHeader {
    fn default() -> Self {
        RrepHeader {
            ack_required: false,
            prefix_size: 0,
            hop_count: 0,
            dst: Ipv4Addr::UNSPECIFIED,
            dst_seq: 0,
            origin: Ipv4Addr::UNSPECIFIED,
            lifetime_ms: 0,
        }
    }
}

impl RrepHeader {
    pub fn new(
        hop_count: u8,
        dst: Ipv4Addr,
        dst_seq: u32,
        origin: Ipv4Addr,
        lifetime: Duration,
    ) -> Self {
        let mut h = RrepHeader {
            hop_count,
            dst,
            dst_seq,
            origin,
            ..Default::default()
        };
        h.set_lifetime(lifetime);
        h
    }

    /// Hello message: a one-hop RREP advertising `addr` to itself.
    pub fn hello(addr: Ipv4Addr, seq: u32, lifetime: Duration) -> Self {
        RrepHeader::new(0, addr, seq, addr, lifetime)
    }

    pub fn is_hello(&self) -> bool {
        self.dst == self.origin
    }

    pub fn ack_required(&self) -> bool {
        self.ack_required
    }

    pub fn set_ack_required(&mut self, on: bool) {
        self.ack_required = on;
    }

    pub fn prefix_size(&self) -> u8 {
        self.prefix_size
    }

    /// Set the prefix size. Returns false (and leaves the header untouched)
    /// if `size` does not fit the 5-bit field.
    pub fn set_prefix_size(&mut self, size: u8) -> bool {
        if size > RREP_MAX_PREFIX_SIZE {
            return false;
        }
        self.prefix_size = size;
        true
    }

    pub fn lifetime(&self) -> Duration {
        Duration::from_millis(self.lifetime_ms as u64)
    }

    /// Set the advertised lifetime, saturating at `u32::MAX` milliseconds.
    pub fn set_lifetime(&mut self, lifetime: Duration) {
        self.lifetime_ms = u32::try_from(lifetime.as_millis()).unwrap_or(u32::MAX);
    }
}

impl Header for RrepHeader {
    const NAME: &'static str = "RREP";

    fn serialized_size(&self) -> usize {
        RREP_SIZE
    }

    fn serialize<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut first = self.prefix_size & RREP_MAX_PREFIX_SIZE;
        if self.ack_required {
            first |= RREP_FLAG_ACK_REQUIRED;
        }
        w.write_u8(first)?;
        w.write_u8(self.hop_count)?;
        write_addr(w, self.dst)?;
        w.write_u32::<BigEndian>(self.dst_seq)?;
        write_addr(w, self.origin)?;
        w.write_u32::<BigEndian>(self.lifetime_ms)
    }

    fn deserialize(buf: &[u8]) -> Result<(Self, usize), PacketError> {
        require(Self::NAME, buf, RREP_SIZE)?;
        let mut cur = Cursor::new(buf);
        let read = |cur: &mut Cursor<&[u8]>| -> io::Result<RrepHeader> {
            let first = cur.read_u8()?;
            Ok(RrepHeader {
                ack_required: first & RREP_FLAG_ACK_REQUIRED != 0,
                prefix_size: first & RREP_MAX_PREFIX_SIZE,
                hop_count: cur.read_u8()?,
                dst: read_addr(cur)?,
                dst_seq: cur.read_u32::<BigEndian>()?,
                origin: read_addr(cur)?,
                lifetime_ms: cur.read_u32::<BigEndian>()?,
            })
        };
        let h = read(&mut cur).map_err(|_| PacketError::TooShort {
            header: Self::NAME,
            min: RREP_SIZE,
            actual: buf.len(),
        })?;
        Ok((h, cur.position() as usize))
    }
}

// --- RERR ---

/// Route error: a list of (destination, sequence number) pairs that became
/// unreachable.
///
/// ```text
/// dest_count(1) N|reserved(1) dest_count × (addr(4) seq(4))
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RerrHeader {
    no_delete: bool,
    unreachable: Vec<(Ipv4Addr, u32)>,
}

impl RerrHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_delete(&self) -> bool {
        self.no_delete
    }

    pub fn set_no_delete(&mut self, on: bool) {
        self.no_delete = on;
    }

    pub fn dest_count(&self) -> u8 {
        // Bounded by RERR_MAX_DESTINATIONS on every insertion path.
        self.unreachable.len() as u8
    }

    pub fn unreachable(&self) -> &[(Ipv4Addr, u32)] {
        &self.unreachable
    }

    pub fn is_full(&self) -> bool {
        self.unreachable.len() >= RERR_MAX_DESTINATIONS
    }

    /// Add an unreachable destination.
    ///
    /// A destination already listed is accepted without change. Returns
    /// false when the header already carries the maximum of 255 entries.
    pub fn add_unreachable_destination(&mut self, dst: Ipv4Addr, seq: u32) -> bool {
        if self.unreachable.iter().any(|(d, _)| *d == dst) {
            return true;
        }
        if self.is_full() {
            return false;
        }
        self.unreachable.push((dst, seq));
        true
    }

    /// Pop one unreachable destination, or `None` if the list is empty.
    pub fn remove_unreachable_destination(&mut self) -> Option<(Ipv4Addr, u32)> {
        self.unreachable.pop()
    }

    pub fn clear(&mut self) {
        self.unreachable.clear();
        self.no_delete = false;
    }
}

impl Header for RerrHeader {
    const NAME: &'static str = "RERR";

    fn serialized_size(&self) -> usize {
        RERR_FIXED_SIZE + RERR_ENTRY_SIZE * self.unreachable.len()
    }

    fn serialize<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(self.dest_count())?;
        w.write_u8(if self.no_delete { RERR_FLAG_NO_DELETE } else { 0 })?;
        for (dst, seq) in &self.unreachable {
            write_addr(w, *dst)?;
            w.write_u32::<BigEndian>(*seq)?;
        }
        Ok(())
    }

    fn deserialize(buf: &[u8]) -> Result<(Self, usize), PacketError> {
        require(Self::NAME, buf, RERR_FIXED_SIZE)?;
        let count = buf[0] as usize;
        let total = RERR_FIXED_SIZE + RERR_ENTRY_SIZE * count;
        require(Self::NAME, buf, total)?;

        let mut cur = Cursor::new(buf);
        let read = |cur: &mut Cursor<&[u8]>| -> io::Result<RerrHeader> {
            cur.read_u8()?; // count, already validated
            let flags = cur.read_u8()?;
            let mut unreachable = Vec::with_capacity(count);
            for _ in 0..count {
                let dst = read_addr(cur)?;
                let seq = cur.read_u32::<BigEndian>()?;
                unreachable.push((dst, seq));
            }
            Ok(RerrHeader {
                no_delete: flags & RERR_FLAG_NO_DELETE != 0,
                unreachable,
            })
        };
        let h = read(&mut cur).map_err(|_| PacketError::TooShort {
            header: Self::NAME,
            min: total,
            actual: buf.len(),
        })?;
        Ok((h, cur.position() as usize))
    }
}

// --- RREP-ACK ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RrepAckHeader {
    pub reserved: u8,
}

impl RrepAckHeader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Header for RrepAckHeader {
    const NAME: &'static str = "RREP-ACK";

    fn serialized_size(&self) -> usize {
        RREP_ACK_SIZE
    }

    fn serialize<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(self.reserved)
    }

    fn deserialize(buf: &[u8]) -> Result<(Self, usize), PacketError> {
        require(Self::NAME, buf, RREP_ACK_SIZE)?;
        Ok((RrepAckHeader { reserved: buf[0] }, RREP_ACK_SIZE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    // --- Type header ---

    #[test]
    fn type_header_roundtrip() {
        let h = TypeHeader::new(MessageType::Rreq);
        let bytes = h.to_bytes();
        assert_eq!(bytes, vec![1]);
        let (parsed, used) = TypeHeader::deserialize(&bytes).unwrap();
        assert_eq!(used, 1);
        assert_eq!(parsed, h);
    }

    #[test]
    fn type_header_rejects_unknown() {
        assert!(TypeHeader::is_valid(4));
        assert!(!TypeHeader::is_valid(0));
        assert!(!TypeHeader::is_valid(5));
        assert_eq!(
            TypeHeader::deserialize(&[9]),
            Err(PacketError::UnknownType(9))
        );
        assert_eq!(TypeHeader::deserialize(&[]), Err(PacketError::Empty));
    }

    // --- RREQ ---

    #[test]
    fn rreq_flags() {
        let mut h = RreqHeader::new(1, ip("1.2.3.4"), ip("4.3.2.1"), 10);
        assert!(!h.gratuitous_rrep());
        assert!(!h.destination_only());
        assert!(!h.unknown_seqno());

        h.set_gratuitous_rrep(true);
        h.set_destination_only(true);
        h.set_unknown_seqno(true);
        assert_eq!(h.flags(), 0x07);

        h.set_destination_only(false);
        assert!(h.gratuitous_rrep());
        assert!(!h.destination_only());
        assert!(h.unknown_seqno());
    }

    #[test]
    fn rreq_to_bytes() {
        let mut h = RreqHeader::new(0x01020304, ip("10.0.0.9"), ip("10.0.0.1"), 7);
        h.hop_count = 6;
        h.dst_seq = 40;
        h.set_gratuitous_rrep(true);
        assert_eq!(
            h.to_bytes(),
            vec![
                0x01, 0, 6, // flags, reserved, hops
                1, 2, 3, 4, // id
                10, 0, 0, 9, // dst
                0, 0, 0, 40, // dst seq
                10, 0, 0, 1, // origin
                0, 0, 0, 7, // origin seq
            ]
        );
    }

    #[test]
    fn rreq_roundtrip_is_23_bytes() {
        let mut h = RreqHeader::new(55, ip("1.1.1.1"), ip("4.4.4.4"), 23);
        h.hop_count = 7;
        h.dst_seq = 5;
        h.set_unknown_seqno(true);
        let bytes = h.to_bytes();
        assert_eq!(bytes.len(), RREQ_SIZE);
        let (parsed, used) = RreqHeader::deserialize(&bytes).unwrap();
        assert_eq!(used, 23);
        assert_eq!(parsed, h);
    }

    #[test]
    fn rreq_truncated() {
        let bytes = RreqHeader::default().to_bytes();
        let err = RreqHeader::deserialize(&bytes[..10]).unwrap_err();
        assert_eq!(
            err,
            PacketError::TooShort {
                header: "RREQ",
                min: 23,
                actual: 10
            }
        );
    }

    // --- RREP ---

    #[test]
    fn rrep_accessors() {
        let mut h = RrepHeader::new(12, ip("1.2.3.4"), 2, ip("4.3.2.1"), Duration::from_secs(3));
        assert_eq!(h.prefix_size(), 0);
        assert_eq!(h.lifetime(), Duration::from_secs(3));

        h.set_lifetime(Duration::from_millis(1200));
        assert_eq!(h.lifetime(), Duration::from_millis(1200));
        h.set_ack_required(true);
        assert!(h.ack_required());
        h.set_ack_required(false);
        assert!(!h.ack_required());

        assert!(h.set_prefix_size(2));
        assert_eq!(h.prefix_size(), 2);
        assert!(!h.set_prefix_size(32));
        assert_eq!(h.prefix_size(), 2);
    }

    #[test]
    fn rrep_lifetime_saturates() {
        let h = RrepHeader::new(0, ip("1.1.1.1"), 0, ip("2.2.2.2"), Duration::from_secs(u64::MAX / 4));
        assert_eq!(h.lifetime(), Duration::from_millis(u32::MAX as u64));
    }

    #[test]
    fn rrep_hello() {
        let h = RrepHeader::hello(ip("10.0.0.2"), 9, Duration::from_secs(15));
        assert!(h.is_hello());
        assert_eq!(h.dst, h.origin);
        assert_eq!(h.dst_seq, 9);
        assert_eq!(h.lifetime(), Duration::from_secs(15));
    }

    #[test]
    fn rrep_to_bytes_packs_ack_and_prefix() {
        let mut h = RrepHeader::new(3, ip("10.0.0.4"), 5, ip("10.0.0.1"), Duration::from_millis(1000));
        h.set_ack_required(true);
        h.set_prefix_size(4);
        assert_eq!(
            h.to_bytes(),
            vec![
                0x84, 3, // A + prefix, hops
                10, 0, 0, 4, // dst
                0, 0, 0, 5, // dst seq
                10, 0, 0, 1, // origin
                0, 0, 0x03, 0xe8, // lifetime
            ]
        );
    }

    #[test]
    fn rrep_roundtrip_is_18_bytes() {
        let mut h = RrepHeader::new(15, ip("1.1.1.1"), 123, ip("4.4.4.4"), Duration::from_millis(1200));
        h.set_ack_required(true);
        h.set_prefix_size(2);
        let bytes = h.to_bytes();
        assert_eq!(bytes.len(), RREP_SIZE);
        let (parsed, used) = RrepHeader::deserialize(&bytes).unwrap();
        assert_eq!(used, 18);
        assert_eq!(parsed, h);
    }

    // --- RERR ---

    #[test]
    fn rerr_add_and_remove() {
        let mut h = RerrHeader::new();
        h.set_no_delete(true);
        assert!(h.no_delete());

        let dst = ip("1.2.3.4");
        assert!(h.add_unreachable_destination(dst, 12));
        assert_eq!(h.dest_count(), 1);
        assert!(h.add_unreachable_destination(dst, 13));
        assert_eq!(h.dest_count(), 1);
        assert!(h.add_unreachable_destination(ip("4.3.2.1"), 12));
        assert_eq!(h.dest_count(), 2);

        assert_eq!(h.remove_unreachable_destination(), Some((ip("4.3.2.1"), 12)));
        assert_eq!(h.remove_unreachable_destination(), Some((dst, 12)));
        assert_eq!(h.remove_unreachable_destination(), None);
    }

    #[test]
    fn rerr_refuses_more_than_255() {
        let mut h = RerrHeader::new();
        for i in 0..255u32 {
            assert!(h.add_unreachable_destination(Ipv4Addr::from(0x0a00_0000 + i), i));
        }
        assert!(h.is_full());
        assert!(!h.add_unreachable_destination(ip("192.168.0.1"), 1));
        assert_eq!(h.dest_count(), 255);
    }

    #[test]
    fn rerr_roundtrip() {
        let mut h = RerrHeader::new();
        h.set_no_delete(true);
        h.add_unreachable_destination(ip("1.2.3.4"), 12);
        h.add_unreachable_destination(ip("4.3.2.1"), 12);
        let bytes = h.to_bytes();
        assert_eq!(bytes.len(), h.serialized_size());
        assert_eq!(&bytes[..2], &[2, 0x80]);
        let (parsed, used) = RerrHeader::deserialize(&bytes).unwrap();
        assert_eq!(used, 18);
        assert_eq!(parsed, h);
    }

    #[test]
    fn rerr_roundtrip_at_count_bounds() {
        let empty = RerrHeader::new();
        let bytes = empty.to_bytes();
        assert_eq!(bytes, vec![0, 0]);
        let (parsed, used) = RerrHeader::deserialize(&bytes).unwrap();
        assert_eq!(used, RERR_FIXED_SIZE);
        assert_eq!(parsed, empty);
        assert!(parsed.unreachable().is_empty());

        let mut full = RerrHeader::new();
        for i in 0..RERR_MAX_DESTINATIONS as u32 {
            assert!(full.add_unreachable_destination(Ipv4Addr::from(0x0a00_0100 + i), u32::MAX - i));
        }
        let bytes = full.to_bytes();
        assert_eq!(bytes.len(), RERR_FIXED_SIZE + RERR_MAX_DESTINATIONS * RERR_ENTRY_SIZE);
        assert_eq!(bytes[0], 255);
        let (parsed, used) = RerrHeader::deserialize(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(parsed.dest_count(), 255);
        assert_eq!(parsed.unreachable()[254], (Ipv4Addr::from(0x0a00_0100 + 254), u32::MAX - 254));
        assert_eq!(parsed, full);
    }

    #[test]
    fn rerr_count_checked_against_buffer() {
        // Claims three destinations but carries one.
        let bytes = vec![3, 0, 10, 0, 0, 1, 0, 0, 0, 1];
        let err = RerrHeader::deserialize(&bytes).unwrap_err();
        assert_eq!(
            err,
            PacketError::TooShort {
                header: "RERR",
                min: 26,
                actual: 10
            }
        );
    }

    // --- RREP-ACK ---

    #[test]
    fn rrep_ack_roundtrip() {
        let h = RrepAckHeader::new();
        let bytes = h.to_bytes();
        assert_eq!(bytes, vec![0]);
        let (parsed, used) = RrepAckHeader::deserialize(&bytes).unwrap();
        assert_eq!(used, 1);
        assert_eq!(parsed, h);
        assert!(RrepAckHeader::deserialize(&[]).is_err());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn addr() -> impl Strategy<Value = Ipv4Addr> {
        any::<u32>().prop_map(Ipv4Addr::from)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn rreq_roundtrip(
            flags in any::<u8>(),
            reserved in any::<u8>(),
            hop_count in any::<u8>(),
            id in any::<u32>(),
            dst in addr(),
            dst_seq in any::<u32>(),
            origin in addr(),
            origin_seq in any::<u32>(),
        ) {
            let mut h = RreqHeader::new(id, dst, origin, origin_seq);
            h.flags = flags;
            h.reserved = reserved;
            h.hop_count = hop_count;
            h.dst_seq = dst_seq;
            let bytes = h.to_bytes();
            let (parsed, used) = RreqHeader::deserialize(&bytes).unwrap();
            prop_assert_eq!(used, RREQ_SIZE);
            prop_assert_eq!(parsed, h);
        }

        #[test]
        fn rrep_roundtrip(
            ack in any::<bool>(),
            prefix in 0..=RREP_MAX_PREFIX_SIZE,
            hop_count in any::<u8>(),
            dst in addr(),
            dst_seq in any::<u32>(),
            origin in addr(),
            lifetime_ms in any::<u32>(),
        ) {
            let mut h = RrepHeader::new(hop_count, dst, dst_seq, origin, Duration::from_millis(lifetime_ms as u64));
            h.set_ack_required(ack);
            prop_assert!(h.set_prefix_size(prefix));
            let bytes = h.to_bytes();
            let (parsed, used) = RrepHeader::deserialize(&bytes).unwrap();
            prop_assert_eq!(used, RREP_SIZE);
            prop_assert_eq!(parsed, h);
        }

        #[test]
        fn rerr_roundtrip(
            no_delete in any::<bool>(),
            entries in proptest::collection::btree_map(any::<u32>(), any::<u32>(), 0..=RERR_MAX_DESTINATIONS),
        ) {
            let mut h = RerrHeader::new();
            h.set_no_delete(no_delete);
            for (dst, seq) in &entries {
                prop_assert!(h.add_unreachable_destination(Ipv4Addr::from(*dst), *seq));
            }
            prop_assert_eq!(h.dest_count() as usize, entries.len());
            let bytes = h.to_bytes();
            let (parsed, used) = RerrHeader::deserialize(&bytes).unwrap();
            prop_assert_eq!(used, h.serialized_size());
            prop_assert_eq!(parsed, h);
        }

        #[test]
        fn truncated_input_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..40)) {
            let _ = TypeHeader::deserialize(&bytes);
            let _ = RreqHeader::deserialize(&bytes);
            let _ = RrepHeader::deserialize(&bytes);
            let _ = RerrHeader::deserialize(&bytes);
            let _ = RrepAckHeader::deserialize(&bytes);
        }
    }
}
