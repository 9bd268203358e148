//! IPv4 header parsing.
//!
//! Grounded on `common/ip.c`. Fields needed only for arithmetic (total
//! length, offset) are decoded to host values; fields used purely for
//! byte-equality comparisons (identification, addresses) end up as the same
//! numeric values a byteswap would produce, so the duplicate classifier's
//! equality checks are unaffected either way — see DESIGN.md.

use byteorder::{BigEndian, ByteOrder};

pub const IP_PROTO_TCP: u8 = 6;
pub const IP_PROTO_UDP: u8 = 17;

const MF_FLAG: u16 = 0x2000;
const FRAGMENT_OFFSET_MASK: u16 = 0x1FFF;

#[derive(Clone, Copy, Debug)]
pub struct IpHeader {
    pub ihl: u8,
    pub dscp_ecn: u8,
    pub total_length: u16,
    pub identification: u16,
    pub mf: bool,
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub src_addr: u32,
    pub dst_addr: u32,
}

impl IpHeader {
    pub fn header_len(&self) -> usize {
        self.ihl as usize * 4
    }

    /// True for any fragment of a fragmented datagram: a non-final fragment
    /// (MF set) or any fragment past the first (offset != 0).
    pub fn is_fragment(&self) -> bool {
        self.mf || self.fragment_offset != 0
    }

    pub fn is_first_fragment(&self) -> bool {
        self.fragment_offset == 0
    }
}

/// Parses a 20+-byte IPv4 header. Requires at least 20 captured bytes and a
/// header that (per its IHL) fits within what was captured.
pub fn parse(buf: &[u8]) -> Option<IpHeader> {
    if buf.len() < 20 {
        return None;
    }
    let ihl = buf[0] & 0x0F;
    if (ihl as usize) * 4 > buf.len() {
        return None;
    }
    let flags_offset = BigEndian::read_u16(&buf[6..8]);
    Some(IpHeader {
        ihl,
        dscp_ecn: buf[1],
        total_length: BigEndian::read_u16(&buf[2..4]),
        identification: BigEndian::read_u16(&buf[4..6]),
        mf: flags_offset & MF_FLAG != 0,
        fragment_offset: (flags_offset & FRAGMENT_OFFSET_MASK) * 8,
        ttl: buf[8],
        protocol: buf[9],
        src_addr: BigEndian::read_u32(&buf[12..16]),
        dst_addr: BigEndian::read_u32(&buf[16..20]),
    })
}

/// Computes the captured and real lengths of the IP payload. Returns `None`
/// when there is no usable payload: the header consumed the whole capture,
/// or the advertised total length doesn't leave room for any data.
pub fn data_bounds(header: &IpHeader, cap_len: usize) -> Option<(usize, usize, i64)> {
    let header_len = header.header_len();
    if cap_len <= header_len {
        return None;
    }
    let real_len = header.total_length as i64 - header_len as i64;
    if real_len <= 0 {
        return None;
    }
    let captured = std::cmp::min(cap_len - header_len, real_len as usize);
    if captured == 0 {
        return None;
    }
    Some((header_len, captured, real_len))
}
