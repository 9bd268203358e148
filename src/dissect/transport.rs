//! TCP/UDP header parsing.
//!
//! Grounded on `common/tcp.c` and `common/udp.c`. Both are narrow: only the
//! fields the duplicate-relation comparators actually read.

use byteorder::{BigEndian, ByteOrder};

#[derive(Clone, Copy, Debug)]
pub struct TcpFields {
    pub seq: u32,
    pub ack: u32,
    pub window: u16,
    pub checksum: u16,
}

#[derive(Clone, Copy, Debug)]
pub struct TransportHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub tcp: Option<TcpFields>,
}

/// Parses a TCP header. Needs at least 13 captured bytes: the data offset
/// lives in the high nibble of byte 12.
pub fn parse_tcp(buf: &[u8]) -> Option<TransportHeader> {
    if buf.len() < 13 {
        return None;
    }
    Some(TransportHeader {
        src_port: BigEndian::read_u16(&buf[0..2]),
        dst_port: BigEndian::read_u16(&buf[2..4]),
        tcp: Some(TcpFields {
            seq: BigEndian::read_u32(&buf[4..8]),
            ack: BigEndian::read_u32(&buf[8..12]),
            window: if buf.len() >= 16 {
                BigEndian::read_u16(&buf[14..16])
            } else {
                0
            },
            checksum: if buf.len() >= 18 {
                BigEndian::read_u16(&buf[16..18])
            } else {
                0
            },
        }),
    })
}

fn tcp_header_len(buf: &[u8]) -> usize {
    ((buf[12] >> 4) as usize) * 4
}

/// Bounds of the TCP segment payload, analogous to [`super::ip::data_bounds`].
/// `real_len` is the IP-reported real payload length of the *segment*
/// (i.e. the IP datagram's real data length, from which the TCP header is
/// subtracted).
pub fn tcp_data_bounds(buf: &[u8], ip_real_len: i64) -> Option<(usize, usize, i64)> {
    if buf.len() < 20 {
        return None;
    }
    let header_len = tcp_header_len(buf);
    if header_len < 20 || header_len > buf.len() {
        return None;
    }
    let real_len = ip_real_len - header_len as i64;
    if real_len <= 0 {
        return None;
    }
    let captured = std::cmp::min(buf.len() - header_len, real_len as usize);
    if captured == 0 {
        return None;
    }
    Some((header_len, captured, real_len))
}

/// UDP header: 8 fixed bytes, ports plus a length field nothing here reads.
pub fn parse_udp(buf: &[u8]) -> Option<TransportHeader> {
    if buf.len() < 8 {
        return None;
    }
    Some(TransportHeader {
        src_port: BigEndian::read_u16(&buf[0..2]),
        dst_port: BigEndian::read_u16(&buf[2..4]),
        tcp: None,
    })
}

pub fn udp_data_bounds(buf: &[u8], ip_real_len: i64) -> Option<(usize, usize, i64)> {
    const UDP_HEADER_LEN: usize = 8;
    if buf.len() <= UDP_HEADER_LEN {
        return None;
    }
    let real_len = ip_real_len - UDP_HEADER_LEN as i64;
    if real_len <= 0 {
        return None;
    }
    let captured = std::cmp::min(buf.len() - UDP_HEADER_LEN, real_len as usize);
    if captured == 0 {
        return None;
    }
    Some((UDP_HEADER_LEN, captured, real_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp_bytes(data_offset_words: u8, payload: &[u8]) -> Vec<u8> {
        let header_len = data_offset_words as usize * 4;
        let mut buf = vec![0u8; header_len];
        buf[12] = data_offset_words << 4;
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn short_buffer_rejected() {
        assert!(parse_tcp(&[0u8; 12]).is_none());
    }

    #[test]
    fn data_offset_below_minimum_rejected() {
        let buf = tcp_bytes(4, b"hello"); // 16-byte header, below the 20-byte minimum
        assert!(tcp_data_bounds(&buf, 100).is_none());
    }

    #[test]
    fn payload_bounds_clamped_to_captured_length() {
        let buf = tcp_bytes(5, b"hello world"); // 20-byte header + 11 captured bytes
        let (offset, captured, real) = tcp_data_bounds(&buf, 20 + 100).unwrap();
        assert_eq!(offset, 20);
        assert_eq!(captured, 11);
        assert_eq!(real, 100);
    }

    #[test]
    fn udp_zero_real_length_yields_no_bounds() {
        let buf = vec![0u8; 8];
        assert!(udp_data_bounds(&buf, 8).is_none());
    }
}
