//! Layered frame dissection: Ethernet → IPv4 → TCP/UDP.
//!
//! Grounded on `infodups/pkt.c`'s `_pkt_dissect`/`_pkt_dissect_fast`: a
//! frame is always kept, even when a layer fails to parse — dissection
//! narrows a "current payload" pointer one layer at a time and simply stops
//! narrowing on the first failure, leaving whatever was dissected so far.

pub mod eth;
pub mod ip;
pub mod transport;

use crate::time::Timestamp;
pub use eth::FrameType as EtherType;
pub use ip::IpHeader;
pub use transport::TransportHeader;

/// Default cap on how many bytes of each frame are retained in the window,
/// matching the original's `-s` default.
pub const DEFAULT_FRAME_CAP: usize = 5000;

#[derive(Clone, Copy, Debug)]
struct PayloadRef {
    offset: usize,
    cap_len: usize,
    real_len: i64,
}

/// A dissected packet: a capped copy of the wire bytes plus parsed headers
/// for every layer that could be decoded.
#[derive(Clone, Debug)]
pub struct Frame {
    pub pos: u64,
    pub time: Timestamp,
    pub real_size: u32,
    pub cap_len: u32,
    pub is_malformed: bool,
    pub frame_type: EtherType,
    pub src_mac: Option<[u8; 6]>,
    pub dst_mac: Option<[u8; 6]>,
    pub ethertype: u16,
    pub vlan_id: Option<u16>,
    pub ip: Option<IpHeader>,
    pub transport: Option<TransportHeader>,
    frame_bytes: Box<[u8]>,
    ip_payload: Option<PayloadRef>,
    payload: Option<PayloadRef>,
}

impl Frame {
    /// Dissects a captured frame. `bytes` is the full captured slice (the
    /// caller has already applied any pcap snap length); only up to
    /// `frame_cap` bytes of it are retained.
    ///
    /// `fast` mirrors `_pkt_dissect_fast`: the IP payload is never narrowed
    /// down into a TCP/UDP segment, so `payload()` returns the IP-level
    /// data (headers and all) for IPv4 traffic.
    pub fn parse(
        pos: u64,
        time: Timestamp,
        bytes: &[u8],
        real_size: u32,
        frame_cap: usize,
        fast: bool,
    ) -> Frame {
        let cap_len = bytes.len().min(frame_cap);
        let frame_bytes: Box<[u8]> = bytes[..cap_len].into();
        let buf = &frame_bytes[..];

        let frame_type = eth::detect(buf);
        let is_malformed = frame_type == EtherType::Error;
        let src_mac = eth::src_mac(buf, frame_type);
        let dst_mac = eth::dst_mac(buf, frame_type);
        let ethertype = eth::ethertype(buf, frame_type);
        let vlan_id = eth::vlan_id(buf, frame_type);

        let mut payload = eth::header_len(frame_type).and_then(|header_len| {
            if buf.len() <= header_len {
                return None;
            }
            Some(PayloadRef {
                offset: header_len,
                cap_len: buf.len() - header_len,
                real_len: (real_size as usize).saturating_sub(header_len) as i64,
            })
        });

        let mut ip = None;
        let mut ip_payload = None;
        let mut transport = None;

        if ethertype == eth::ETH_PROTO_IPV4 {
            if let Some(eth_payload) = payload {
                let ip_buf = &buf[eth_payload.offset..];
                if let Some(header) = ip::parse(ip_buf) {
                    if let Some((hdr_len, cap, real)) =
                        ip::data_bounds(&header, eth_payload.cap_len)
                    {
                        let data = PayloadRef {
                            offset: eth_payload.offset + hdr_len,
                            cap_len: cap,
                            real_len: real,
                        };
                        ip_payload = Some(data);
                        payload = Some(data);

                        if !fast {
                            let data_buf = &buf[data.offset..data.offset + data.cap_len];
                            transport = match header.protocol {
                                ip::IP_PROTO_TCP => {
                                    transport::parse_tcp(data_buf).and_then(|t| {
                                        transport::tcp_data_bounds(data_buf, data.real_len).map(
                                            |(off, cap, real)| {
                                                payload = Some(PayloadRef {
                                                    offset: data.offset + off,
                                                    cap_len: cap,
                                                    real_len: real,
                                                });
                                                t
                                            },
                                        )
                                    })
                                }
                                ip::IP_PROTO_UDP => {
                                    transport::parse_udp(data_buf).and_then(|t| {
                                        transport::udp_data_bounds(data_buf, data.real_len).map(
                                            |(off, cap, real)| {
                                                payload = Some(PayloadRef {
                                                    offset: data.offset + off,
                                                    cap_len: cap,
                                                    real_len: real,
                                                });
                                                t
                                            },
                                        )
                                    })
                                }
                                _ => None,
                            };
                        }
                    }
                    ip = Some(header);
                }
            }
        }

        Frame {
            pos,
            time,
            real_size,
            cap_len: cap_len as u32,
            is_malformed,
            frame_type,
            src_mac,
            dst_mac,
            ethertype,
            vlan_id,
            ip,
            transport,
            frame_bytes,
            ip_payload,
            payload,
        }
    }

    /// The innermost dissected payload: Ethernet payload by default,
    /// narrowed to the IP payload for IPv4 traffic and further to the
    /// TCP/UDP segment payload outside fast mode.
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.map(|p| &self.frame_bytes[p.offset..p.offset + p.cap_len])
    }

    /// The IP-level payload specifically, used by the fragmentation
    /// relations regardless of whether a transport header was also parsed.
    pub fn ip_payload(&self) -> Option<&[u8]> {
        self.ip_payload.map(|p| &self.frame_bytes[p.offset..p.offset + p.cap_len])
    }

    pub fn is_ipv4(&self) -> bool {
        self.ethertype == eth::ETH_PROTO_IPV4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, ByteOrder};

    fn build_udp_ipv4_frame(payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 14];
        BigEndian::write_u16(&mut buf[12..14], eth::ETH_PROTO_IPV4);

        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        let udp_len = 8 + payload.len();
        BigEndian::write_u16(&mut ip[2..4], (20 + udp_len) as u16);
        ip[9] = ip::IP_PROTO_UDP;

        let mut udp = vec![0u8; 8];
        BigEndian::write_u16(&mut udp[0..2], 1234);
        BigEndian::write_u16(&mut udp[2..4], 5678);

        buf.extend_from_slice(&ip);
        buf.extend_from_slice(&udp);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn udp_frame_narrows_payload_to_segment_data() {
        let raw = build_udp_ipv4_frame(b"hello");
        let frame = Frame::parse(0, Timestamp::new(0, 0), &raw, raw.len() as u32, 5000, false);
        assert!(!frame.is_malformed);
        assert_eq!(frame.payload(), Some(&b"hello"[..]));
        assert_eq!(frame.transport.unwrap().src_port, 1234);
    }

    #[test]
    fn fast_mode_keeps_ip_level_payload() {
        let raw = build_udp_ipv4_frame(b"hello");
        let frame = Frame::parse(0, Timestamp::new(0, 0), &raw, raw.len() as u32, 5000, true);
        // fast mode never narrows past the IP datagram, so the UDP header
        // bytes are still part of the reported payload.
        let payload = frame.payload().unwrap();
        assert_eq!(payload.len(), 8 + 5);
        assert!(frame.transport.is_none());
    }

    #[test]
    fn truncated_frame_is_malformed_but_retained() {
        let raw = vec![0u8; 5];
        let frame = Frame::parse(0, Timestamp::new(0, 0), &raw, 5, 5000, false);
        assert!(frame.is_malformed);
        assert_eq!(frame.frame_type, EtherType::Error);
        assert!(frame.payload().is_none());
    }

    #[test]
    fn frame_cap_truncates_retained_bytes() {
        let raw = build_udp_ipv4_frame(&vec![0xAB; 100]);
        let frame = Frame::parse(0, Timestamp::new(0, 0), &raw, raw.len() as u32, 40, false);
        assert_eq!(frame.cap_len, 40);
        // real_size still reflects the original wire length
        assert_eq!(frame.real_size, raw.len() as u32);
    }

    #[test]
    fn non_ip_ethertype_keeps_eth_level_payload() {
        let mut buf = vec![0u8; 20];
        BigEndian::write_u16(&mut buf[12..14], 0x0806); // ARP
        buf[14..].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        let frame = Frame::parse(0, Timestamp::new(0, 0), &buf, buf.len() as u32, 5000, false);
        assert!(!frame.is_ipv4());
        assert_eq!(frame.payload(), Some(&[1u8, 2, 3, 4, 5, 6][..]));
        assert!(frame.ip_payload().is_none());
    }
}
