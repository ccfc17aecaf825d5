//! UDP (User Datagram Protocol) implementation
//!
//! This module provides UDP datagram parsing and serialization on top of
//! [`IpFrame`].

use std::net::{IpAddr, SocketAddr};

use byteorder::{BigEndian, ByteOrder};

use crate::buffer::BufferView;
use crate::network::checksum::{non_zero, pseudo_header_checksum};
use crate::network::ipv4::{
    address_to_u32, u32_to_address, IpFrame, IpProtocol, DEFAULT_TTL, IPV4_HEADER_LEN,
};

/// UDP header length in bytes
pub const UDP_HEADER_LEN: usize = 8;

/// UDP packet header structure
///
/// Represents the standard 8-byte UDP header as defined in RFC 768
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16, // Length of UDP header and data
    pub checksum: u16,
}

impl UdpHeader {
    /// Parse UDP header from byte slice
    ///
    /// Returns None if the data is too short to contain a valid UDP header
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < UDP_HEADER_LEN {
            return None;
        }

        Some(UdpHeader {
            src_port: BigEndian::read_u16(&data[0..2]),
            dst_port: BigEndian::read_u16(&data[2..4]),
            length: BigEndian::read_u16(&data[4..6]),
            checksum: BigEndian::read_u16(&data[6..8]),
        })
    }

    /// Convert UDP header to bytes
    pub fn to_bytes(&self) -> [u8; UDP_HEADER_LEN] {
        let mut bytes = [0u8; UDP_HEADER_LEN];
        BigEndian::write_u16(&mut bytes[0..2], self.src_port);
        BigEndian::write_u16(&mut bytes[2..4], self.dst_port);
        BigEndian::write_u16(&mut bytes[4..6], self.length);
        BigEndian::write_u16(&mut bytes[6..8], self.checksum);
        bytes
    }
}

/// A decoded UDP datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpFrame {
    pub source: SocketAddr,
    pub destination: SocketAddr,
    pub ttl: u8,
    pub payload: BufferView,
}

pub struct UdpCodec;

impl UdpCodec {
    /// Decode the UDP datagram carried by `ip_frame`
    ///
    /// Returns None unless the header's length field equals the size of the
    /// IP payload. An all-zero checksum means "none" and is never checked.
    pub fn parse(ip_frame: &IpFrame, verify_checksum: bool) -> Option<UdpFrame> {
        if ip_frame.protocol != IpProtocol::Udp {
            return None;
        }

        let header = ip_frame.payload.with_slice(|segment| {
            let header = UdpHeader::from_bytes(segment)?;
            if header.length as usize != segment.len() {
                return None;
            }

            if verify_checksum && header.checksum != 0 {
                let sum = pseudo_header_checksum(
                    segment,
                    IpProtocol::Udp.into(),
                    segment.len() as u32,
                    u32::from(ip_frame.source),
                    u32::from(ip_frame.destination),
                );
                if sum != 0 {
                    return None;
                }
            }
            Some(header)
        })?;

        Some(UdpFrame {
            source: SocketAddr::new(IpAddr::V4(ip_frame.source), header.src_port),
            destination: SocketAddr::new(IpAddr::V4(ip_frame.destination), header.dst_port),
            ttl: ip_frame.ttl,
            payload: ip_frame.payload.slice_from(UDP_HEADER_LEN),
        })
    }

    /// Serialize `frame` with its checksum and wrap it in a UDP [`IpFrame`]
    pub fn to_ip_frame(frame: &UdpFrame) -> IpFrame {
        let source = address_to_u32(&frame.source.ip());
        let destination = address_to_u32(&frame.destination.ip());

        let length = UDP_HEADER_LEN + frame.payload.len();
        let segment = BufferView::with_headroom(IPV4_HEADER_LEN, length);
        let header = UdpHeader {
            src_port: frame.source.port(),
            dst_port: frame.destination.port(),
            length: length as u16,
            checksum: 0,
        };

        let data = frame.payload.to_vec();
        segment.with_slice_mut(|bytes| {
            bytes[..UDP_HEADER_LEN].copy_from_slice(&header.to_bytes());
            bytes[UDP_HEADER_LEN..].copy_from_slice(&data);
            let checksum = pseudo_header_checksum(
                bytes,
                IpProtocol::Udp.into(),
                length as u32,
                source,
                destination,
            );
            BigEndian::write_u16(&mut bytes[6..8], non_zero(checksum));
        });

        let mut ip_frame = IpFrame::new(
            IpProtocol::Udp,
            u32_to_address(source),
            u32_to_address(destination),
            segment,
        );
        ip_frame.ttl = if frame.ttl == 0 { DEFAULT_TTL } else { frame.ttl };
        ip_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ipv4::IpCodec;

    fn datagram(payload: &[u8]) -> UdpFrame {
        UdpFrame {
            source: "10.0.0.254:40000".parse().unwrap(),
            destination: "10.0.0.1:7".parse().unwrap(),
            ttl: 64,
            payload: BufferView::from_vec(payload.to_vec()),
        }
    }

    #[test]
    fn test_round_trip_through_ip() {
        let frame = datagram(b"hello, udp");
        let ip_frame = UdpCodec::to_ip_frame(&frame);
        assert_eq!(ip_frame.protocol, IpProtocol::Udp);

        let packet = IpCodec::serialize_with_existing_header_room(&ip_frame).unwrap();
        let parsed_ip = IpCodec::parse(&packet, true).unwrap();
        let parsed = UdpCodec::parse(&parsed_ip, true).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_odd_length_payload_checksum() {
        let frame = datagram(b"abc");
        let ip_frame = UdpCodec::to_ip_frame(&frame);
        assert!(UdpCodec::parse(&ip_frame, true).is_some());
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let ip_frame = UdpCodec::to_ip_frame(&datagram(b"abcd"));
        ip_frame.payload.set(5, 13); // declared 13, actual 12
        assert!(UdpCodec::parse(&ip_frame, false).is_none());

        let mut truncated = ip_frame.clone();
        truncated.payload = ip_frame.payload.slice(0, 6);
        assert!(UdpCodec::parse(&truncated, false).is_none());
    }

    #[test]
    fn test_zero_checksum_is_not_verified() {
        let ip_frame = UdpCodec::to_ip_frame(&datagram(b"abcd"));
        ip_frame.payload.set(6, 0);
        ip_frame.payload.set(7, 0);
        assert!(UdpCodec::parse(&ip_frame, true).is_some());
    }

    #[test]
    fn test_bad_checksum_depends_on_verification() {
        let ip_frame = UdpCodec::to_ip_frame(&datagram(b"abcd"));
        ip_frame.payload.set(8, b'z');
        assert!(UdpCodec::parse(&ip_frame, true).is_none());
        assert!(UdpCodec::parse(&ip_frame, false).is_some());
    }

    #[test]
    fn test_non_ipv4_endpoint_becomes_zero_address() {
        let mut frame = datagram(b"x");
        frame.destination = "[::1]:53".parse().unwrap();
        let ip_frame = UdpCodec::to_ip_frame(&frame);
        assert!(ip_frame.destination.is_unspecified());
    }
}
