//! TCP (Transmission Control Protocol) implementation
//!
//! This module provides TCP segment parsing and serialization on top of
//! [`IpFrame`]. Connection state is left to the relay layer; a segment is
//! decoded, handed on, and dropped.

use std::net::{IpAddr, SocketAddr};

use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder};

use crate::buffer::BufferView;
use crate::network::checksum::{non_zero, pseudo_header_checksum};
use crate::network::ipv4::{
    address_to_u32, u32_to_address, IpFrame, IpProtocol, DEFAULT_TTL, IPV4_HEADER_LEN,
};

/// Minimum TCP header length in bytes
pub const TCP_HEADER_LEN: usize = 20;

/// Flag bits taken from the wire on parse
const TCP_FLAGS_MASK: u16 = 0x3F;

bitflags! {
    /// TCP control bits (RFC 793, ECE/CWR from RFC 3168)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
        const ECE = 0x40;
        const CWR = 0x80;
    }
}

/// TCP packet header structure
///
/// Represents the fixed 20-byte TCP header as defined in RFC 793
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_number: u32,
    pub ack_number: u32,
    pub data_offset_and_flags: u16, // Data offset (4 bits) + Reserved + Flags
    pub window_size: u16,
    pub checksum: u16,
    pub urgent_ptr: u16,
}

impl TcpHeader {
    /// Parse TCP header from byte slice
    ///
    /// Returns None if the data is too short to contain a TCP header
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < TCP_HEADER_LEN {
            return None;
        }

        Some(TcpHeader {
            src_port: BigEndian::read_u16(&data[0..2]),
            dst_port: BigEndian::read_u16(&data[2..4]),
            seq_number: BigEndian::read_u32(&data[4..8]),
            ack_number: BigEndian::read_u32(&data[8..12]),
            data_offset_and_flags: BigEndian::read_u16(&data[12..14]),
            window_size: BigEndian::read_u16(&data[14..16]),
            checksum: BigEndian::read_u16(&data[16..18]),
            urgent_ptr: BigEndian::read_u16(&data[18..20]),
        })
    }

    /// Convert TCP header to bytes
    pub fn to_bytes(&self) -> [u8; TCP_HEADER_LEN] {
        let mut bytes = [0u8; TCP_HEADER_LEN];
        BigEndian::write_u16(&mut bytes[0..2], self.src_port);
        BigEndian::write_u16(&mut bytes[2..4], self.dst_port);
        BigEndian::write_u32(&mut bytes[4..8], self.seq_number);
        BigEndian::write_u32(&mut bytes[8..12], self.ack_number);
        BigEndian::write_u16(&mut bytes[12..14], self.data_offset_and_flags);
        BigEndian::write_u16(&mut bytes[14..16], self.window_size);
        BigEndian::write_u16(&mut bytes[16..18], self.checksum);
        BigEndian::write_u16(&mut bytes[18..20], self.urgent_ptr);
        bytes
    }

    /// Get the data offset (header length) in bytes
    pub fn data_offset(&self) -> usize {
        ((self.data_offset_and_flags >> 12) as usize) << 2
    }

    pub fn flags(&self) -> TcpFlags {
        TcpFlags::from_bits_truncate((self.data_offset_and_flags & TCP_FLAGS_MASK) as u8)
    }
}

/// A decoded TCP segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpFrame {
    pub source: SocketAddr,
    pub destination: SocketAddr,
    pub ttl: u8,
    pub flags: TcpFlags,
    pub sequence_no: u32,
    pub ack_no: u32,
    pub window_size: u16,
    pub urgent_pointer: u16,
    /// Raw option bytes; on serialization the length must be a multiple of 4
    pub options: BufferView,
    pub payload: BufferView,
}

impl TcpFrame {
    pub fn is_syn(&self) -> bool {
        self.flags.contains(TcpFlags::SYN)
    }

    pub fn is_ack(&self) -> bool {
        self.flags.contains(TcpFlags::ACK)
    }

    pub fn is_fin(&self) -> bool {
        self.flags.contains(TcpFlags::FIN)
    }

    pub fn is_rst(&self) -> bool {
        self.flags.contains(TcpFlags::RST)
    }

    pub fn is_psh(&self) -> bool {
        self.flags.contains(TcpFlags::PSH)
    }

    pub fn is_urg(&self) -> bool {
        self.flags.contains(TcpFlags::URG)
    }

    pub fn header_len(&self) -> usize {
        TCP_HEADER_LEN + self.options.len()
    }
}

pub struct TcpCodec;

impl TcpCodec {
    /// Decode the TCP segment carried by `ip_frame`
    ///
    /// Returns None if the data offset is below 20 bytes or runs past the
    /// segment, or (with `verify_checksum`) if the pseudo-header checksum
    /// over the whole segment does not verify. Only the low six flag bits
    /// are taken from the wire.
    pub fn parse(ip_frame: &IpFrame, verify_checksum: bool) -> Option<TcpFrame> {
        if ip_frame.protocol != IpProtocol::Tcp {
            return None;
        }

        let header = ip_frame.payload.with_slice(|segment| {
            let header = TcpHeader::from_bytes(segment)?;
            let header_len = header.data_offset();
            if header_len < TCP_HEADER_LEN || header_len > segment.len() {
                return None;
            }

            if verify_checksum {
                let sum = pseudo_header_checksum(
                    segment,
                    IpProtocol::Tcp.into(),
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

        let header_len = header.data_offset();
        Some(TcpFrame {
            source: SocketAddr::new(IpAddr::V4(ip_frame.source), header.src_port),
            destination: SocketAddr::new(IpAddr::V4(ip_frame.destination), header.dst_port),
            ttl: ip_frame.ttl,
            flags: header.flags(),
            sequence_no: header.seq_number,
            ack_no: header.ack_number,
            window_size: header.window_size,
            urgent_pointer: header.urgent_ptr,
            options: ip_frame
                .payload
                .slice(TCP_HEADER_LEN, header_len - TCP_HEADER_LEN),
            payload: ip_frame.payload.slice_from(header_len),
        })
    }

    /// Serialize `frame` with its checksum and wrap it in a TCP [`IpFrame`]
    pub fn to_ip_frame(frame: &TcpFrame) -> IpFrame {
        let source = address_to_u32(&frame.source.ip());
        let destination = address_to_u32(&frame.destination.ip());

        let header_len = frame.header_len();
        let length = header_len + frame.payload.len();
        let segment = BufferView::with_headroom(IPV4_HEADER_LEN, length);

        let header = TcpHeader {
            src_port: frame.source.port(),
            dst_port: frame.destination.port(),
            seq_number: frame.sequence_no,
            ack_number: frame.ack_no,
            data_offset_and_flags: (((header_len >> 2) as u16) << 12) | frame.flags.bits() as u16,
            window_size: frame.window_size,
            checksum: 0,
            urgent_ptr: frame.urgent_pointer,
        };

        let options = frame.options.to_vec();
        let data = frame.payload.to_vec();
        segment.with_slice_mut(|bytes| {
            bytes[..TCP_HEADER_LEN].copy_from_slice(&header.to_bytes());
            bytes[TCP_HEADER_LEN..header_len].copy_from_slice(&options);
            bytes[header_len..].copy_from_slice(&data);
            let checksum = pseudo_header_checksum(
                bytes,
                IpProtocol::Tcp.into(),
                length as u32,
                source,
                destination,
            );
            BigEndian::write_u16(&mut bytes[16..18], non_zero(checksum));
        });

        let mut ip_frame = IpFrame::new(
            IpProtocol::Tcp,
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

    fn segment(flags: TcpFlags, options: &[u8], payload: &[u8]) -> TcpFrame {
        TcpFrame {
            source: "10.0.0.254:51000".parse().unwrap(),
            destination: "93.184.216.34:443".parse().unwrap(),
            ttl: 63,
            flags,
            sequence_no: 0x01020304,
            ack_no: 0xa0b0c0d0,
            window_size: 65535,
            urgent_pointer: 0,
            options: BufferView::from_vec(options.to_vec()),
            payload: BufferView::from_vec(payload.to_vec()),
        }
    }

    #[test]
    fn test_round_trip_with_options() {
        // MSS 1460
        let frame = segment(TcpFlags::SYN, &[0x02, 0x04, 0x05, 0xb4], b"");
        let ip_frame = TcpCodec::to_ip_frame(&frame);
        let packet = IpCodec::serialize_with_existing_header_room(&ip_frame).unwrap();

        let parsed_ip = IpCodec::parse(&packet, true).unwrap();
        let parsed = TcpCodec::parse(&parsed_ip, true).unwrap();
        assert_eq!(parsed, frame);
        assert!(parsed.is_syn());
        assert!(!parsed.is_ack());
        assert_eq!(parsed.header_len(), 24);
    }

    #[test]
    fn test_round_trip_with_data() {
        let frame = segment(TcpFlags::PSH | TcpFlags::ACK, &[], b"GET / HTTP/1.1\r\n\r\n!");
        let ip_frame = TcpCodec::to_ip_frame(&frame);
        let parsed = TcpCodec::parse(&ip_frame, true).unwrap();
        assert_eq!(parsed.payload.to_vec(), b"GET / HTTP/1.1\r\n\r\n!".to_vec());
        assert!(parsed.is_psh() && parsed.is_ack());
    }

    #[test]
    fn test_ecn_bits_are_not_parsed() {
        let frame = segment(TcpFlags::ACK | TcpFlags::ECE | TcpFlags::CWR, &[], b"");
        let ip_frame = TcpCodec::to_ip_frame(&frame);
        let parsed = TcpCodec::parse(&ip_frame, true).unwrap();
        assert_eq!(parsed.flags, TcpFlags::ACK);
    }

    #[test]
    fn test_reject_short_data_offset() {
        let ip_frame = TcpCodec::to_ip_frame(&segment(TcpFlags::ACK, &[], b"data"));
        // data offset of 4 words = 16 bytes
        ip_frame.payload.set(12, 0x40);
        assert!(TcpCodec::parse(&ip_frame, false).is_none());
    }

    #[test]
    fn test_reject_data_offset_past_segment() {
        let ip_frame = TcpCodec::to_ip_frame(&segment(TcpFlags::ACK, &[], b""));
        // 15 words = 60 bytes in a 20 byte segment
        ip_frame.payload.set(12, 0xF0);
        assert!(TcpCodec::parse(&ip_frame, false).is_none());

        let mut short = ip_frame.clone();
        short.payload = ip_frame.payload.slice(0, 12);
        assert!(TcpCodec::parse(&short, false).is_none());
    }

    #[test]
    fn test_bad_checksum_depends_on_verification() {
        let ip_frame = TcpCodec::to_ip_frame(&segment(TcpFlags::ACK, &[], b"data"));
        ip_frame.payload.set(4, 0xEE);
        assert!(TcpCodec::parse(&ip_frame, true).is_none());
        assert!(TcpCodec::parse(&ip_frame, false).is_some());
    }

    #[test]
    fn test_checksum_uses_ip_addresses() {
        let mut ip_frame = TcpCodec::to_ip_frame(&segment(TcpFlags::ACK, &[], b"data"));
        ip_frame.source = "10.0.0.253".parse().unwrap();
        assert!(TcpCodec::parse(&ip_frame, true).is_none());
    }
}
