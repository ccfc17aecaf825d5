//! ICMP (Internet Control Message Protocol) implementation
//!
//! This module provides ICMP message parsing and serialization on top of
//! [`IpFrame`]. The checksum covers the ICMP header and data only; there
//! is no pseudo-header (RFC 792).

use std::net::IpAddr;

use byteorder::{BigEndian, ByteOrder};

use crate::buffer::BufferView;
use crate::network::checksum::{inet_chksum, non_zero};
use crate::network::ipv4::{to_ipv4, IpFrame, IpProtocol, DEFAULT_TTL, IPV4_HEADER_LEN};

/// ICMP header length in bytes
pub const ICMP_HEADER_LEN: usize = 8;

/// ICMP message types
pub const ICMP_TYPE_ECHO_REPLY: u8 = 0;
pub const ICMP_TYPE_ECHO_REQUEST: u8 = 8;

/// ICMP packet header structure
///
/// Represents the standard 8-byte ICMP header as defined in RFC 792
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpHeader {
    pub msg_type: u8,
    pub msg_code: u8,
    pub checksum: u16,
    pub rest: [u8; 4], // identifier and sequence for echo messages
}

impl IcmpHeader {
    /// Parse ICMP header from byte slice
    ///
    /// Returns None if the data is too short to contain a valid ICMP header
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < ICMP_HEADER_LEN {
            return None;
        }

        Some(IcmpHeader {
            msg_type: data[0],
            msg_code: data[1],
            checksum: BigEndian::read_u16(&data[2..4]),
            rest: [data[4], data[5], data[6], data[7]],
        })
    }

    /// Convert ICMP header to bytes
    pub fn to_bytes(&self) -> [u8; ICMP_HEADER_LEN] {
        let mut bytes = [0u8; ICMP_HEADER_LEN];
        bytes[0] = self.msg_type;
        bytes[1] = self.msg_code;
        BigEndian::write_u16(&mut bytes[2..4], self.checksum);
        bytes[4..8].copy_from_slice(&self.rest);
        bytes
    }

    pub fn identifier(&self) -> u16 {
        BigEndian::read_u16(&self.rest[0..2])
    }

    pub fn sequence(&self) -> u16 {
        BigEndian::read_u16(&self.rest[2..4])
    }
}

/// A decoded ICMP message together with its IP addressing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpFrame {
    pub source: IpAddr,
    pub destination: IpAddr,
    pub ttl: u8,
    pub icmp_type: u8,
    pub code: u8,
    pub identifier: u16,
    pub sequence: u16,
    pub payload: BufferView,
}

impl IcmpFrame {
    /// Check if this is an Echo Request message
    pub fn is_echo_request(&self) -> bool {
        self.icmp_type == ICMP_TYPE_ECHO_REQUEST
    }

    /// Check if this is an Echo Reply message
    pub fn is_echo_reply(&self) -> bool {
        self.icmp_type == ICMP_TYPE_ECHO_REPLY
    }

    /// Echo reply answering this request: addresses swapped, same
    /// identifier, sequence and data
    pub fn echo_reply(&self, ttl: u8) -> IcmpFrame {
        IcmpFrame {
            source: self.destination,
            destination: self.source,
            ttl,
            icmp_type: ICMP_TYPE_ECHO_REPLY,
            code: 0,
            identifier: self.identifier,
            sequence: self.sequence,
            payload: self.payload.clone(),
        }
    }
}

pub struct IcmpCodec;

impl IcmpCodec {
    /// Decode the ICMP message carried by `ip_frame`
    ///
    /// Returns None if the frame is not ICMP, is shorter than the header,
    /// or (with `verify_checksum`) fails its checksum.
    pub fn parse(ip_frame: &IpFrame, verify_checksum: bool) -> Option<IcmpFrame> {
        if ip_frame.protocol != IpProtocol::Icmp {
            return None;
        }

        let header = ip_frame.payload.with_slice(|message| {
            let header = IcmpHeader::from_bytes(message)?;
            if verify_checksum && inet_chksum(message) != 0 {
                return None;
            }
            Some(header)
        })?;

        Some(IcmpFrame {
            source: IpAddr::V4(ip_frame.source),
            destination: IpAddr::V4(ip_frame.destination),
            ttl: ip_frame.ttl,
            icmp_type: header.msg_type,
            code: header.msg_code,
            identifier: header.identifier(),
            sequence: header.sequence(),
            payload: ip_frame.payload.slice_from(ICMP_HEADER_LEN),
        })
    }

    /// Serialize `frame` and wrap it in an ICMP [`IpFrame`]
    ///
    /// The message is built with room for an IPv4 header in front of it.
    pub fn to_ip_frame(frame: &IcmpFrame) -> IpFrame {
        let message_len = ICMP_HEADER_LEN + frame.payload.len();
        let message = BufferView::with_headroom(IPV4_HEADER_LEN, message_len);

        let mut rest = [0u8; 4];
        BigEndian::write_u16(&mut rest[0..2], frame.identifier);
        BigEndian::write_u16(&mut rest[2..4], frame.sequence);
        let header = IcmpHeader {
            msg_type: frame.icmp_type,
            msg_code: frame.code,
            checksum: 0,
            rest,
        };

        let data = frame.payload.to_vec();
        message.with_slice_mut(|bytes| {
            bytes[..ICMP_HEADER_LEN].copy_from_slice(&header.to_bytes());
            bytes[ICMP_HEADER_LEN..].copy_from_slice(&data);
            let checksum = non_zero(inet_chksum(bytes));
            BigEndian::write_u16(&mut bytes[2..4], checksum);
        });

        let mut ip_frame = IpFrame::new(
            IpProtocol::Icmp,
            to_ipv4(&frame.source),
            to_ipv4(&frame.destination),
            message,
        );
        ip_frame.ttl = if frame.ttl == 0 { DEFAULT_TTL } else { frame.ttl };
        ip_frame
    }
}
