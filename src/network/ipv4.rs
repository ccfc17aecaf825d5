//! IPv4 protocol implementation
//!
//! This module turns raw datagrams into [`IpFrame`]s and back. It handles:
//! - Header decoding and validation (version, header length, TTL,
//!   broadcast addresses, checksum, protocol whitelist)
//! - Zero-copy carving of options and payload
//! - Fragmentation against an MTU (RFC 791, 8-byte offset granularity)
//! - Serialization, either in place into reserved header room or into a
//!   freshly allocated buffer

use std::net::{IpAddr, Ipv4Addr};

use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder};
use bytes::BufMut;

use crate::buffer::BufferView;
use crate::error::{Error, Result};
use crate::network::checksum::{inet_chksum, non_zero};

pub const IPV4_HEADER_LEN: usize = 20;
pub const IPV4_MAX_HEADER_LEN: usize = 60;
const IPV4_VERSION: u8 = 4;
pub const DEFAULT_TTL: u8 = 64;
pub const DEFAULT_MTU: usize = 1500;

const FRAGMENT_OFFSET_MASK: u16 = 0x1FFF;
/// Largest fragment offset in bytes the header can carry
const MAX_FRAGMENT_OFFSET: usize = FRAGMENT_OFFSET_MASK as usize * 8;

/// Protocols carried inside IPv4 that the codec accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IpProtocol {
    Icmp = 1,
    Igmp = 2,
    Tcp = 6,
    Udp = 17,
    Gre = 47,
}

impl IpProtocol {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(IpProtocol::Icmp),
            2 => Some(IpProtocol::Igmp),
            6 => Some(IpProtocol::Tcp),
            17 => Some(IpProtocol::Udp),
            47 => Some(IpProtocol::Gre),
            _ => None,
        }
    }
}

impl From<IpProtocol> for u8 {
    fn from(protocol: IpProtocol) -> u8 {
        protocol as u8
    }
}

bitflags! {
    /// The three flag bits of the IPv4 flags/fragment-offset word
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IpFlags: u8 {
        const RESERVED = 0b100;
        const DONT_FRAGMENT = 0b010;
        const MORE_FRAGMENTS = 0b001;
    }
}

/// IPv4 packet header structure
///
/// Represents the fixed 20-byte IPv4 header as defined in RFC 791, decoded
/// field by field in network byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub version: u8,
    pub ihl: u8, // Internet Header Length, in 32-bit words
    pub tos: u8,
    pub total_len: u16,
    pub id: u16,
    pub flags_frag_offset: u16, // 3 flag bits + 13-bit offset in 8-byte units
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src_addr: [u8; 4],
    pub dst_addr: [u8; 4],
}

impl Ipv4Header {
    /// Decode the fixed header from the front of `data`
    ///
    /// Returns None if the data is too short. No field is validated here.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < IPV4_HEADER_LEN {
            return None;
        }

        Some(Ipv4Header {
            version: data[0] >> 4,
            ihl: data[0] & 0x0F,
            tos: data[1],
            total_len: BigEndian::read_u16(&data[2..4]),
            id: BigEndian::read_u16(&data[4..6]),
            flags_frag_offset: BigEndian::read_u16(&data[6..8]),
            ttl: data[8],
            protocol: data[9],
            checksum: BigEndian::read_u16(&data[10..12]),
            src_addr: [data[12], data[13], data[14], data[15]],
            dst_addr: [data[16], data[17], data[18], data[19]],
        })
    }

    /// Serialize to the 20-byte wire layout
    pub fn to_bytes(&self) -> [u8; IPV4_HEADER_LEN] {
        let mut bytes = [0u8; IPV4_HEADER_LEN];
        bytes[0] = (self.version << 4) | (self.ihl & 0x0F);
        bytes[1] = self.tos;
        BigEndian::write_u16(&mut bytes[2..4], self.total_len);
        BigEndian::write_u16(&mut bytes[4..6], self.id);
        BigEndian::write_u16(&mut bytes[6..8], self.flags_frag_offset);
        bytes[8] = self.ttl;
        bytes[9] = self.protocol;
        BigEndian::write_u16(&mut bytes[10..12], self.checksum);
        bytes[12..16].copy_from_slice(&self.src_addr);
        bytes[16..20].copy_from_slice(&self.dst_addr);
        bytes
    }

    /// Get the header length in bytes
    pub fn header_len(&self) -> usize {
        (self.ihl as usize) * 4
    }

    pub fn flags(&self) -> IpFlags {
        IpFlags::from_bits_truncate((self.flags_frag_offset >> 13) as u8)
    }

    /// Fragment offset in bytes
    pub fn fragment_offset(&self) -> u16 {
        (self.flags_frag_offset & FRAGMENT_OFFSET_MASK) << 3
    }
}

/// A decoded IPv4 datagram
///
/// `options` and `payload` are views; after [`IpCodec::parse`] they share
/// storage with the received packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpFrame {
    pub protocol: IpProtocol,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub ttl: u8,
    pub tos: u8,
    pub id: u16,
    pub flags: IpFlags,
    /// Offset of this payload in the original datagram, in bytes. Always a
    /// multiple of 8.
    pub fragment_offset: u16,
    pub options: BufferView,
    pub payload: BufferView,
}

impl IpFrame {
    /// New unfragmented frame with default TTL and no options
    pub fn new(
        protocol: IpProtocol,
        source: Ipv4Addr,
        destination: Ipv4Addr,
        payload: BufferView,
    ) -> Self {
        IpFrame {
            protocol,
            source,
            destination,
            ttl: DEFAULT_TTL,
            tos: 0,
            id: 0,
            flags: IpFlags::empty(),
            fragment_offset: 0,
            options: BufferView::empty(),
            payload,
        }
    }

    pub fn header_len(&self) -> usize {
        IPV4_HEADER_LEN + self.options.len()
    }

    pub fn total_len(&self) -> usize {
        self.header_len() + self.payload.len()
    }

    pub fn is_fragment(&self) -> bool {
        self.flags.contains(IpFlags::MORE_FRAGMENTS) || self.fragment_offset != 0
    }
}

/// Numeric (network-order) value of an IPv4 address; anything else is 0
pub fn address_to_u32(address: &IpAddr) -> u32 {
    match address {
        IpAddr::V4(v4) => u32::from(*v4),
        IpAddr::V6(_) => 0,
    }
}

pub fn u32_to_address(value: u32) -> Ipv4Addr {
    Ipv4Addr::from(value)
}

/// Narrow an address to IPv4; non-IPv4 input becomes 0.0.0.0
pub fn to_ipv4(address: &IpAddr) -> Ipv4Addr {
    u32_to_address(address_to_u32(address))
}

/// All-zeros or all-ones
///
/// Datagrams with either address set to one of these are dropped. This also
/// drops DHCP-style traffic from 0.0.0.0; that is the intended filtering.
pub fn is_broadcast(address: Ipv4Addr) -> bool {
    address.is_unspecified() || address.is_broadcast()
}

pub struct IpCodec;

impl IpCodec {
    /// Parse an IPv4 datagram
    ///
    /// Returns None for anything malformed or filtered: wrong version,
    /// header length outside `20..=packet.len()`, TTL 0, broadcast source
    /// or destination, a non-zero checksum that does not verify (when
    /// `verify_checksum` is set) or a protocol outside ICMP, IGMP, TCP, UDP
    /// and GRE.
    ///
    /// The payload runs to the header's total length when that is
    /// consistent with the packet, otherwise to the end of the packet.
    pub fn parse(packet: &BufferView, verify_checksum: bool) -> Option<IpFrame> {
        let (header, payload_len) = packet.with_slice(|data| {
            let header = Ipv4Header::from_bytes(data)?;
            if header.version != IPV4_VERSION {
                return None;
            }

            let header_len = header.header_len();
            if header_len < IPV4_HEADER_LEN || header_len > data.len() {
                return None;
            }

            if verify_checksum && header.checksum != 0 && inet_chksum(&data[..header_len]) != 0 {
                return None;
            }

            let total_len = header.total_len as usize;
            let payload_len = if total_len >= header_len && total_len <= data.len() {
                total_len - header_len
            } else {
                data.len() - header_len
            };
            Some((header, payload_len))
        })?;

        if header.ttl == 0 {
            return None;
        }

        let source = Ipv4Addr::from(header.src_addr);
        let destination = Ipv4Addr::from(header.dst_addr);
        if is_broadcast(source) || is_broadcast(destination) {
            return None;
        }

        let protocol = IpProtocol::from_u8(header.protocol)?;
        let header_len = header.header_len();

        Some(IpFrame {
            protocol,
            source,
            destination,
            ttl: header.ttl,
            tos: header.tos,
            id: header.id,
            flags: header.flags(),
            fragment_offset: header.fragment_offset(),
            options: packet.slice(IPV4_HEADER_LEN, header_len - IPV4_HEADER_LEN),
            payload: packet.slice(header_len, payload_len),
        })
    }

    /// Split `frame` so that every fragment fits in `mtu` bytes
    ///
    /// A frame that already has MORE_FRAGMENTS set is returned as is, as is
    /// one whose payload already fits. Every fragment but the last carries
    /// a payload of exactly `floor((mtu - 20 - options) / 8) * 8` bytes.
    /// Options travel in the first fragment only. Payloads are sub-views of
    /// the original payload. Offsets continue from `frame.fragment_offset`,
    /// so a final fragment can be split again; a frame whose last offset
    /// would not fit the 13-bit offset field is returned as is.
    pub fn fragment(frame: IpFrame, mtu: usize) -> Vec<IpFrame> {
        if frame.flags.contains(IpFlags::MORE_FRAGMENTS) {
            return vec![frame];
        }

        let max_payload = mtu.saturating_sub(frame.header_len()) / 8 * 8;
        let total = frame.payload.len();
        if max_payload == 0 || total <= max_payload {
            return vec![frame];
        }

        let base_offset = frame.fragment_offset as usize;
        let last_offset = base_offset + (total - 1) / max_payload * max_payload;
        if last_offset > MAX_FRAGMENT_OFFSET {
            return vec![frame];
        }
        let mut fragments = Vec::with_capacity(total / max_payload + 1);
        let mut offset = 0usize;

        while total - offset > max_payload {
            fragments.push(IpFrame {
                flags: IpFlags::MORE_FRAGMENTS,
                fragment_offset: (base_offset + offset) as u16,
                options: if offset == 0 {
                    frame.options.clone()
                } else {
                    BufferView::empty()
                },
                payload: frame.payload.slice(offset, max_payload),
                ..frame.clone()
            });
            offset += max_payload;
        }

        fragments.push(IpFrame {
            flags: if offset == 0 { frame.flags } else { IpFlags::empty() },
            fragment_offset: (base_offset + offset) as u16,
            options: if offset == 0 {
                frame.options.clone()
            } else {
                BufferView::empty()
            },
            payload: frame.payload.slice_from(offset),
            ..frame
        });

        fragments
    }

    /// Write the header into the bytes directly in front of `frame.payload`
    ///
    /// The payload's storage must have at least `20 + options` bytes of
    /// headroom. Returns a view spanning header, options and payload.
    pub fn serialize_with_existing_header_room(frame: &IpFrame) -> Result<BufferView> {
        let header_len = frame.header_len();
        let packet = frame
            .payload
            .extend_front(header_len)
            .ok_or(Error::NoHeaderRoom { needed: header_len })?;

        let header = Self::encode_header(frame);
        packet.with_slice_mut(|bytes| bytes[..header_len].copy_from_slice(&header));
        Ok(packet)
    }

    /// Serialize into a newly allocated buffer
    pub fn serialize_new(frame: &IpFrame) -> BufferView {
        let mut packet = Vec::with_capacity(frame.total_len());
        packet.put_slice(&Self::encode_header(frame));
        frame.payload.with_slice(|payload| packet.put_slice(payload));
        BufferView::from_vec(packet)
    }

    /// Header plus options with the checksum filled in
    fn encode_header(frame: &IpFrame) -> Vec<u8> {
        let header_len = frame.header_len();
        let flags_frag_offset = ((frame.flags.bits() as u16) << 13)
            | ((frame.fragment_offset >> 3) & FRAGMENT_OFFSET_MASK);

        let header = Ipv4Header {
            version: IPV4_VERSION,
            ihl: (header_len / 4) as u8,
            tos: frame.tos,
            total_len: frame.total_len() as u16,
            id: frame.id,
            flags_frag_offset,
            ttl: frame.ttl,
            protocol: frame.protocol.into(),
            checksum: 0,
            src_addr: frame.source.octets(),
            dst_addr: frame.destination.octets(),
        };

        let mut bytes = Vec::with_capacity(header_len);
        bytes.put_slice(&header.to_bytes());
        frame.options.with_slice(|options| bytes.put_slice(options));

        let checksum = non_zero(inet_chksum(&bytes));
        BigEndian::write_u16(&mut bytes[10..12], checksum);
        bytes
    }
}
