//! Network layer protocols implementation
//!
//! This module contains implementations for network layer protocols:
//! - Checksum: Internet checksum and pseudo-header checksum
//! - IPv4: Internet Protocol version 4
//! - ICMP: Internet Control Message Protocol

pub mod checksum;
pub mod icmp;
pub mod ipv4;

// Re-export commonly used items
pub use checksum::{inet_chksum, internet_checksum, pseudo_header_checksum};
pub use icmp::{IcmpCodec, IcmpFrame, IcmpHeader, ICMP_TYPE_ECHO_REPLY, ICMP_TYPE_ECHO_REQUEST};
pub use ipv4::{IpCodec, IpFlags, IpFrame, IpProtocol, Ipv4Header};

/// Options shared by every codec's `parse`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    /// Reject packets whose checksum is present but wrong
    pub verify_checksum: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            verify_checksum: true,
        }
    }
}
