//! Network interface abstraction layer
//!
//! This module turns raw datagrams from a TUN device into typed frames and
//! typed frames back into wire packets:
//! - Interface configuration
//! - Destination filtering and protocol dispatch
//! - ICMP echo answering
//! - Fragmenting transmission and packet statistics

use std::net::Ipv4Addr;

use crate::network::icmp::{IcmpCodec, IcmpFrame};
use crate::network::ipv4::{IpFrame, IpProtocol, DEFAULT_MTU, DEFAULT_TTL};
use crate::network::CodecConfig;
use crate::transport::tcp::{TcpCodec, TcpFrame};
use crate::transport::udp::{UdpCodec, UdpFrame};

pub mod interface;
pub mod stats;

// Re-export commonly used items
pub use interface::NetworkInterface;
pub use stats::{InterfaceStats, StatsSnapshot};

/// Interface configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceConfig {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    /// Largest packet handed to the device
    pub mtu: usize,
    /// TTL of packets the interface originates
    pub default_ttl: u8,
    pub codec: CodecConfig,
    pub answer_echo_requests: bool,
}

impl InterfaceConfig {
    pub fn new(address: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        InterfaceConfig {
            address,
            netmask,
            mtu: DEFAULT_MTU,
            default_ttl: DEFAULT_TTL,
            codec: CodecConfig::default(),
            answer_echo_requests: true,
        }
    }

    /// Configuration from a CIDR prefix length, e.g. 24 for 255.255.255.0
    pub fn with_prefix(address: Ipv4Addr, prefix: u8) -> Self {
        let mask = match prefix {
            0 => 0,
            p if p >= 32 => u32::MAX,
            p => u32::MAX << (32 - p),
        };
        Self::new(address, Ipv4Addr::from(mask))
    }

    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn default_ttl(mut self, ttl: u8) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn verify_checksum(mut self, verify: bool) -> Self {
        self.codec.verify_checksum = verify;
        self
    }

    pub fn answer_echo_requests(mut self, answer: bool) -> Self {
        self.answer_echo_requests = answer;
        self
    }
}

/// A decoded transport-level frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Tcp(TcpFrame),
    Udp(UdpFrame),
    Icmp(IcmpFrame),
}

impl Frame {
    pub fn protocol(&self) -> IpProtocol {
        match self {
            Frame::Tcp(_) => IpProtocol::Tcp,
            Frame::Udp(_) => IpProtocol::Udp,
            Frame::Icmp(_) => IpProtocol::Icmp,
        }
    }

    /// Serialize the transport header and wrap it in an [`IpFrame`]
    pub fn to_ip_frame(&self) -> IpFrame {
        match self {
            Frame::Tcp(frame) => TcpCodec::to_ip_frame(frame),
            Frame::Udp(frame) => UdpCodec::to_ip_frame(frame),
            Frame::Icmp(frame) => IcmpCodec::to_ip_frame(frame),
        }
    }
}

impl From<TcpFrame> for Frame {
    fn from(frame: TcpFrame) -> Self {
        Frame::Tcp(frame)
    }
}

impl From<UdpFrame> for Frame {
    fn from(frame: UdpFrame) -> Self {
        Frame::Udp(frame)
    }
}

impl From<IcmpFrame> for Frame {
    fn from(frame: IcmpFrame) -> Self {
        Frame::Icmp(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = InterfaceConfig::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(255, 0, 0, 0));
        assert_eq!(config.mtu, 1500);
        assert_eq!(config.default_ttl, 64);
        assert!(config.codec.verify_checksum);
        assert!(config.answer_echo_requests);
    }

    #[test]
    fn test_prefix_to_netmask() {
        let address = Ipv4Addr::new(10, 0, 0, 1);
        assert_eq!(
            InterfaceConfig::with_prefix(address, 24).netmask,
            Ipv4Addr::new(255, 255, 255, 0)
        );
        assert_eq!(InterfaceConfig::with_prefix(address, 0).netmask, Ipv4Addr::UNSPECIFIED);
        assert_eq!(InterfaceConfig::with_prefix(address, 32).netmask, Ipv4Addr::BROADCAST);
        assert_eq!(
            InterfaceConfig::with_prefix(address, 20).netmask,
            Ipv4Addr::new(255, 255, 240, 0)
        );
    }

    #[test]
    fn test_builder() {
        let config = InterfaceConfig::with_prefix(Ipv4Addr::new(10, 0, 0, 1), 24)
            .mtu(9000)
            .default_ttl(32)
            .verify_checksum(false)
            .answer_echo_requests(false);
        assert_eq!(config.mtu, 9000);
        assert_eq!(config.default_ttl, 32);
        assert!(!config.codec.verify_checksum);
        assert!(!config.answer_echo_requests);
    }
}
