//! A user-space IPv4 packet stack for TUN-based relays
//!
//! This library provides:
//! - IPv4 packet parsing, serialization and fragmentation
//! - TCP, UDP and ICMP frame codecs with checksum handling
//! - Zero-copy buffer views over shared packet storage
//! - A network interface pump answering ping and dispatching frames
//! - A cooperative coroutine scheduler driving callback-style sockets

pub mod buffer;
pub mod coroutine;
pub mod error;
pub mod iface;
pub mod network;
pub mod transport;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use buffer::BufferView;
pub use coroutine::{
    Coroutine, CoroutineState, Scheduler, SchedulerConfig, Slot, StepResult, YieldContext,
};
pub use error::{Error, Result};
pub use iface::{Frame, InterfaceConfig, NetworkInterface};
pub use network::icmp::{IcmpCodec, IcmpFrame};
pub use network::ipv4::{IpCodec, IpFlags, IpFrame, IpProtocol};
pub use network::CodecConfig;
pub use transport::tcp::{TcpCodec, TcpFlags, TcpFrame};
pub use transport::udp::{UdpCodec, UdpFrame};
