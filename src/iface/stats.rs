//! Interface packet counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free counters updated by [`NetworkInterface`](super::NetworkInterface)
#[derive(Debug)]
pub struct InterfaceStats {
    start_time: Instant,

    pub packets_received: AtomicU64,
    pub packets_sent: AtomicU64,
    /// Not for us, malformed or unsupported
    pub packets_dropped: AtomicU64,
    /// Inbound fragments; there is no reassembly
    pub fragments_dropped: AtomicU64,
    /// Outbound packets that were one piece of a larger datagram
    pub fragments_sent: AtomicU64,

    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,

    pub tcp_packets: AtomicU64,
    pub udp_packets: AtomicU64,
    pub icmp_packets: AtomicU64,
    pub echo_replies: AtomicU64,
}

impl InterfaceStats {
    pub fn new() -> Self {
        InterfaceStats {
            start_time: Instant::now(),
            packets_received: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            fragments_dropped: AtomicU64::new(0),
            fragments_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            tcp_packets: AtomicU64::new(0),
            udp_packets: AtomicU64::new(0),
            icmp_packets: AtomicU64::new(0),
            echo_replies: AtomicU64::new(0),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn record_received(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fragment_dropped(&self) {
        self.fragments_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fragment_sent(&self) {
        self.fragments_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tcp(&self) {
        self.tcp_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_udp(&self) {
        self.udp_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_icmp(&self) {
        self.icmp_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_echo_reply(&self) {
        self.echo_replies.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime: self.uptime(),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            fragments_dropped: self.fragments_dropped.load(Ordering::Relaxed),
            fragments_sent: self.fragments_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            tcp_packets: self.tcp_packets.load(Ordering::Relaxed),
            udp_packets: self.udp_packets.load(Ordering::Relaxed),
            icmp_packets: self.icmp_packets.load(Ordering::Relaxed),
            echo_replies: self.echo_replies.load(Ordering::Relaxed),
        }
    }
}

impl Default for InterfaceStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub uptime: Duration,
    pub packets_received: u64,
    pub packets_sent: u64,
    pub packets_dropped: u64,
    pub fragments_dropped: u64,
    pub fragments_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub tcp_packets: u64,
    pub udp_packets: u64,
    pub icmp_packets: u64,
    pub echo_replies: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = InterfaceStats::new();
        stats.record_received(60);
        stats.record_received(40);
        stats.record_sent(28);
        stats.record_dropped();
        stats.record_udp();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.packets_received, 2);
        assert_eq!(snapshot.bytes_received, 100);
        assert_eq!(snapshot.packets_sent, 1);
        assert_eq!(snapshot.bytes_sent, 28);
        assert_eq!(snapshot.packets_dropped, 1);
        assert_eq!(snapshot.udp_packets, 1);
        assert_eq!(snapshot.tcp_packets, 0);
    }
}
