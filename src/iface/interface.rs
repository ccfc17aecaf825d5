//! Network interface abstraction and packet processing
//!
//! This module provides the packet pump between a TUN device and the codecs:
//! - IPv4 datagram reception and destination filtering
//! - Protocol dispatch (ICMP, TCP, UDP) into typed frames
//! - ICMP echo request/reply handling
//! - Transmission with fragmentation against the interface MTU

use std::collections::VecDeque;
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::buffer::BufferView;
use crate::error::{Error, Result};
use crate::iface::stats::InterfaceStats;
use crate::iface::{Frame, InterfaceConfig};
use crate::network::icmp::IcmpCodec;
use crate::network::ipv4::{IpCodec, IpFrame, IpProtocol};
use crate::transport::tcp::TcpCodec;
use crate::transport::udp::UdpCodec;

/// Network interface for packet processing
pub struct NetworkInterface {
    config: InterfaceConfig,
    stats: Arc<InterfaceStats>,
    /// Packets generated by the interface itself, e.g. echo replies
    output_queue: Mutex<VecDeque<BufferView>>,
    next_id: AtomicU16,
}

impl NetworkInterface {
    pub fn new(config: InterfaceConfig) -> Self {
        NetworkInterface {
            config,
            stats: Arc::new(InterfaceStats::new()),
            output_queue: Mutex::new(VecDeque::new()),
            next_id: AtomicU16::new(1),
        }
    }

    pub fn config(&self) -> &InterfaceConfig {
        &self.config
    }

    pub fn address(&self) -> Ipv4Addr {
        self.config.address
    }

    pub fn stats(&self) -> &Arc<InterfaceStats> {
        &self.stats
    }

    /// Process one inbound datagram read from the device
    ///
    /// Returns the decoded frame, or None when the datagram was dropped or
    /// consumed. Echo requests are consumed when the interface answers them
    /// itself; the reply lands in the output queue.
    pub fn receive(&self, packet: &BufferView) -> Option<Frame> {
        self.stats.record_received(packet.len());
        let verify = self.config.codec.verify_checksum;

        let ip_frame = match IpCodec::parse(packet, verify) {
            Some(frame) => frame,
            None => {
                trace!(len = packet.len(), "dropping malformed datagram");
                self.stats.record_dropped();
                return None;
            }
        };

        if !self.is_for_us(ip_frame.destination) {
            trace!(destination = %ip_frame.destination, "dropping datagram not addressed to us");
            self.stats.record_dropped();
            return None;
        }

        if ip_frame.is_fragment() {
            debug!(
                id = ip_frame.id,
                offset = ip_frame.fragment_offset,
                "dropping fragment, reassembly is not supported"
            );
            self.stats.record_fragment_dropped();
            return None;
        }

        let frame = match ip_frame.protocol {
            IpProtocol::Icmp => {
                self.stats.record_icmp();
                IcmpCodec::parse(&ip_frame, verify).map(Frame::Icmp)
            }
            IpProtocol::Tcp => {
                self.stats.record_tcp();
                TcpCodec::parse(&ip_frame, verify).map(Frame::Tcp)
            }
            IpProtocol::Udp => {
                self.stats.record_udp();
                UdpCodec::parse(&ip_frame, verify).map(Frame::Udp)
            }
            other => {
                debug!(protocol = ?other, "unsupported protocol");
                None
            }
        };

        let frame = match frame {
            Some(frame) => frame,
            None => {
                self.stats.record_dropped();
                return None;
            }
        };

        if let Frame::Icmp(icmp) = &frame {
            if icmp.is_echo_request() && self.config.answer_echo_requests {
                trace!(source = %icmp.source, sequence = icmp.sequence, "answering echo request");
                let reply = Frame::Icmp(icmp.echo_reply(self.config.default_ttl));
                let queued = self.transmit(&reply, |packet| {
                    self.output_queue.lock().push_back(packet);
                    Ok(())
                });
                if queued.is_ok() {
                    self.stats.record_echo_reply();
                }
                return None;
            }
        }

        Some(frame)
    }

    /// [`receive`](Self::receive) for bytes that are not yet in a view
    pub fn receive_bytes(&self, packet: &[u8]) -> Option<Frame> {
        self.receive(&BufferView::from(packet))
    }

    /// Serialize `frame` and hand every resulting packet to `sink`
    ///
    /// Returns the number of packets written: more than one when the
    /// datagram had to be fragmented to fit the MTU.
    pub fn transmit<F>(&self, frame: &Frame, sink: F) -> Result<usize>
    where
        F: FnMut(BufferView) -> io::Result<()>,
    {
        self.transmit_ip(frame.to_ip_frame(), sink)
    }

    /// Fragment and serialize a prepared [`IpFrame`]
    pub fn transmit_ip<F>(&self, mut frame: IpFrame, mut sink: F) -> Result<usize>
    where
        F: FnMut(BufferView) -> io::Result<()>,
    {
        if frame.id == 0 {
            frame.id = self.next_datagram_id();
        }

        let fragments = IpCodec::fragment(frame, self.config.mtu);
        let fragmented = fragments.len() > 1;

        for fragment in &fragments {
            // Fragments share one payload buffer: writing a header in place
            // would overwrite the tail of the previous fragment.
            let packet = if fragmented {
                self.stats.record_fragment_sent();
                IpCodec::serialize_new(fragment)
            } else {
                match IpCodec::serialize_with_existing_header_room(fragment) {
                    Ok(packet) => packet,
                    Err(Error::NoHeaderRoom { .. }) => IpCodec::serialize_new(fragment),
                    Err(e) => return Err(e),
                }
            };
            let len = packet.len();
            sink(packet)?;
            self.stats.record_sent(len);
        }

        if fragmented {
            debug!(count = fragments.len(), mtu = self.config.mtu, "datagram fragmented");
        }
        Ok(fragments.len())
    }

    /// Next packet the interface generated on its own
    pub fn dequeue_output(&self) -> Option<BufferView> {
        self.output_queue.lock().pop_front()
    }

    fn next_datagram_id(&self) -> u16 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Unicast to our address, or a broadcast on our network
    pub fn is_for_us(&self, destination: Ipv4Addr) -> bool {
        destination == self.config.address || self.is_broadcast_address(destination)
    }

    /// Limited broadcast or the directed broadcast of our network
    pub fn is_broadcast_address(&self, addr: Ipv4Addr) -> bool {
        if addr.is_broadcast() {
            return true;
        }
        let broadcast = u32::from(self.config.address) | !u32::from(self.config.netmask);
        u32::from(addr) == broadcast
    }

    pub fn network_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.config.address) & u32::from(self.config.netmask))
    }

    pub fn is_same_network(&self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.config.netmask);
        u32::from(addr) & mask == u32::from(self.network_address())
    }
}
