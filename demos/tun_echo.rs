//! A TUN interface echo responder
//!
//! Creates a TUN device, answers ICMP echo requests addressed to the stack
//! and echoes every UDP datagram sent to port 7 back to its sender. TCP
//! segments are decoded and logged.
//!
//! To run this example:
//!
//! ```sh
//! RUST_LOG=debug cargo run --example tun_echo
//! ping 10.0.0.1
//! echo hello | nc -u -w1 10.0.0.1 7
//! ```
//!
//! Note: Root/sudo privileges are required to create and configure the TUN device.

use std::io;

use tracing::{debug, info, warn};
use tun_tap::{Iface, Mode};
use tunstack::iface::{Frame, InterfaceConfig, NetworkInterface};
use tunstack::transport::udp::UdpFrame;
use tunstack::BufferView;

mod utils;
use utils::network::{configure_interface, init_logging, parse_ip_cidr};

const ECHO_PORT: u16 = 7;

fn main() -> io::Result<()> {
    init_logging();

    // Create TUN interface
    let iface = Iface::without_packet_info("tun0", Mode::Tun)?;
    info!(device = iface.name(), "TUN device created");

    // The host side of the link; the stack answers as 10.0.0.1
    configure_interface(iface.name(), "10.0.0.254/24")?;

    let (address, prefix) = parse_ip_cidr("10.0.0.1/24")?;
    let net_iface = NetworkInterface::new(InterfaceConfig::with_prefix(address, prefix));
    let mut buf = [0u8; 1504];

    loop {
        let nbytes = iface.recv(&mut buf)?;
        let packet = BufferView::from(&buf[..nbytes]);

        match net_iface.receive(&packet) {
            Some(Frame::Udp(udp)) if udp.destination.port() == ECHO_PORT => {
                debug!(peer = %udp.source, len = udp.payload.len(), "echoing datagram");
                let reply = Frame::Udp(UdpFrame {
                    source: udp.destination,
                    destination: udp.source,
                    ttl: net_iface.config().default_ttl,
                    payload: udp.payload,
                });
                let sent = net_iface.transmit(&reply, |out| {
                    out.with_slice(|bytes| iface.send(bytes)).map(|_| ())
                });
                if let Err(e) = sent {
                    warn!(error = %e, "failed to send reply");
                }
            }
            Some(Frame::Tcp(tcp)) => {
                debug!(
                    source = %tcp.source,
                    destination = %tcp.destination,
                    flags = ?tcp.flags,
                    len = tcp.payload.len(),
                    "TCP segment"
                );
            }
            Some(frame) => debug!(protocol = ?frame.protocol(), "ignoring frame"),
            None => {}
        }

        // Echo replies generated by the interface itself
        while let Some(out) = net_iface.dequeue_output() {
            out.with_slice(|bytes| iface.send(bytes))?;
        }

        let stats = net_iface.stats().snapshot();
        debug!(
            received = stats.packets_received,
            sent = stats.packets_sent,
            dropped = stats.packets_dropped,
            "interface counters"
        );
    }
}
