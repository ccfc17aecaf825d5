use std::io;
use std::net::Ipv4Addr;
use std::process::Command;

use tracing::info;
use tracing_subscriber::EnvFilter;

/// Assign `ip_cidr` to the device and bring it up
#[allow(dead_code)]
pub fn configure_interface(iface_name: &str, ip_cidr: &str) -> io::Result<()> {
    // ip addr add <ip_cidr> dev <iface_name>
    run_ip(&["addr", "add", ip_cidr, "dev", iface_name])?;
    // ip link set up dev <iface_name>
    run_ip(&["link", "set", "up", "dev", iface_name])?;

    info!(iface = iface_name, address = ip_cidr, "interface configured and up");
    Ok(())
}

#[allow(dead_code)]
fn run_ip(args: &[&str]) -> io::Result<()> {
    let status = Command::new("ip").args(args).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("`ip {}` failed with {}", args.join(" "), status),
        ))
    }
}

/// Split "10.0.0.1/24" into address and prefix length
#[allow(dead_code)]
pub fn parse_ip_cidr(ip_cidr: &str) -> io::Result<(Ipv4Addr, u8)> {
    let invalid = |what: &str| io::Error::new(io::ErrorKind::InvalidInput, format!("{}: {}", what, ip_cidr));

    let (address, prefix) = ip_cidr
        .split_once('/')
        .ok_or_else(|| invalid("invalid IP CIDR format"))?;
    let address: Ipv4Addr = address
        .parse()
        .map_err(|_| invalid("invalid IP address"))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| invalid("invalid prefix length"))?;
    if prefix > 32 {
        return Err(invalid("invalid network prefix length"));
    }
    Ok((address, prefix))
}

/// Log to stderr, filtered by RUST_LOG (default: info)
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
