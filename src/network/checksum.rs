//! Internet checksum (RFC 1071) and the TCP/UDP pseudo-header variant
//!
//! All values handled here are numeric: a checksum returned by these
//! functions is written to the wire big-endian, the same way every other
//! header field is.

use byteorder::{BigEndian, ByteOrder};

/// Fold carries above bit 15 back into the low 16 bits.
#[inline]
fn fold(mut sum: u64) -> u16 {
    while (sum >> 16) > 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// One's complement sum of `data` taken as big-endian 16-bit words
///
/// The result is NOT inverted; use [`inet_chksum`] for the value that goes
/// on the wire. An odd trailing byte is treated as the high byte of a word
/// whose low byte is zero. Empty input sums to 0.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum = 0u64;

    let chunks = data.chunks_exact(2);
    let remainder = chunks.remainder();
    for chunk in chunks {
        sum += BigEndian::read_u16(chunk) as u64;
    }

    if let Some(&last_byte) = remainder.first() {
        sum += (last_byte as u64) << 8;
    }

    fold(sum)
}

/// Inverted internet checksum, ready to be placed in a header
pub fn inet_chksum(data: &[u8]) -> u16 {
    !internet_checksum(data)
}

/// Checksum over a TCP or UDP segment plus the IPv4 pseudo-header
///
/// The pseudo-header (source, destination, zero, protocol, length) is never
/// materialized; its words are added to the running sum directly. Addresses
/// are the numeric value of the IPv4 address (`u32::from(Ipv4Addr)`).
///
/// Over a segment whose checksum field is already filled in, a valid
/// segment yields 0.
pub fn pseudo_header_checksum(
    payload: &[u8],
    protocol: u8,
    protocol_len: u32,
    src_addr: u32,
    dst_addr: u32,
) -> u16 {
    let mut sum = internet_checksum(payload) as u64;

    sum += (src_addr >> 16) as u64;
    sum += (src_addr & 0xFFFF) as u64;
    sum += (dst_addr >> 16) as u64;
    sum += (dst_addr & 0xFFFF) as u64;
    sum += protocol as u64;
    sum += (protocol_len >> 16) as u64;
    sum += (protocol_len & 0xFFFF) as u64;

    !fold(sum)
}

/// Replace a computed checksum of 0 with 0xFFFF
///
/// Zero is reserved on the wire for "no checksum"; 0xFFFF is the other
/// one's complement representation of the same value.
#[inline]
pub fn non_zero(checksum: u16) -> u16 {
    if checksum == 0 {
        0xFFFF
    } else {
        checksum
    }
}

/// Host to network byte order (16 bit)
#[inline]
pub fn htons(value: u16) -> u16 {
    value.to_be()
}

/// Network to host byte order (16 bit)
#[inline]
pub fn ntohs(value: u16) -> u16 {
    u16::from_be(value)
}

/// Host to network byte order (32 bit)
#[inline]
pub fn htonl(value: u32) -> u32 {
    value.to_be()
}

/// Network to host byte order (32 bit)
#[inline]
pub fn ntohl(value: u32) -> u32 {
    u32::from_be(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc1071_example() {
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(internet_checksum(&data), 0xddf2);
        assert_eq!(inet_chksum(&data), 0x220d);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(internet_checksum(&[]), 0);
        assert_eq!(inet_chksum(&[]), 0xFFFF);
    }

    #[test]
    fn test_odd_length_pads_low_byte() {
        assert_eq!(internet_checksum(&[0xAB]), 0xAB00);
        assert_eq!(internet_checksum(&[0x12, 0x34, 0x56]), 0x1234 + 0x5600);
    }

    #[test]
    fn test_known_ipv4_header() {
        let header = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        assert_eq!(inet_chksum(&header), 0xb861);

        let mut filled = header;
        filled[10] = 0xb8;
        filled[11] = 0x61;
        assert_eq!(inet_chksum(&filled), 0);
    }

    #[test]
    fn test_carry_needs_two_folds() {
        // 0xFFFF * 3 = 0x2FFFD -> 0xFFFF after folding
        let data = [0xFF; 6];
        assert_eq!(internet_checksum(&data), 0xFFFF);
    }

    #[test]
    fn test_pseudo_header_verifies_to_zero() {
        let src = u32::from(std::net::Ipv4Addr::new(10, 0, 0, 1));
        let dst = u32::from(std::net::Ipv4Addr::new(10, 0, 0, 2));
        // UDP header with zero checksum and a 3 byte payload
        let mut segment = vec![0x30, 0x39, 0x00, 0x35, 0x00, 0x0b, 0x00, 0x00, b'a', b'b', b'c'];
        let len = segment.len() as u32;

        let checksum = non_zero(pseudo_header_checksum(&segment, 17, len, src, dst));
        BigEndian::write_u16(&mut segment[6..8], checksum);

        assert_eq!(pseudo_header_checksum(&segment, 17, len, src, dst), 0);
    }

    #[test]
    fn test_non_zero_substitution() {
        assert_eq!(non_zero(0), 0xFFFF);
        assert_eq!(non_zero(0x1234), 0x1234);
    }

    #[test]
    fn test_byte_order_helpers() {
        assert_eq!(ntohs(htons(0x1234)), 0x1234);
        assert_eq!(ntohl(htonl(0xdeadbeef)), 0xdeadbeef);
        assert_eq!(htons(0x1234).to_ne_bytes(), [0x12, 0x34]);
        assert_eq!(htonl(0x0a000001).to_ne_bytes(), [10, 0, 0, 1]);
    }
}
