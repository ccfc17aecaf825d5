//! Property-based tests for the packet codecs
//!
//! - Checksum: a buffer with its own checksum appended verifies to zero
//! - IPv4: parsing a serialized frame yields the same frame
//! - Fragmentation: fragments fit the MTU and reassemble to the original
//! - BufferView: slicing never escapes the parent view

use crate::buffer::BufferView;
use crate::network::checksum::{inet_chksum, internet_checksum, pseudo_header_checksum};
use crate::network::ipv4::{IpCodec, IpFlags, IpFrame, IpProtocol};
use crate::transport::udp::{UdpCodec, UdpFrame};
use proptest::prelude::*;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Strategy for addresses the codec accepts (not 0.0.0.0, not broadcast)
fn unicast_strategy() -> impl Strategy<Value = Ipv4Addr> {
    (1u32..u32::MAX).prop_map(Ipv4Addr::from)
}

fn protocol_strategy() -> impl Strategy<Value = IpProtocol> {
    prop_oneof![
        Just(IpProtocol::Icmp),
        Just(IpProtocol::Igmp),
        Just(IpProtocol::Tcp),
        Just(IpProtocol::Udp),
        Just(IpProtocol::Gre),
    ]
}

/// Option bytes padded to a multiple of 4, at most 40
fn options_strategy() -> impl Strategy<Value = Vec<u8>> {
    (0usize..=10).prop_flat_map(|words| prop::collection::vec(any::<u8>(), words * 4))
}

fn ip_frame_strategy(max_payload: usize) -> impl Strategy<Value = IpFrame> {
    (
        protocol_strategy(),
        unicast_strategy(),
        unicast_strategy(),
        1u8..=255,
        any::<u8>(),
        any::<u16>(),
        any::<bool>(),
        options_strategy(),
        prop::collection::vec(any::<u8>(), 0..max_payload),
    )
        .prop_map(
            |(protocol, source, destination, ttl, tos, id, dont_fragment, options, payload)| {
                IpFrame {
                    protocol,
                    source,
                    destination,
                    ttl,
                    tos,
                    id,
                    flags: if dont_fragment {
                        IpFlags::DONT_FRAGMENT
                    } else {
                        IpFlags::empty()
                    },
                    fragment_offset: 0,
                    options: BufferView::from_vec(options),
                    payload: BufferView::from_vec(payload),
                }
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn test_checksum_appended_verifies(mut data in prop::collection::vec(any::<u8>(), 0..512)) {
        if data.len() % 2 == 1 {
            data.push(0);
        }
        let checksum = inet_chksum(&data);
        data.extend_from_slice(&checksum.to_be_bytes());
        prop_assert_eq!(inet_chksum(&data), 0);
    }

    #[test]
    fn test_checksum_ignores_word_order(words in prop::collection::vec(any::<u16>(), 0..128)) {
        let forward: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        let backward: Vec<u8> = words.iter().rev().flat_map(|w| w.to_be_bytes()).collect();
        prop_assert_eq!(internet_checksum(&forward), internet_checksum(&backward));
    }

    #[test]
    fn test_ip_parse_inverts_serialize(frame in ip_frame_strategy(512)) {
        let packet = IpCodec::serialize_new(&frame);
        prop_assert_eq!(packet.len(), frame.total_len());
        let parsed = IpCodec::parse(&packet, true);
        prop_assert_eq!(parsed, Some(frame));
    }

    #[test]
    fn test_udp_segment_verifies(
        source in unicast_strategy(),
        destination in unicast_strategy(),
        ports in (any::<u16>(), any::<u16>()),
        payload in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let frame = UdpFrame {
            source: SocketAddr::new(IpAddr::V4(source), ports.0),
            destination: SocketAddr::new(IpAddr::V4(destination), ports.1),
            ttl: 64,
            payload: BufferView::from_vec(payload),
        };
        let ip_frame = UdpCodec::to_ip_frame(&frame);
        let sum = ip_frame.payload.with_slice(|segment| {
            pseudo_header_checksum(
                segment,
                IpProtocol::Udp.into(),
                segment.len() as u32,
                u32::from(source),
                u32::from(destination),
            )
        });
        prop_assert_eq!(sum, 0);
        prop_assert_eq!(UdpCodec::parse(&ip_frame, true), Some(frame));
    }

    #[test]
    fn test_fragments_fit_and_reassemble(
        frame in ip_frame_strategy(4000),
        mtu in 68usize..1600,
    ) {
        let original = frame.payload.to_vec();
        let header_len = frame.header_len();
        let max_payload = (mtu - header_len) / 8 * 8;
        let fragments = IpCodec::fragment(frame.clone(), mtu);

        let mut reassembled = Vec::new();
        for (i, fragment) in fragments.iter().enumerate() {
            let last = i + 1 == fragments.len();
            prop_assert!(fragment.total_len() <= mtu || fragments.len() == 1);
            prop_assert_eq!(fragment.id, frame.id);
            prop_assert_eq!(fragment.fragment_offset as usize, reassembled.len());
            prop_assert_eq!(fragment.options.len() > 0, i == 0 && !frame.options.is_empty());
            if !last {
                prop_assert_eq!(fragment.flags, IpFlags::MORE_FRAGMENTS);
                prop_assert_eq!(fragment.payload.len(), max_payload);
            } else if fragments.len() > 1 {
                prop_assert_eq!(fragment.flags, IpFlags::empty());
            }
            reassembled.extend(fragment.payload.to_vec());
        }
        prop_assert_eq!(reassembled, original.clone());

        if original.len() + header_len <= mtu {
            prop_assert_eq!(fragments.len(), 1);
            prop_assert_eq!(&fragments[0], &frame);
        }
    }

    #[test]
    fn test_serialized_fragments_parse(frame in ip_frame_strategy(3000), mtu in 68usize..1500) {
        for fragment in IpCodec::fragment(frame, mtu) {
            let packet = IpCodec::serialize_new(&fragment);
            prop_assert_eq!(IpCodec::parse(&packet, true), Some(fragment));
        }
    }

    #[test]
    fn test_slice_stays_inside_view(
        data in prop::collection::vec(any::<u8>(), 0..256),
        start in 0usize..300,
        offset in 0usize..300,
        length in 0usize..300,
    ) {
        let view = BufferView::from_vec(data.clone()).slice_from(start);
        let slice = view.slice(offset, length);
        prop_assert!(slice.len() <= view.len());
        prop_assert!(slice.offset() >= view.offset());
        prop_assert!(slice.offset() + slice.len() <= view.offset() + view.len());

        let begin = slice.offset();
        prop_assert_eq!(slice.to_vec(), data[begin..begin + slice.len()].to_vec());
    }
}
