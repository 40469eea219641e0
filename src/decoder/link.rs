//! Link, network and transport header demultiplexing.

use std::net::IpAddr;

use pnet::packet::ethernet::EthernetPacket;
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::icmpv6::Icmpv6Packet;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::vlan::VlanPacket;

use crate::domain::{IpPortTuple, LinkType, TcpFlags, Transport};
use crate::error::ParseError;

mod ethertypes {
    pub const IPV4: u16 = 0x0800;
    pub const IPV6: u16 = 0x86dd;
    pub const VLAN: u16 = 0x8100;
    pub const QINQ: u16 = 0x88a8;
    pub const QINQ_LEGACY: u16 = 0x9100;
}

/// IPv6 extension headers skipped on the way to the transport header.
mod ipv6_ext {
    pub const HOP_BY_HOP: u8 = 0;
    pub const ROUTING: u8 = 43;
    pub const FRAGMENT: u8 = 44;
    pub const DESTINATION: u8 = 60;
}

/// Address family values of BSD loopback headers.
const AF_INET: u32 = 2;
const AF_INET6: [u32; 4] = [10, 24, 28, 30];

const LINUX_SLL_HEADER: usize = 16;
const MAX_VLAN_TAGS: usize = 2;

/// Transport-level view of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded<'a> {
    pub tuple: IpPortTuple,
    pub payload: &'a [u8],
    pub tcp_flags: Option<TcpFlags>,
}

/// Strip headers from `data` according to `link_type`.
pub fn decode_frame(link_type: LinkType, data: &[u8]) -> Result<Decoded<'_>, ParseError> {
    match link_type {
        LinkType::Ethernet => decode_ethernet(data),
        LinkType::Raw => decode_raw_ip(data),
        LinkType::Ipv4 => decode_ipv4(data),
        LinkType::Ipv6 => decode_ipv6(data),
        LinkType::Null => {
            let family = family_word(data)?;
            decode_af(u32::from_ne_bytes(family), &data[4..])
        }
        LinkType::Loop => {
            let family = family_word(data)?;
            decode_af(u32::from_be_bytes(family), &data[4..])
        }
        LinkType::LinuxSll => {
            if data.len() < LINUX_SLL_HEADER {
                return Err(truncated("linux_sll"));
            }
            let protocol = u16::from_be_bytes([data[14], data[15]]);
            decode_ethertype(protocol, &data[LINUX_SLL_HEADER..])
        }
    }
}

fn truncated(layer: &'static str) -> ParseError {
    ParseError::TruncatedHeader { layer }
}

fn family_word(data: &[u8]) -> Result<[u8; 4], ParseError> {
    data.get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| truncated("loopback"))
}

/// Also accepts the swapped value, for captures written on a host of the
/// other endianness.
fn decode_af(af: u32, data: &[u8]) -> Result<Decoded<'_>, ParseError> {
    if af == AF_INET || af.swap_bytes() == AF_INET {
        decode_ipv4(data)
    } else if AF_INET6.contains(&af) || AF_INET6.contains(&af.swap_bytes()) {
        decode_ipv6(data)
    } else {
        Err(ParseError::Unsupported {
            layer: "address family",
            value: af.to_string(),
        })
    }
}

fn decode_ethernet(data: &[u8]) -> Result<Decoded<'_>, ParseError> {
    let ethernet = EthernetPacket::new(data).ok_or_else(|| truncated("ethernet"))?;
    let mut ethertype = ethernet.get_ethertype().0;
    let mut offset = EthernetPacket::minimum_packet_size();

    for _ in 0..MAX_VLAN_TAGS {
        if !matches!(
            ethertype,
            ethertypes::VLAN | ethertypes::QINQ | ethertypes::QINQ_LEGACY
        ) {
            break;
        }
        let vlan = VlanPacket::new(&data[offset..]).ok_or_else(|| truncated("vlan"))?;
        ethertype = vlan.get_ethertype().0;
        offset += VlanPacket::minimum_packet_size();
    }

    decode_ethertype(ethertype, &data[offset..])
}

fn decode_ethertype(ethertype: u16, data: &[u8]) -> Result<Decoded<'_>, ParseError> {
    match ethertype {
        ethertypes::IPV4 => decode_ipv4(data),
        ethertypes::IPV6 => decode_ipv6(data),
        other => Err(ParseError::Unsupported {
            layer: "ethertype",
            value: format!("{:#06x}", other),
        }),
    }
}

fn decode_raw_ip(data: &[u8]) -> Result<Decoded<'_>, ParseError> {
    match data.first().map(|b| b >> 4) {
        Some(4) => decode_ipv4(data),
        Some(6) => decode_ipv6(data),
        Some(other) => Err(ParseError::Unsupported {
            layer: "ip version",
            value: other.to_string(),
        }),
        None => Err(truncated("ip")),
    }
}

fn decode_ipv4(data: &[u8]) -> Result<Decoded<'_>, ParseError> {
    let ipv4 = Ipv4Packet::new(data).ok_or_else(|| truncated("ipv4"))?;
    let header_len = ipv4.get_header_length() as usize * 4;
    let total_len = (ipv4.get_total_length() as usize).min(data.len());
    if header_len < Ipv4Packet::minimum_packet_size() || header_len > total_len {
        return Err(truncated("ipv4"));
    }
    if ipv4.get_fragment_offset() != 0 {
        return Err(ParseError::Fragment);
    }

    decode_transport(
        ipv4.get_next_level_protocol().0,
        IpAddr::V4(ipv4.get_source()),
        IpAddr::V4(ipv4.get_destination()),
        &data[header_len..total_len],
    )
}

fn decode_ipv6(data: &[u8]) -> Result<Decoded<'_>, ParseError> {
    let ipv6 = Ipv6Packet::new(data).ok_or_else(|| truncated("ipv6"))?;
    let header_len = Ipv6Packet::minimum_packet_size();
    let end = (header_len + ipv6.get_payload_length() as usize).min(data.len());
    let mut next = ipv6.get_next_header().0;
    let mut payload = &data[header_len..end];

    loop {
        match next {
            ipv6_ext::HOP_BY_HOP | ipv6_ext::ROUTING | ipv6_ext::DESTINATION => {
                if payload.len() < 2 {
                    return Err(truncated("ipv6 extension"));
                }
                let len = (payload[1] as usize + 1) * 8;
                if payload.len() < len {
                    return Err(truncated("ipv6 extension"));
                }
                next = payload[0];
                payload = &payload[len..];
            }
            ipv6_ext::FRAGMENT => {
                if payload.len() < 8 {
                    return Err(truncated("ipv6 fragment"));
                }
                let offset = u16::from_be_bytes([payload[2], payload[3]]) >> 3;
                if offset != 0 {
                    return Err(ParseError::Fragment);
                }
                next = payload[0];
                payload = &payload[8..];
            }
            _ => break,
        }
    }

    decode_transport(
        next,
        IpAddr::V6(ipv6.get_source()),
        IpAddr::V6(ipv6.get_destination()),
        payload,
    )
}

fn decode_transport<'a>(
    protocol: u8,
    src: IpAddr,
    dst: IpAddr,
    data: &'a [u8],
) -> Result<Decoded<'a>, ParseError> {
    let transport =
        Transport::from_protocol_number(protocol).ok_or_else(|| ParseError::Unsupported {
            layer: "transport",
            value: protocol.to_string(),
        })?;

    // ICMP carries type and code where the other transports carry ports.
    let (src_port, dst_port, payload, tcp_flags) = match transport {
        Transport::Tcp => {
            let tcp = TcpPacket::new(data).ok_or_else(|| truncated("tcp"))?;
            let offset = tcp.get_data_offset() as usize * 4;
            if offset < TcpPacket::minimum_packet_size() || offset > data.len() {
                return Err(truncated("tcp"));
            }
            (
                tcp.get_source(),
                tcp.get_destination(),
                &data[offset..],
                Some(TcpFlags(tcp.get_flags())),
            )
        }
        Transport::Udp => {
            let udp = UdpPacket::new(data).ok_or_else(|| truncated("udp"))?;
            let header = UdpPacket::minimum_packet_size();
            // Trailing link padding is not part of the datagram.
            let end = (udp.get_length() as usize).clamp(header, data.len());
            (udp.get_source(), udp.get_destination(), &data[header..end], None)
        }
        Transport::Icmp => {
            let icmp = IcmpPacket::new(data).ok_or_else(|| truncated("icmp"))?;
            (
                icmp.get_icmp_type().0 as u16,
                icmp.get_icmp_code().0 as u16,
                data,
                None,
            )
        }
        Transport::Icmpv6 => {
            let icmp = Icmpv6Packet::new(data).ok_or_else(|| truncated("icmpv6"))?;
            (
                icmp.get_icmpv6_type().0 as u16,
                icmp.get_icmpv6_code().0 as u16,
                data,
                None,
            )
        }
    };

    Ok(Decoded {
        tuple: IpPortTuple::new(transport, src, src_port, dst, dst_port),
        payload,
        tcp_flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::frames;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use crate::domain::ip_protocols;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    mod ethernet {
        use super::*;

        #[test]
        fn test_udp() {
            let frame = frames::ethernet_ipv4_udp([10, 0, 0, 1], 68, [10, 0, 0, 2], 67, b"hello");
            let decoded = decode_frame(LinkType::Ethernet, &frame).unwrap();
            assert_eq!(decoded.tuple.transport, Transport::Udp);
            assert_eq!(decoded.tuple.src_ip, v4(10, 0, 0, 1));
            assert_eq!(decoded.tuple.src_port, 68);
            assert_eq!(decoded.tuple.dst_port, 67);
            assert_eq!(decoded.payload, b"hello");
        }

        #[test]
        fn test_padding_trimmed() {
            let mut frame = frames::ethernet_ipv4_udp([10, 0, 0, 1], 68, [10, 0, 0, 2], 67, b"x");
            frame.extend_from_slice(&[0u8; 12]);
            let decoded = decode_frame(LinkType::Ethernet, &frame).unwrap();
            assert_eq!(decoded.payload, b"x");
        }

        #[test]
        fn test_vlan_tag() {
            let plain = frames::ethernet_ipv4_udp([10, 0, 0, 1], 1000, [10, 0, 0, 2], 2000, b"v");
            let mut frame = plain[..12].to_vec();
            frame.extend_from_slice(&[0x81, 0x00, 0x00, 0x2a]);
            frame.extend_from_slice(&plain[12..]);
            let decoded = decode_frame(LinkType::Ethernet, &frame).unwrap();
            assert_eq!(decoded.tuple.src_port, 1000);
            assert_eq!(decoded.payload, b"v");
        }

        #[test]
        fn test_arp_unsupported() {
            let mut frame = vec![0u8; 42];
            frame[12] = 0x08;
            frame[13] = 0x06;
            let err = decode_frame(LinkType::Ethernet, &frame).unwrap_err();
            assert_eq!(
                err,
                ParseError::Unsupported {
                    layer: "ethertype",
                    value: "0x0806".to_string()
                }
            );
        }

        #[test]
        fn test_truncated() {
            let frame = frames::ethernet_ipv4_udp([10, 0, 0, 1], 68, [10, 0, 0, 2], 67, b"");
            let err = decode_frame(LinkType::Ethernet, &frame[..20]).unwrap_err();
            assert!(matches!(err, ParseError::TruncatedHeader { layer: "ipv4" }));
        }
    }

    mod ip {
        use super::*;

        #[test]
        fn test_tcp_flags_and_payload() {
            let packet = frames::ipv4_tcp([10, 0, 0, 1], 40000, [10, 0, 0, 2], 80, 0x11, b"GET");
            let decoded = decode_frame(LinkType::Raw, &packet).unwrap();
            assert_eq!(decoded.tuple.transport, Transport::Tcp);
            let flags = decoded.tcp_flags.unwrap();
            assert!(flags.fin());
            assert!(flags.ack());
            assert_eq!(decoded.payload, b"GET");
        }

        #[test]
        fn test_icmp_type_and_code_in_ports() {
            let packet = frames::ipv4_icmp([10, 0, 0, 1], [10, 0, 0, 2], 3, 1);
            let decoded = decode_frame(LinkType::Ipv4, &packet).unwrap();
            assert_eq!(decoded.tuple.transport, Transport::Icmp);
            assert_eq!(decoded.tuple.src_port, 3);
            assert_eq!(decoded.tuple.dst_port, 1);
        }

        #[test]
        fn test_non_initial_fragment_dropped() {
            let mut packet = frames::ipv4_udp([10, 0, 0, 1], 1, [10, 0, 0, 2], 2, b"frag");
            packet[6] = 0x00;
            packet[7] = 0x10;
            assert_eq!(decode_frame(LinkType::Raw, &packet), Err(ParseError::Fragment));
        }

        #[test]
        fn test_ipv6_with_hop_by_hop() {
            let src = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1);
            let dst = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 1, 2);
            let mut udp = vec![0x02, 0x22, 0x02, 0x23, 0x00, 0x0b, 0x00, 0x00];
            udp.extend_from_slice(b"abc");
            let mut ext = vec![ip_protocols::UDP, 0, 0, 0, 0, 0, 0, 0];
            ext.extend_from_slice(&udp);
            let packet = frames::ipv6(src, dst, ipv6_ext::HOP_BY_HOP, &ext);

            let decoded = decode_frame(LinkType::Ipv6, &packet).unwrap();
            assert_eq!(decoded.tuple.src_ip, IpAddr::V6(src));
            assert_eq!(decoded.tuple.src_port, 546);
            assert_eq!(decoded.tuple.dst_port, 547);
            assert_eq!(decoded.payload, b"abc");
        }

        #[test]
        fn test_unknown_transport() {
            let mut packet = frames::ipv4_udp([10, 0, 0, 1], 1, [10, 0, 0, 2], 2, b"");
            packet[9] = 47;
            assert!(matches!(
                decode_frame(LinkType::Raw, &packet),
                Err(ParseError::Unsupported { layer: "transport", .. })
            ));
        }
    }

    mod link_types {
        use super::*;

        #[test]
        fn test_null_host_order() {
            let mut frame = AF_INET.to_ne_bytes().to_vec();
            frame.extend(frames::ipv4_udp([127, 0, 0, 1], 5000, [127, 0, 0, 1], 6000, b"n"));
            let decoded = decode_frame(LinkType::Null, &frame).unwrap();
            assert_eq!(decoded.tuple.dst_port, 6000);
        }

        #[test]
        fn test_loop_network_order() {
            let mut frame = 24u32.to_be_bytes().to_vec();
            let src = Ipv6Addr::LOCALHOST;
            let udp = [0x13, 0x88, 0x17, 0x70, 0x00, 0x08, 0x00, 0x00];
            frame.extend(frames::ipv6(src, src, ip_protocols::UDP, &udp));
            let decoded = decode_frame(LinkType::Loop, &frame).unwrap();
            assert_eq!(decoded.tuple.src_port, 5000);
            assert!(decoded.payload.is_empty());
        }

        #[test]
        fn test_linux_sll() {
            let mut frame = vec![0u8; 16];
            frame[14] = 0x08;
            frame[15] = 0x00;
            frame.extend(frames::ipv4_udp([10, 0, 0, 1], 68, [10, 0, 0, 2], 67, b"s"));
            let decoded = decode_frame(LinkType::LinuxSll, &frame).unwrap();
            assert_eq!(decoded.payload, b"s");
        }

        #[test]
        fn test_empty_frame() {
            assert!(decode_frame(LinkType::Raw, &[]).is_err());
            assert!(decode_frame(LinkType::Null, &[0, 0]).is_err());
        }
    }
}
