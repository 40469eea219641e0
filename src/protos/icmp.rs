//! ICMPv4 and ICMPv6 analyzer.
//!
//! Stateless: every message becomes one event. The decoder stores the ICMP
//! type in the tuple's source port and the code in its destination port.

use serde_json::{json, Map};

use super::ProtocolAnalyzer;
use crate::domain::{Packet, ProtocolEvent, Role, Transport};
use crate::flows::FlowHandle;

pub(crate) const NAME: &str = "icmp";

/// Request types of ICMPv4: echo, router solicitation, timestamp,
/// information and address mask.
const ICMPV4_REQUESTS: [u8; 5] = [8, 10, 13, 15, 17];
const ICMPV4_REPLIES: [u8; 5] = [0, 9, 14, 16, 18];

/// Request types of ICMPv6: echo, MLD query, router and neighbor
/// solicitation, node information query.
const ICMPV6_REQUESTS: [u8; 5] = [128, 130, 133, 135, 139];
const ICMPV6_REPLIES: [u8; 5] = [129, 131, 134, 136, 140];

pub struct IcmpAnalyzer {
    seed: u16,
}

impl IcmpAnalyzer {
    pub fn new(seed: u16) -> Self {
        Self { seed }
    }

    /// Replies are sent by the server; everything else by the client.
    fn role(transport: Transport, icmp_type: u8) -> Role {
        let replies: &[u8] = match transport {
            Transport::Icmpv6 => &ICMPV6_REPLIES,
            _ => &ICMPV4_REPLIES,
        };
        if replies.contains(&icmp_type) {
            Role::ClientIsDestination
        } else {
            Role::ClientIsSource
        }
    }

    /// True for message types that expect an answer.
    pub fn is_request(transport: Transport, icmp_type: u8) -> bool {
        match transport {
            Transport::Icmpv6 => ICMPV6_REQUESTS.contains(&icmp_type),
            _ => ICMPV4_REQUESTS.contains(&icmp_type),
        }
    }
}

impl ProtocolAnalyzer for IcmpAnalyzer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn matches(&self, packet: &Packet<'_>) -> bool {
        packet.tuple.transport.is_icmp()
    }

    fn decode(&mut self, packet: &Packet<'_>, _flow: &mut FlowHandle<'_>) -> Option<ProtocolEvent> {
        let transport = packet.tuple.transport;
        let icmp_type = packet.tuple.src_port as u8;
        let code = packet.tuple.dst_port as u8;
        let version = if transport == Transport::Icmpv6 { 6 } else { 4 };

        let mut fields = Map::new();
        fields.insert("version".to_string(), json!(version));
        fields.insert("type".to_string(), json!(icmp_type));
        fields.insert("code".to_string(), json!(code));
        fields.insert(
            "request".to_string(),
            json!(Self::is_request(transport, icmp_type)),
        );

        let protocol = if version == 6 { "icmpv6" } else { "icmp" };
        let event = ProtocolEvent::new(NAME, packet.timestamp, &packet.tuple, self.seed)
            .with_protocol(protocol)
            .with_role(Self::role(transport, icmp_type))
            .with_source_bytes(packet.payload.len() as u64)
            .with_fields(fields);
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IpPortTuple;
    use crate::flows::FlowTracker;
    use chrono::Utc;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
    use std::time::Duration;

    fn decode(tuple: IpPortTuple) -> ProtocolEvent {
        let mut analyzer = IcmpAnalyzer::new(0);
        let mut flows = FlowTracker::new(Duration::from_secs(30));
        let payload = [0u8; 56];
        let packet = Packet::new(Utc::now(), tuple, &payload);
        let mut handle = flows.touch(&tuple, packet.timestamp, 56);
        analyzer.decode(&packet, &mut handle).unwrap()
    }

    fn v4(icmp_type: u16, code: u16) -> IpPortTuple {
        IpPortTuple::new(
            Transport::Icmp,
            IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1)),
            icmp_type,
            IpAddr::V4(Ipv4Addr::new(192, 168, 0, 2)),
            code,
        )
    }

    #[test]
    fn test_echo_request_client_is_source() {
        let event = decode(v4(8, 0));
        assert_eq!(event.client().ip.to_string(), "192.168.0.1");
        assert_eq!(event.fields["type"], 8);
        assert_eq!(event.fields["version"], 4);
        assert_eq!(event.fields["request"], true);
        assert_eq!(event.network_bytes, 56);
    }

    #[test]
    fn test_echo_reply_client_is_destination() {
        let event = decode(v4(0, 0));
        assert_eq!(event.client().ip.to_string(), "192.168.0.2");
        assert_eq!(event.server().ip.to_string(), "192.168.0.1");
    }

    #[test]
    fn test_request_and_reply_share_community_id() {
        let request = decode(v4(8, 0));
        let reply_tuple = IpPortTuple::new(
            Transport::Icmp,
            IpAddr::V4(Ipv4Addr::new(192, 168, 0, 2)),
            0,
            IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1)),
            0,
        );
        let reply = decode(reply_tuple);
        assert_eq!(request.community_id, reply.community_id);
    }

    #[test]
    fn test_unreachable_keeps_wire_roles() {
        let event = decode(v4(3, 1));
        assert_eq!(event.client().ip.to_string(), "192.168.0.1");
        assert_eq!(event.fields["code"], 1);
        assert_eq!(event.fields["request"], false);
    }

    #[test]
    fn test_icmpv6_neighbor_advertisement() {
        let tuple = IpPortTuple::new(
            Transport::Icmpv6,
            IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1)),
            136,
            IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 2)),
            0,
        );
        let event = decode(tuple);
        assert_eq!(event.fields["version"], 6);
        assert_eq!(event.protocol.as_deref(), Some("icmpv6"));
        assert_eq!(event.client().ip.to_string(), "fe80::2");
    }
}
