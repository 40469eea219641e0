//! Community-ID v1 flow hashing.
//!
//! Produces `1:<base64(sha1(seed, lower endpoint, higher endpoint, proto))>`,
//! identical for both directions of a flow.
//! See <https://github.com/corelight/community-id-spec>.

use std::net::IpAddr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

use crate::domain::{IpPortTuple, Transport};

/// ICMPv4 message types that have a counterpart in the opposite direction.
const ICMP_TWO_WAY: [(u16, u16); 10] = [
    (8, 0),   // echo request / reply
    (0, 8),
    (13, 14), // timestamp
    (14, 13),
    (15, 16), // information
    (16, 15),
    (10, 9),  // router solicitation / advertisement
    (9, 10),
    (17, 18), // address mask
    (18, 17),
];

/// ICMPv6 message types that have a counterpart in the opposite direction.
const ICMPV6_TWO_WAY: [(u16, u16); 12] = [
    (128, 129), // echo request / reply
    (129, 128),
    (133, 134), // router solicitation / advertisement
    (134, 133),
    (135, 136), // neighbor solicitation / advertisement
    (136, 135),
    (130, 131), // multicast listener query / report
    (131, 130),
    (139, 140), // node information query / response
    (140, 139),
    (144, 145), // home agent address discovery
    (145, 144),
];

/// Compute the Community-ID of a tuple with the given seed.
pub fn compute(tuple: &IpPortTuple, seed: u16) -> String {
    let (src_port, mut dst_port) = (tuple.src_port, tuple.dst_port);
    let mut one_way = false;

    if tuple.transport.is_icmp() {
        let table: &[(u16, u16)] = if tuple.transport == Transport::Icmp {
            &ICMP_TWO_WAY
        } else {
            &ICMPV6_TWO_WAY
        };
        match table.iter().find(|(t, _)| *t == tuple.src_port) {
            Some((_, counterpart)) => dst_port = *counterpart,
            None => one_way = true,
        }
    }

    let ordered = one_way
        || (octets(&tuple.src_ip), src_port) < (octets(&tuple.dst_ip), dst_port);

    let (lo_ip, hi_ip, lo_port, hi_port) = if ordered {
        (tuple.src_ip, tuple.dst_ip, src_port, dst_port)
    } else {
        (tuple.dst_ip, tuple.src_ip, dst_port, src_port)
    };

    let mut hasher = Sha1::new();
    hasher.update(seed.to_be_bytes());
    hasher.update(octets(&lo_ip));
    hasher.update(octets(&hi_ip));
    hasher.update([tuple.transport.protocol_number(), 0]);
    hasher.update(lo_port.to_be_bytes());
    hasher.update(hi_port.to_be_bytes());

    format!("1:{}", STANDARD.encode(hasher.finalize()))
}

fn octets(ip: &IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}
