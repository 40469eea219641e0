//! Direction-normalized flow key.

use std::fmt;
use std::net::IpAddr;

use super::packet::{IpPortTuple, Transport};

/// Direction of a packet relative to its flow's canonical key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// From the canonical first endpoint to the second.
    AToB,
    /// From the canonical second endpoint to the first.
    BToA,
}

/// A flow's identity, independent of which side sent a given packet.
///
/// Endpoint `a` is the lexicographically smaller `(ip, port)` pair. ICMP
/// flows are keyed by address pair only, so a request and its reply land in
/// the same flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey {
    pub transport: Transport,
    pub a_ip: IpAddr,
    pub a_port: u16,
    pub b_ip: IpAddr,
    pub b_port: u16,
}

impl FlowKey {
    /// Normalize a wire tuple, returning the key and the packet's direction.
    pub fn normalize(tuple: &IpPortTuple) -> (Self, Direction) {
        let (src_port, dst_port) = if tuple.transport.is_icmp() {
            (0, 0)
        } else {
            (tuple.src_port, tuple.dst_port)
        };

        if (tuple.src_ip, src_port) <= (tuple.dst_ip, dst_port) {
            (
                Self {
                    transport: tuple.transport,
                    a_ip: tuple.src_ip,
                    a_port: src_port,
                    b_ip: tuple.dst_ip,
                    b_port: dst_port,
                },
                Direction::AToB,
            )
        } else {
            (
                Self {
                    transport: tuple.transport,
                    a_ip: tuple.dst_ip,
                    a_port: dst_port,
                    b_ip: tuple.src_ip,
                    b_port: src_port,
                },
                Direction::BToA,
            )
        }
    }

    /// The key as an A-to-B tuple.
    pub fn as_tuple(&self) -> IpPortTuple {
        IpPortTuple::new(self.transport, self.a_ip, self.a_port, self.b_ip, self.b_port)
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} <-> {}:{} ({})",
            self.a_ip, self.a_port, self.b_ip, self.b_port, self.transport
        )
    }
}
