//! Decoded packet and the 5-tuple that identifies its flow.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// IP protocol numbers for the transports we decode.
pub mod ip_protocols {
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
    pub const ICMPV6: u8 = 58;
}

/// Address family of a packet, rendered as `network.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    Ipv4,
    Ipv6,
}

impl IpFamily {
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Self::Ipv4,
            IpAddr::V6(_) => Self::Ipv6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ipv4 => "ipv4",
            Self::Ipv6 => "ipv6",
        }
    }
}

/// Transport protocol carried by the network layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Transport {
    #[serde(rename = "icmp")]
    Icmp,
    #[serde(rename = "tcp")]
    Tcp,
    #[serde(rename = "udp")]
    Udp,
    #[serde(rename = "ipv6-icmp")]
    Icmpv6,
}

impl Transport {
    pub fn from_protocol_number(value: u8) -> Option<Self> {
        match value {
            ip_protocols::ICMP => Some(Self::Icmp),
            ip_protocols::TCP => Some(Self::Tcp),
            ip_protocols::UDP => Some(Self::Udp),
            ip_protocols::ICMPV6 => Some(Self::Icmpv6),
            _ => None,
        }
    }

    pub fn protocol_number(&self) -> u8 {
        match self {
            Self::Icmp => ip_protocols::ICMP,
            Self::Tcp => ip_protocols::TCP,
            Self::Udp => ip_protocols::UDP,
            Self::Icmpv6 => ip_protocols::ICMPV6,
        }
    }

    /// Name used for `network.transport`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Icmp => "icmp",
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Icmpv6 => "ipv6-icmp",
        }
    }

    pub fn is_icmp(&self) -> bool {
        matches!(self, Self::Icmp | Self::Icmpv6)
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The 5-tuple of a packet in wire direction.
///
/// For ICMP the ports carry the message type and code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpPortTuple {
    pub transport: Transport,
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
}

impl IpPortTuple {
    pub fn new(
        transport: Transport,
        src_ip: IpAddr,
        src_port: u16,
        dst_ip: IpAddr,
        dst_port: u16,
    ) -> Self {
        Self {
            transport,
            src_ip,
            src_port,
            dst_ip,
            dst_port,
        }
    }

    pub fn family(&self) -> IpFamily {
        IpFamily::of(&self.src_ip)
    }

    /// The same tuple seen from the other direction.
    pub fn reversed(&self) -> Self {
        Self {
            transport: self.transport,
            src_ip: self.dst_ip,
            src_port: self.dst_port,
            dst_ip: self.src_ip,
            dst_port: self.src_port,
        }
    }
}

impl fmt::Display for IpPortTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} ({})",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port, self.transport
        )
    }
}

/// TCP control bits of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const ACK: u8 = 0x10;

    pub fn fin(&self) -> bool {
        self.0 & Self::FIN != 0
    }

    pub fn syn(&self) -> bool {
        self.0 & Self::SYN != 0
    }

    pub fn rst(&self) -> bool {
        self.0 & Self::RST != 0
    }

    pub fn ack(&self) -> bool {
        self.0 & Self::ACK != 0
    }
}

/// A decoded packet handed to the analyzers.
///
/// The payload borrows the captured frame, so a packet cannot outlive the
/// analyzer call that consumes it. Analyzers copy whatever they keep.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub timestamp: DateTime<Utc>,
    pub tuple: IpPortTuple,
    pub payload: &'a [u8],
    /// Control bits, present for TCP segments only.
    pub tcp_flags: Option<TcpFlags>,
}

impl<'a> Packet<'a> {
    pub fn new(timestamp: DateTime<Utc>, tuple: IpPortTuple, payload: &'a [u8]) -> Self {
        Self {
            timestamp,
            tuple,
            payload,
            tcp_flags: None,
        }
    }

    pub fn with_tcp_flags(mut self, flags: TcpFlags) -> Self {
        self.tcp_flags = Some(flags);
        self
    }
}
