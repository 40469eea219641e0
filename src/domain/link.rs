//! Link-layer framing of captured frames.

use std::fmt;

use pcap_file::DataLink;

use crate::error::CaptureError;

/// How to interpret the outermost header of a captured frame.
///
/// Fixed for the lifetime of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    /// Ethernet II, optionally 802.1Q tagged.
    Ethernet,
    /// Raw IP, version taken from the first nibble.
    Raw,
    /// Raw IPv4.
    Ipv4,
    /// Raw IPv6.
    Ipv6,
    /// BSD loopback, address family in host byte order.
    Null,
    /// OpenBSD loopback, address family in network byte order.
    Loop,
    /// Linux cooked capture (SLL).
    LinuxSll,
}

impl LinkType {
    /// The pcap data link value used when mirroring frames to a dump file.
    pub fn to_datalink(self) -> DataLink {
        match self {
            Self::Ethernet => DataLink::ETHERNET,
            Self::Raw => DataLink::RAW,
            Self::Ipv4 => DataLink::IPV4,
            Self::Ipv6 => DataLink::IPV6,
            Self::Null => DataLink::NULL,
            Self::Loop => DataLink::LOOP,
            Self::LinuxSll => DataLink::LINUX_SLL,
        }
    }
}

impl TryFrom<DataLink> for LinkType {
    type Error = CaptureError;

    fn try_from(value: DataLink) -> Result<Self, Self::Error> {
        match value {
            DataLink::ETHERNET => Ok(Self::Ethernet),
            DataLink::RAW => Ok(Self::Raw),
            DataLink::IPV4 => Ok(Self::Ipv4),
            DataLink::IPV6 => Ok(Self::Ipv6),
            DataLink::NULL => Ok(Self::Null),
            DataLink::LOOP => Ok(Self::Loop),
            DataLink::LINUX_SLL => Ok(Self::LinuxSll),
            other => Err(CaptureError::UnsupportedLinkType(format!("{:?}", other))),
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ethernet => "ethernet",
            Self::Raw => "raw",
            Self::Ipv4 => "ipv4",
            Self::Ipv6 => "ipv6",
            Self::Null => "null",
            Self::Loop => "loop",
            Self::LinuxSll => "linux_sll",
        };
        f.write_str(name)
    }
}
