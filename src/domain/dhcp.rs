//! DHCPv4 message model.
//!
//! These types represent the logical structure of a DHCP message,
//! independent of wire format parsing.

use std::net::Ipv4Addr;

use macaddr::MacAddr6;

/// DHCP message types as defined in RFC 2132 option 53.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpMessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
}

impl DhcpMessageType {
    /// Parse from the DHCP option 53 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Discover),
            2 => Some(Self::Offer),
            3 => Some(Self::Request),
            4 => Some(Self::Decline),
            5 => Some(Self::Ack),
            6 => Some(Self::Nak),
            7 => Some(Self::Release),
            8 => Some(Self::Inform),
            _ => None,
        }
    }

    /// Name used in `dhcpv4.option.message_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Offer => "offer",
            Self::Request => "request",
            Self::Decline => "decline",
            Self::Ack => "ack",
            Self::Nak => "nak",
            Self::Release => "release",
            Self::Inform => "inform",
        }
    }
}

impl std::fmt::Display for DhcpMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DHCP options we surface in events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOption {
    /// Option 1
    SubnetMask(Ipv4Addr),
    /// Option 2, seconds east of UTC
    TimeOffset(i32),
    /// Option 3
    Router(Vec<Ipv4Addr>),
    /// Option 4
    TimeServers(Vec<Ipv4Addr>),
    /// Option 6
    DnsServers(Vec<Ipv4Addr>),
    /// Option 12
    HostName(String),
    /// Option 15
    DomainName(String),
    /// Option 28
    BroadcastAddress(Ipv4Addr),
    /// Option 42
    NtpServers(Vec<Ipv4Addr>),
    /// Option 50
    RequestedIp(Ipv4Addr),
    /// Option 51, seconds
    LeaseTime(u32),
    /// Option 53
    MessageType(DhcpMessageType),
    /// Option 54
    ServerIdentifier(Ipv4Addr),
    /// Option 55, requested option codes
    ParameterRequestList(Vec<u8>),
    /// Option 56
    Message(String),
    /// Option 57
    MaxMessageSize(u16),
    /// Option 58, seconds
    RenewalTime(u32),
    /// Option 59, seconds
    RebindingTime(u32),
    /// Option 60 (e.g., "PXEClient:...")
    VendorClassId(String),
    /// Option 61
    ClientId(Vec<u8>),
    /// Option 67
    BootFileName(String),
    /// Unknown option (code, data)
    Unknown(u8, Vec<u8>),
}

/// A parsed DHCP message with all fixed header fields.
#[derive(Debug, Clone)]
pub struct DhcpPacket {
    /// Operation: 1 = BOOTREQUEST, 2 = BOOTREPLY
    pub op: u8,
    /// Hardware type (1 = Ethernet)
    pub htype: u8,
    /// Hardware address length
    pub hlen: u8,
    /// Relay hops
    pub hops: u8,
    /// Transaction ID
    pub xid: u32,
    /// Seconds elapsed
    pub secs: u16,
    /// Flags
    pub flags: u16,
    /// Client IP address (if already known)
    pub ciaddr: Ipv4Addr,
    /// 'Your' IP address (assigned by server)
    pub yiaddr: Ipv4Addr,
    /// Next server IP address
    pub siaddr: Ipv4Addr,
    /// Relay agent IP address
    pub giaddr: Ipv4Addr,
    /// Client hardware address (MAC)
    pub chaddr: MacAddr6,
    /// Server hostname (optional)
    pub sname: Option<String>,
    /// Boot filename (optional)
    pub file: Option<String>,
    /// DHCP options
    pub options: Vec<DhcpOption>,
}

impl DhcpPacket {
    /// Returns true if this is a client request (BOOTREQUEST).
    pub fn is_request(&self) -> bool {
        self.op == 1
    }

    /// Returns true if this is a server reply (BOOTREPLY).
    pub fn is_reply(&self) -> bool {
        self.op == 2
    }

    /// Returns true if the client asked for broadcast replies.
    pub fn is_broadcast(&self) -> bool {
        self.flags & 0x8000 != 0
    }

    /// Get the DHCP message type from options.
    pub fn message_type(&self) -> Option<DhcpMessageType> {
        self.options.iter().find_map(|opt| {
            if let DhcpOption::MessageType(msg_type) = opt {
                Some(*msg_type)
            } else {
                None
            }
        })
    }
}

/// Human-readable name of a DHCP option code, as used in parameter request lists.
pub fn option_name(code: u8) -> &'static str {
    match code {
        1 => "Subnet Mask",
        2 => "Time Offset",
        3 => "Router",
        4 => "Time Server",
        5 => "Name Server",
        6 => "Domain Name Server",
        7 => "Log Server",
        12 => "Host Name",
        15 => "Domain Name",
        26 => "Interface MTU",
        28 => "Broadcast Address",
        33 => "Static Routing Table",
        42 => "NTP Servers",
        43 => "Vendor Specific Information",
        44 => "NetBIOS over TCP/IP Name Server",
        50 => "Requested IP Address",
        51 => "IP Addresses Lease Time",
        53 => "DHCP Message Type",
        54 => "Server Identifier",
        55 => "Parameter Request List",
        56 => "Message",
        57 => "Maximum DHCP Message Size",
        58 => "Renew Time Value",
        59 => "Rebinding Time Value",
        60 => "Class Identifier",
        61 => "Client identifier",
        66 => "TFTP Server Name",
        67 => "Bootfile Name",
        119 => "DNS Domain Search List",
        121 => "Classless Static Route",
        _ => "Unknown",
    }
}

/// Name of an ARP hardware type.
pub fn hardware_type_name(htype: u8) -> String {
    match htype {
        1 => "Ethernet".to_string(),
        6 => "IEEE 802".to_string(),
        32 => "InfiniBand".to_string(),
        other => format!("{}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bootp(op: u8, flags: u16, options: Vec<DhcpOption>) -> DhcpPacket {
        DhcpPacket {
            op,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid: 0x3d1e,
            secs: 0,
            flags,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::new(192, 168, 0, 10),
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: MacAddr6::new(0x00, 0x0b, 0x82, 0x01, 0xfc, 0x42),
            sname: None,
            file: None,
            options,
        }
    }

    mod message_type {
        use super::*;

        #[test]
        fn test_option_53_values() {
            let decoded: Vec<_> = (0..=9).map(DhcpMessageType::from_u8).collect();
            assert_eq!(decoded[0], None);
            assert_eq!(decoded[2], Some(DhcpMessageType::Offer));
            assert_eq!(decoded[6], Some(DhcpMessageType::Nak));
            assert_eq!(decoded[9], None);
        }

        #[test]
        fn test_names_are_lowercase() {
            assert_eq!(DhcpMessageType::Decline.to_string(), "decline");
            assert_eq!(DhcpMessageType::Ack.as_str(), "ack");
        }
    }

    mod packet {
        use super::*;

        #[test]
        fn test_op_code_decides_direction() {
            let request = bootp(1, 0, vec![]);
            let reply = bootp(2, 0, vec![]);
            assert!(request.is_request() && !request.is_reply());
            assert!(reply.is_reply() && !reply.is_request());
            assert!(!bootp(3, 0, vec![]).is_request());
        }

        #[test]
        fn test_broadcast_bit() {
            assert!(bootp(1, 0x8000, vec![]).is_broadcast());
            assert!(!bootp(1, 0x0001, vec![]).is_broadcast());
        }

        #[test]
        fn test_message_type_scans_all_options() {
            let ack = bootp(
                2,
                0,
                vec![
                    DhcpOption::LeaseTime(3600),
                    DhcpOption::VendorClassId("udhcp 1.36".to_string()),
                    DhcpOption::MessageType(DhcpMessageType::Ack),
                ],
            );
            assert_eq!(ack.message_type(), Some(DhcpMessageType::Ack));

            let bare = bootp(2, 0, vec![]);
            assert_eq!(bare.message_type(), None);
        }
    }

    #[test]
    fn test_option_names() {
        assert_eq!(option_name(1), "Subnet Mask");
        assert_eq!(option_name(42), "NTP Servers");
        assert_eq!(option_name(200), "Unknown");
    }

    #[test]
    fn test_hardware_type_name() {
        assert_eq!(hardware_type_name(1), "Ethernet");
        assert_eq!(hardware_type_name(99), "99");
    }
}
