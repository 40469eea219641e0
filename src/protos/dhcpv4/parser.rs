//! DHCPv4 wire format parser (RFC 2131, RFC 2132).

use std::net::Ipv4Addr;

use macaddr::MacAddr6;

use crate::domain::{DhcpMessageType, DhcpOption, DhcpPacket};
use crate::error::ParseError;

/// DHCP magic cookie: 0x63825363
const DHCP_MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// Fixed BOOTP header size (without cookie or options)
const MIN_DHCP_SIZE: usize = 236;

/// Offset of the first option
pub(super) const OPTIONS_OFFSET: usize = 240;

/// DHCP option codes
mod option_codes {
    pub const PAD: u8 = 0;
    pub const SUBNET_MASK: u8 = 1;
    pub const TIME_OFFSET: u8 = 2;
    pub const ROUTER: u8 = 3;
    pub const TIME_SERVER: u8 = 4;
    pub const DNS_SERVER: u8 = 6;
    pub const HOST_NAME: u8 = 12;
    pub const DOMAIN_NAME: u8 = 15;
    pub const BROADCAST_ADDRESS: u8 = 28;
    pub const NTP_SERVERS: u8 = 42;
    pub const REQUESTED_IP: u8 = 50;
    pub const LEASE_TIME: u8 = 51;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_ID: u8 = 54;
    pub const PARAMETER_REQUEST_LIST: u8 = 55;
    pub const MESSAGE: u8 = 56;
    pub const MAX_MESSAGE_SIZE: u8 = 57;
    pub const RENEWAL_TIME: u8 = 58;
    pub const REBINDING_TIME: u8 = 59;
    pub const VENDOR_CLASS_ID: u8 = 60;
    pub const CLIENT_ID: u8 = 61;
    pub const BOOT_FILE_NAME: u8 = 67;
    pub const END: u8 = 255;
}

/// Parser for DHCPv4 messages.
///
/// Stateless: the same input always yields the same result.
#[derive(Debug, Default, Clone, Copy)]
pub struct DhcpParser;

impl DhcpParser {
    /// Create a new DHCP parser.
    pub fn new() -> Self {
        Self
    }

    /// Parse the fixed header and check the magic cookie.
    ///
    /// The returned packet has no options.
    pub fn parse_header(&self, data: &[u8]) -> Result<DhcpPacket, ParseError> {
        if data.len() < MIN_DHCP_SIZE {
            return Err(ParseError::PacketTooShort {
                expected: MIN_DHCP_SIZE,
                actual: data.len(),
            });
        }

        let op = data[0];
        let htype = data[1];
        let hlen = data[2];
        let hops = data[3];
        let xid = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let secs = u16::from_be_bytes([data[8], data[9]]);
        let flags = u16::from_be_bytes([data[10], data[11]]);

        let ciaddr = ipv4_at(data, 12);
        let yiaddr = ipv4_at(data, 16);
        let siaddr = ipv4_at(data, 20);
        let giaddr = ipv4_at(data, 24);

        // chaddr is 16 bytes at offset 28; Ethernet uses the first 6
        let chaddr = MacAddr6::new(data[28], data[29], data[30], data[31], data[32], data[33]);

        let sname = Self::parse_null_terminated_string(&data[44..108]);
        let file = Self::parse_null_terminated_string(&data[108..236]);

        if data.len() < OPTIONS_OFFSET {
            return Err(ParseError::PacketTooShort {
                expected: OPTIONS_OFFSET,
                actual: data.len(),
            });
        }

        if data[236..240] != DHCP_MAGIC_COOKIE {
            return Err(ParseError::InvalidMagicCookie);
        }

        Ok(DhcpPacket {
            op,
            htype,
            hlen,
            hops,
            xid,
            secs,
            flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            sname,
            file,
            options: Vec::new(),
        })
    }

    /// Parse a null-terminated string, returning None if empty.
    fn parse_null_terminated_string(data: &[u8]) -> Option<String> {
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        if end == 0 {
            return None;
        }

        String::from_utf8(data[..end].to_vec()).ok()
    }

    /// Parse DHCP options from the options section.
    pub fn parse_options(&self, data: &[u8]) -> Result<Vec<DhcpOption>, ParseError> {
        let mut options = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            let code = data[offset];

            if code == option_codes::PAD {
                offset += 1;
                continue;
            }

            if code == option_codes::END {
                break;
            }

            // Regular option: code + length + data
            if offset + 1 >= data.len() {
                return Err(ParseError::InvalidOption {
                    offset: OPTIONS_OFFSET + offset,
                    message: "option length missing".to_string(),
                });
            }

            let len = data[offset + 1] as usize;

            if offset + 2 + len > data.len() {
                return Err(ParseError::InvalidOption {
                    offset: OPTIONS_OFFSET + offset,
                    message: format!(
                        "option {} data truncated: expected {} bytes, have {}",
                        code,
                        len,
                        data.len() - offset - 2
                    ),
                });
            }

            let option_data = &data[offset + 2..offset + 2 + len];

            if let Some(option) = self.parse_option(code, option_data) {
                options.push(option);
            }

            offset += 2 + len;
        }

        Ok(options)
    }

    /// Parse a single DHCP option. Malformed values are skipped.
    fn parse_option(&self, code: u8, data: &[u8]) -> Option<DhcpOption> {
        match code {
            option_codes::SUBNET_MASK => single_ipv4(data).map(DhcpOption::SubnetMask),
            option_codes::TIME_OFFSET => {
                let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
                Some(DhcpOption::TimeOffset(i32::from_be_bytes(bytes)))
            }
            option_codes::ROUTER => ipv4_list(data).map(DhcpOption::Router),
            option_codes::TIME_SERVER => ipv4_list(data).map(DhcpOption::TimeServers),
            option_codes::DNS_SERVER => ipv4_list(data).map(DhcpOption::DnsServers),
            option_codes::HOST_NAME => text(data).map(DhcpOption::HostName),
            option_codes::DOMAIN_NAME => text(data).map(DhcpOption::DomainName),
            option_codes::BROADCAST_ADDRESS => {
                single_ipv4(data).map(DhcpOption::BroadcastAddress)
            }
            option_codes::NTP_SERVERS => ipv4_list(data).map(DhcpOption::NtpServers),
            option_codes::REQUESTED_IP => single_ipv4(data).map(DhcpOption::RequestedIp),
            option_codes::LEASE_TIME => be_u32(data).map(DhcpOption::LeaseTime),
            option_codes::MESSAGE_TYPE => data
                .first()
                .and_then(|&value| DhcpMessageType::from_u8(value))
                .map(DhcpOption::MessageType),
            option_codes::SERVER_ID => single_ipv4(data).map(DhcpOption::ServerIdentifier),
            option_codes::PARAMETER_REQUEST_LIST => {
                Some(DhcpOption::ParameterRequestList(data.to_vec()))
            }
            option_codes::MESSAGE => text(data).map(DhcpOption::Message),
            option_codes::MAX_MESSAGE_SIZE => {
                let bytes: [u8; 2] = data.get(..2)?.try_into().ok()?;
                Some(DhcpOption::MaxMessageSize(u16::from_be_bytes(bytes)))
            }
            option_codes::RENEWAL_TIME => be_u32(data).map(DhcpOption::RenewalTime),
            option_codes::REBINDING_TIME => be_u32(data).map(DhcpOption::RebindingTime),
            option_codes::VENDOR_CLASS_ID => text(data).map(DhcpOption::VendorClassId),
            option_codes::CLIENT_ID => Some(DhcpOption::ClientId(data.to_vec())),
            option_codes::BOOT_FILE_NAME => text(data).map(DhcpOption::BootFileName),
            _ => Some(DhcpOption::Unknown(code, data.to_vec())),
        }
    }
}

fn ipv4_at(data: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(data[offset], data[offset + 1], data[offset + 2], data[offset + 3])
}

fn single_ipv4(data: &[u8]) -> Option<Ipv4Addr> {
    if data.len() != 4 {
        return None;
    }
    Some(ipv4_at(data, 0))
}

fn ipv4_list(data: &[u8]) -> Option<Vec<Ipv4Addr>> {
    if data.is_empty() || data.len() % 4 != 0 {
        return None;
    }
    Some(data.chunks_exact(4).map(|c| ipv4_at(c, 0)).collect())
}

fn be_u32(data: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = data.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

fn text(data: &[u8]) -> Option<String> {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8(data[..end].to_vec()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &[u8]) -> Result<DhcpPacket, ParseError> {
        let parser = DhcpParser::new();
        let mut packet = parser.parse_header(data)?;
        packet.options = parser.parse_options(&data[OPTIONS_OFFSET..])?;
        Ok(packet)
    }

    fn minimal_packet() -> Vec<u8> {
        let mut packet = vec![0u8; 300];
        // Op: BOOTREQUEST
        packet[0] = 1;
        // Hardware type: Ethernet
        packet[1] = 1;
        packet[2] = 6;
        packet[4..8].copy_from_slice(&0x12345678u32.to_be_bytes());
        packet[28..34].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);
        // Message type option (DISCOVER)
        packet[240] = option_codes::MESSAGE_TYPE;
        packet[241] = 1;
        packet[242] = 1;
        packet[243] = option_codes::END;
        packet
    }

    #[test]
    fn test_parse_minimum_packet() {
        let dhcp = parse(&minimal_packet()).unwrap();

        assert_eq!(dhcp.op, 1);
        assert_eq!(dhcp.xid, 0x12345678);
        assert_eq!(dhcp.chaddr, MacAddr6::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff));
        assert_eq!(dhcp.message_type(), Some(DhcpMessageType::Discover));
    }

    #[test]
    fn test_packet_too_short() {
        let result = parse(&[0u8; 100]);
        assert!(matches!(result, Err(ParseError::PacketTooShort { .. })));
    }

    #[test]
    fn test_missing_cookie_section() {
        let result = parse(&[0u8; 238]);
        assert_eq!(
            result.unwrap_err(),
            ParseError::PacketTooShort {
                expected: 240,
                actual: 238
            }
        );
    }

    #[test]
    fn test_invalid_magic_cookie() {
        let mut packet = minimal_packet();
        packet[236] = 0;
        let result = parse(&packet);
        assert_eq!(result.unwrap_err(), ParseError::InvalidMagicCookie);
    }

    #[test]
    fn test_truncated_option() {
        let mut packet = minimal_packet();
        packet.truncate(243);
        packet[240] = option_codes::HOST_NAME;
        packet[241] = 10;
        packet[242] = b'a';
        let result = parse(&packet);
        assert!(matches!(
            result,
            Err(ParseError::InvalidOption { offset: 240, .. })
        ));
    }

    #[test]
    fn test_lists_and_times() {
        let mut packet = minimal_packet();
        packet.truncate(240);
        packet.extend_from_slice(&[option_codes::DNS_SERVER, 8, 8, 8, 8, 8, 1, 1, 1, 1]);
        packet.extend_from_slice(&[option_codes::LEASE_TIME, 4, 0, 0, 0x0e, 0x10]);
        packet.extend_from_slice(&[option_codes::PARAMETER_REQUEST_LIST, 3, 1, 3, 6]);
        packet.push(option_codes::END);

        let dhcp = parse(&packet).unwrap();
        assert!(dhcp.options.contains(&DhcpOption::DnsServers(vec![
            Ipv4Addr::new(8, 8, 8, 8),
            Ipv4Addr::new(1, 1, 1, 1)
        ])));
        assert!(dhcp.options.contains(&DhcpOption::LeaseTime(3600)));
        assert!(dhcp
            .options
            .contains(&DhcpOption::ParameterRequestList(vec![1, 3, 6])));
    }

    #[test]
    fn test_pad_and_unknown_options() {
        let mut packet = minimal_packet();
        packet.truncate(240);
        packet.extend_from_slice(&[option_codes::PAD, option_codes::PAD, 200, 2, 0xde, 0xad]);
        packet.push(option_codes::END);

        let dhcp = parse(&packet).unwrap();
        assert_eq!(dhcp.options, vec![DhcpOption::Unknown(200, vec![0xde, 0xad])]);
    }

    #[test]
    fn test_sname_and_file() {
        let mut packet = minimal_packet();
        packet[44..48].copy_from_slice(b"boot");
        packet[108..118].copy_from_slice(b"pxelinux.0");
        let dhcp = parse(&packet).unwrap();
        assert_eq!(dhcp.sname.as_deref(), Some("boot"));
        assert_eq!(dhcp.file.as_deref(), Some("pxelinux.0"));
    }
}
