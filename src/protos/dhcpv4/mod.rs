//! DHCPv4 analyzer.
//!
//! Role rule: a BOOTREQUEST is sent by the client (client = source), a
//! BOOTREPLY by the server (client = destination).

mod parser;

pub use parser::DhcpParser;

use std::net::Ipv4Addr;

use serde_json::{json, Map, Value};
use tracing::{debug, trace};

use self::parser::OPTIONS_OFFSET;
use super::ProtocolAnalyzer;
use crate::config::Dhcpv4Config;
use crate::domain::{
    hardware_type_name, option_name, DhcpOption, DhcpPacket, Packet, ProtocolEvent, Role,
};
use crate::error::ConfigError;
use crate::flows::FlowHandle;

pub(crate) const NAME: &str = "dhcpv4";

pub struct Dhcpv4Analyzer {
    parser: DhcpParser,
    ports: Vec<u16>,
    send_errors: bool,
    seed: u16,
}

impl Dhcpv4Analyzer {
    pub fn new(config: &Dhcpv4Config, seed: u16) -> Result<Self, ConfigError> {
        if config.ports.is_empty() {
            return Err(ConfigError::Protocol {
                protocol: NAME,
                message: "at least one port is required".to_string(),
            });
        }
        Ok(Self {
            parser: DhcpParser::new(),
            ports: config.ports.clone(),
            send_errors: config.send_errors,
            seed,
        })
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Decode one DHCP datagram into an event.
    ///
    /// Header errors give an `Error` event without fields; option errors give
    /// an `Error` event carrying the header fields. With `send_errors` off,
    /// malformed messages produce nothing.
    pub fn parse(&self, packet: &Packet<'_>) -> Option<ProtocolEvent> {
        let payload = packet.payload;
        let event = ProtocolEvent::new(NAME, packet.timestamp, &packet.tuple, self.seed)
            .with_protocol(NAME)
            .with_source_bytes(payload.len() as u64);

        let mut dhcp = match self.parser.parse_header(payload) {
            Ok(dhcp) => dhcp,
            Err(e) => {
                debug!("Malformed DHCPv4 header from {}: {}", packet.tuple, e);
                return self.send_errors.then(|| event.with_error(e.to_string()));
            }
        };

        let role = if dhcp.is_reply() {
            Role::ClientIsDestination
        } else {
            Role::ClientIsSource
        };
        let event = event.with_role(role);

        match self.parser.parse_options(&payload[OPTIONS_OFFSET..]) {
            Ok(options) => {
                dhcp.options = options;
                trace!(
                    "DHCPv4 {:?} xid {:#010x} from {}",
                    dhcp.message_type(),
                    dhcp.xid,
                    packet.tuple
                );
                Some(event.with_fields(fields(&dhcp)))
            }
            Err(e) => {
                debug!("Malformed DHCPv4 options from {}: {}", packet.tuple, e);
                self.send_errors
                    .then(|| event.with_fields(fields(&dhcp)).with_error(e.to_string()))
            }
        }
    }
}

impl ProtocolAnalyzer for Dhcpv4Analyzer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn matches(&self, packet: &Packet<'_>) -> bool {
        self.ports.contains(&packet.tuple.src_port) || self.ports.contains(&packet.tuple.dst_port)
    }

    fn decode(&mut self, packet: &Packet<'_>, _flow: &mut FlowHandle<'_>) -> Option<ProtocolEvent> {
        self.parse(packet)
    }
}

fn fields(dhcp: &DhcpPacket) -> Map<String, Value> {
    let mut fields = Map::new();

    let op_code = match dhcp.op {
        1 => "bootrequest".to_string(),
        2 => "bootreply".to_string(),
        other => other.to_string(),
    };
    fields.insert("op_code".to_string(), json!(op_code));
    fields.insert("hardware_type".to_string(), json!(hardware_type_name(dhcp.htype)));
    fields.insert("hops".to_string(), json!(dhcp.hops));
    fields.insert(
        "transaction_id".to_string(),
        json!(format!("{:#010x}", dhcp.xid)),
    );
    fields.insert("seconds".to_string(), json!(dhcp.secs));
    let flags = if dhcp.is_broadcast() { "broadcast" } else { "unicast" };
    fields.insert("flags".to_string(), json!(flags));
    fields.insert(
        "client_mac".to_string(),
        json!(dhcp.chaddr.to_string().to_lowercase()),
    );

    insert_ip(&mut fields, "client_ip", dhcp.ciaddr);
    insert_ip(&mut fields, "assigned_ip", dhcp.yiaddr);
    insert_ip(&mut fields, "server_ip", dhcp.siaddr);
    insert_ip(&mut fields, "relay_ip", dhcp.giaddr);

    if let Some(sname) = &dhcp.sname {
        fields.insert("server_name".to_string(), json!(sname));
    }
    if let Some(file) = &dhcp.file {
        fields.insert("boot_file_name".to_string(), json!(file));
    }

    let options = option_fields(&dhcp.options);
    if !options.is_empty() {
        fields.insert("option".to_string(), Value::Object(options));
    }

    fields
}

fn insert_ip(fields: &mut Map<String, Value>, key: &str, ip: Ipv4Addr) {
    if !ip.is_unspecified() {
        fields.insert(key.to_string(), json!(ip.to_string()));
    }
}

fn ip_list(ips: &[Ipv4Addr]) -> Value {
    json!(ips.iter().map(|ip| ip.to_string()).collect::<Vec<_>>())
}

fn option_fields(options: &[DhcpOption]) -> Map<String, Value> {
    let mut out = Map::new();
    for option in options {
        let (key, value) = match option {
            DhcpOption::MessageType(t) => ("message_type", json!(t.as_str())),
            DhcpOption::ParameterRequestList(codes) => (
                "parameter_request_list",
                json!(codes.iter().map(|&c| option_name(c)).collect::<Vec<_>>()),
            ),
            DhcpOption::RequestedIp(ip) => ("requested_ip_address", json!(ip.to_string())),
            DhcpOption::ServerIdentifier(ip) => ("server_identifier", json!(ip.to_string())),
            DhcpOption::SubnetMask(ip) => ("subnet_mask", json!(ip.to_string())),
            DhcpOption::BroadcastAddress(ip) => ("broadcast_address", json!(ip.to_string())),
            DhcpOption::Router(ips) => ("router", ip_list(ips)),
            DhcpOption::DnsServers(ips) => ("dns_servers", ip_list(ips)),
            DhcpOption::NtpServers(ips) => ("ntp_servers", ip_list(ips)),
            DhcpOption::TimeServers(ips) => ("time_servers", ip_list(ips)),
            DhcpOption::HostName(s) => ("hostname", json!(s)),
            DhcpOption::DomainName(s) => ("domain_name", json!(s)),
            DhcpOption::VendorClassId(s) => ("class_identifier", json!(s)),
            DhcpOption::Message(s) => ("message", json!(s)),
            DhcpOption::BootFileName(s) => ("boot_file_name", json!(s)),
            DhcpOption::LeaseTime(secs) => ("ip_address_lease_time_sec", json!(secs)),
            DhcpOption::RenewalTime(secs) => ("renewal_time_sec", json!(secs)),
            DhcpOption::RebindingTime(secs) => ("rebinding_time_sec", json!(secs)),
            DhcpOption::MaxMessageSize(size) => ("max_dhcp_message_size", json!(size)),
            DhcpOption::TimeOffset(secs) => ("utc_time_offset_sec", json!(secs)),
            DhcpOption::ClientId(_) | DhcpOption::Unknown(..) => continue,
        };
        out.insert(key.to_string(), value);
    }
    out
}
