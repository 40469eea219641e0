//! Structured events produced by the analyzers and the flow tracker.

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use super::packet::{IpFamily, IpPortTuple, Transport};
use crate::community_id;

/// Outcome of decoding the packet that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "Error")]
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Error => "Error",
        }
    }
}

/// Which wire endpoint plays the client role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The packet was sent by the client (requests).
    ClientIsSource,
    /// The packet was sent by the server (replies).
    ClientIsDestination,
}

/// One side of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packets: Option<u64>,
}

impl Endpoint {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            ip,
            port,
            bytes: None,
            packets: None,
        }
    }
}

/// A finished, protocol-aware event.
///
/// Built once by an analyzer (or the flow tracker) and then handed by value
/// to a reporter.
#[derive(Debug, Clone)]
pub struct ProtocolEvent {
    /// Event type, e.g. `dhcpv4`, `icmp` or `flow`.
    pub kind: String,
    pub status: Status,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub source: Endpoint,
    pub destination: Endpoint,
    pub role: Role,
    pub family: IpFamily,
    pub transport: Transport,
    /// Application protocol (`network.protocol`), if any.
    pub protocol: Option<String>,
    pub network_bytes: u64,
    pub network_packets: Option<u64>,
    pub community_id: String,
    pub error_message: Option<String>,
    /// Protocol-specific fields, nested under `kind`.
    pub fields: Map<String, Value>,
}

impl ProtocolEvent {
    /// Start an event for a packet seen with `tuple` at `start`.
    ///
    /// The community ID is derived from the tuple, so both directions of a
    /// flow carry the same value.
    pub fn new(kind: &str, start: DateTime<Utc>, tuple: &IpPortTuple, seed: u16) -> Self {
        Self {
            kind: kind.to_string(),
            status: Status::Ok,
            start,
            end: None,
            source: Endpoint::new(tuple.src_ip, tuple.src_port),
            destination: Endpoint::new(tuple.dst_ip, tuple.dst_port),
            role: Role::ClientIsSource,
            family: tuple.family(),
            transport: tuple.transport,
            protocol: None,
            network_bytes: 0,
            network_packets: None,
            community_id: community_id::compute(tuple, seed),
            error_message: None,
            fields: Map::new(),
        }
    }

    pub fn with_protocol(mut self, protocol: &str) -> Self {
        self.protocol = Some(protocol.to_string());
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Bytes sent by the source; also counted as `network.bytes`.
    pub fn with_source_bytes(mut self, bytes: u64) -> Self {
        self.source.bytes = Some(bytes);
        self.network_bytes = bytes;
        self
    }

    pub fn with_fields(mut self, fields: Map<String, Value>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.status = Status::Error;
        self.error_message = Some(message.into());
        self
    }

    pub fn client(&self) -> &Endpoint {
        match self.role {
            Role::ClientIsSource => &self.source,
            Role::ClientIsDestination => &self.destination,
        }
    }

    pub fn server(&self) -> &Endpoint {
        match self.role {
            Role::ClientIsSource => &self.destination,
            Role::ClientIsDestination => &self.source,
        }
    }

    /// All endpoint addresses, deduplicated in source/destination order.
    pub fn related_ips(&self) -> Vec<IpAddr> {
        let mut ips = vec![self.source.ip];
        if self.destination.ip != self.source.ip {
            ips.push(self.destination.ip);
        }
        ips
    }

    /// Render the event as a JSON document.
    pub fn to_json(&self) -> Value {
        // Every key is a string, so conversion cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn document(&self) -> Document<'_> {
        let duration = self
            .end
            .map(|end| (end - self.start).num_nanoseconds().unwrap_or(i64::MAX));
        let mut nested = BTreeMap::new();
        if !self.fields.is_empty() {
            nested.insert(self.kind.as_str(), &self.fields);
        }

        Document {
            timestamp: format_ts(&self.start),
            kind: &self.kind,
            status: self.status,
            source: &self.source,
            destination: &self.destination,
            client: self.client(),
            server: self.server(),
            event: EventSection {
                category: ["network_traffic", "network"],
                kind_of: ["connection", "protocol"],
                dataset: &self.kind,
                kind: "event",
                start: format_ts(&self.start),
                end: self.end.as_ref().map(format_ts),
                duration,
            },
            network: NetworkSection {
                family: self.family,
                direction: "unknown",
                transport: self.transport,
                protocol: self.protocol.as_deref(),
                bytes: self.network_bytes,
                packets: self.network_packets,
                community_id: &self.community_id,
            },
            related: Related {
                ip: self.related_ips(),
            },
            error: self
                .error_message
                .as_deref()
                .map(|message| ErrorSection { message }),
            nested,
        }
    }
}

impl Serialize for ProtocolEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.document().serialize(serializer)
    }
}

/// Wire layout of a [`ProtocolEvent`].
#[derive(Serialize)]
struct Document<'a> {
    #[serde(rename = "@timestamp")]
    timestamp: String,
    #[serde(rename = "type")]
    kind: &'a str,
    status: Status,
    source: &'a Endpoint,
    destination: &'a Endpoint,
    client: &'a Endpoint,
    server: &'a Endpoint,
    event: EventSection<'a>,
    network: NetworkSection<'a>,
    related: Related,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorSection<'a>>,
    /// Protocol fields, keyed by event type.
    #[serde(flatten)]
    nested: BTreeMap<&'a str, &'a Map<String, Value>>,
}

#[derive(Serialize)]
struct EventSection<'a> {
    category: [&'static str; 2],
    #[serde(rename = "type")]
    kind_of: [&'static str; 2],
    dataset: &'a str,
    kind: &'static str,
    start: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<i64>,
}

#[derive(Serialize)]
struct NetworkSection<'a> {
    #[serde(rename = "type")]
    family: IpFamily,
    direction: &'static str,
    transport: Transport,
    #[serde(skip_serializing_if = "Option::is_none")]
    protocol: Option<&'a str>,
    bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    packets: Option<u64>,
    community_id: &'a str,
}

#[derive(Serialize)]
struct Related {
    ip: Vec<IpAddr>,
}

#[derive(Serialize)]
struct ErrorSection<'a> {
    message: &'a str,
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
