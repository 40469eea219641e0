//! Protocol analyzers.
//!
//! Each analyzer consumes the packets of one transport or application
//! protocol and turns them into [`ProtocolEvent`]s. The set of analyzers is
//! closed and resolved once per session from configuration; see
//! [`Protocols::build`].

pub mod dhcpv4;
mod icmp;
mod tcp;
mod udp;

pub use dhcpv4::Dhcpv4Analyzer;
pub use icmp::IcmpAnalyzer;
pub use tcp::TcpAnalyzer;
pub use udp::{UdpAnalyzer, UdpPlugin};

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::ProtocolsConfig;
use crate::domain::{Packet, ProtocolEvent};
use crate::error::SessionError;
use crate::flows::{FlowHandle, FlowRecord};
use crate::reporter::{EventReporter, Publisher};

/// Capability set every analyzer provides.
///
/// `decode` must not fail: malformed input becomes a `status: Error` event
/// or nothing at all.
pub trait ProtocolAnalyzer: Send {
    fn name(&self) -> &'static str;

    /// True if this analyzer wants `packet`.
    fn matches(&self, packet: &Packet<'_>) -> bool;

    /// Decode one packet. The flow handle is only valid for this call.
    fn decode(&mut self, packet: &Packet<'_>, flow: &mut FlowHandle<'_>) -> Option<ProtocolEvent>;

    /// Release any state kept for an evicted flow.
    fn on_flow_expired(&mut self, _flow: &FlowRecord) {}
}

/// The analyzers a session can run.
pub enum Analyzer {
    Icmp(IcmpAnalyzer),
    Tcp(TcpAnalyzer),
    Udp(UdpAnalyzer),
}

impl ProtocolAnalyzer for Analyzer {
    fn name(&self) -> &'static str {
        match self {
            Self::Icmp(a) => a.name(),
            Self::Tcp(a) => a.name(),
            Self::Udp(a) => a.name(),
        }
    }

    fn matches(&self, packet: &Packet<'_>) -> bool {
        match self {
            Self::Icmp(a) => a.matches(packet),
            Self::Tcp(a) => a.matches(packet),
            Self::Udp(a) => a.matches(packet),
        }
    }

    fn decode(&mut self, packet: &Packet<'_>, flow: &mut FlowHandle<'_>) -> Option<ProtocolEvent> {
        match self {
            Self::Icmp(a) => a.decode(packet, flow),
            Self::Tcp(a) => a.decode(packet, flow),
            Self::Udp(a) => a.decode(packet, flow),
        }
    }

    fn on_flow_expired(&mut self, flow: &FlowRecord) {
        match self {
            Self::Icmp(a) => a.on_flow_expired(flow),
            Self::Tcp(a) => a.on_flow_expired(flow),
            Self::Udp(a) => a.on_flow_expired(flow),
        }
    }
}

/// The enabled analyzers of one session, with a reporter per event type.
pub struct Protocols {
    analyzers: Vec<Analyzer>,
    reporters: HashMap<&'static str, Box<dyn EventReporter>>,
}

impl Protocols {
    /// Build every enabled analyzer and its reporter.
    ///
    /// Fails on invalid analyzer options or if the publisher refuses a
    /// reporter, so that a bad configuration surfaces before any packet.
    pub fn build(
        config: &ProtocolsConfig,
        seed: u16,
        publisher: &dyn Publisher,
    ) -> Result<Self, SessionError> {
        let mut analyzers = Vec::new();
        let mut names: Vec<&'static str> = Vec::new();

        if config.icmp.enabled {
            analyzers.push(Analyzer::Icmp(IcmpAnalyzer::new(seed)));
            names.push(icmp::NAME);
        }

        analyzers.push(Analyzer::Tcp(TcpAnalyzer::new(&config.tcp)?));

        let mut plugins = Vec::new();
        if config.dhcpv4.enabled {
            plugins.push(UdpPlugin::Dhcpv4(Dhcpv4Analyzer::new(&config.dhcpv4, seed)?));
            names.push(dhcpv4::NAME);
        }
        if !plugins.is_empty() {
            analyzers.push(Analyzer::Udp(UdpAnalyzer::new(plugins)));
        }

        let mut reporters = HashMap::new();
        for name in names {
            reporters.insert(name, publisher.create_reporter(name)?);
        }

        debug!(
            "Protocols enabled: {:?}",
            analyzers.iter().map(|a| a.name()).collect::<Vec<_>>()
        );

        Ok(Self {
            analyzers,
            reporters,
        })
    }

    /// Names of the event types this registry reports.
    pub fn event_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.reporters.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// True if some analyzer wants `packet`.
    pub fn wants(&self, packet: &Packet<'_>) -> bool {
        self.analyzers.iter().any(|a| a.matches(packet))
    }

    /// Hand `packet` to the first matching analyzer and report its event.
    pub fn dispatch(&mut self, packet: &Packet<'_>, flow: &mut FlowHandle<'_>) {
        let Some(analyzer) = self.analyzers.iter_mut().find(|a| a.matches(packet)) else {
            return;
        };
        if let Some(event) = analyzer.decode(packet, flow) {
            match self.reporters.get(event.kind.as_str()) {
                Some(reporter) => reporter.report(event),
                None => warn!("No reporter for {} events, dropping", event.kind),
            }
        }
    }

    pub fn on_flow_expired(&mut self, flow: &FlowRecord) {
        for analyzer in &mut self.analyzers {
            analyzer.on_flow_expired(flow);
        }
    }

    pub fn on_start(&self, source: &str) {
        for reporter in self.reporters.values() {
            reporter.on_start(source);
        }
    }

    pub fn on_stop(&self) {
        for reporter in self.reporters.values() {
            reporter.on_stop();
        }
    }
}
