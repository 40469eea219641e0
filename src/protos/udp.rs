//! UDP dispatch to datagram protocols, selected by port.

use super::dhcpv4::Dhcpv4Analyzer;
use super::ProtocolAnalyzer;
use crate::domain::{Packet, ProtocolEvent, Transport};
use crate::flows::{FlowHandle, FlowRecord};

pub(crate) const NAME: &str = "udp";

/// Protocols carried in UDP datagrams.
pub enum UdpPlugin {
    Dhcpv4(Dhcpv4Analyzer),
}

impl UdpPlugin {
    fn ports(&self) -> &[u16] {
        match self {
            Self::Dhcpv4(p) => p.ports(),
        }
    }

    fn claims(&self, packet: &Packet<'_>) -> bool {
        let ports = self.ports();
        ports.contains(&packet.tuple.src_port) || ports.contains(&packet.tuple.dst_port)
    }

    fn analyzer(&mut self) -> &mut dyn ProtocolAnalyzer {
        match self {
            Self::Dhcpv4(p) => p,
        }
    }
}

pub struct UdpAnalyzer {
    plugins: Vec<UdpPlugin>,
}

impl UdpAnalyzer {
    pub fn new(plugins: Vec<UdpPlugin>) -> Self {
        Self { plugins }
    }
}

impl ProtocolAnalyzer for UdpAnalyzer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn matches(&self, packet: &Packet<'_>) -> bool {
        packet.tuple.transport == Transport::Udp && self.plugins.iter().any(|p| p.claims(packet))
    }

    fn decode(&mut self, packet: &Packet<'_>, flow: &mut FlowHandle<'_>) -> Option<ProtocolEvent> {
        let plugin = self.plugins.iter_mut().find(|p| p.claims(packet))?;
        plugin.analyzer().decode(packet, flow)
    }

    fn on_flow_expired(&mut self, flow: &FlowRecord) {
        for plugin in &mut self.plugins {
            plugin.analyzer().on_flow_expired(flow);
        }
    }
}
