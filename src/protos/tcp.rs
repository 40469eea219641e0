//! TCP stream tracking.
//!
//! Keeps a bounded buffer of application bytes per direction and watches
//! for teardown. No TCP-hosted application protocol is decoded, so no
//! events are produced here; flow summaries come from the flow tracker.

use std::collections::HashMap;

use tracing::trace;

use super::ProtocolAnalyzer;
use crate::config::TcpConfig;
use crate::domain::{Direction, Packet, ProtocolEvent, Transport};
use crate::error::ConfigError;
use crate::flows::{FlowHandle, FlowRecord};

pub(crate) const NAME: &str = "tcp";

#[derive(Debug, Default)]
struct Stream {
    fin_a_to_b: bool,
    fin_b_to_a: bool,
    /// Newest application bytes per direction, at most `max_buffer` each.
    /// This is where a TCP-hosted application analyzer would read its
    /// input; none is registered, so only the bound is enforced.
    buffer_a_to_b: Vec<u8>,
    buffer_b_to_a: Vec<u8>,
}

impl Stream {
    fn buffer(&mut self, direction: Direction) -> &mut Vec<u8> {
        match direction {
            Direction::AToB => &mut self.buffer_a_to_b,
            Direction::BToA => &mut self.buffer_b_to_a,
        }
    }
}

pub struct TcpAnalyzer {
    max_buffer: usize,
    streams: HashMap<u64, Stream>,
}

impl TcpAnalyzer {
    pub fn new(config: &TcpConfig) -> Result<Self, ConfigError> {
        if config.max_buffer == 0 {
            return Err(ConfigError::Protocol {
                protocol: NAME,
                message: "max_buffer must be greater than 0".to_string(),
            });
        }
        Ok(Self {
            max_buffer: config.max_buffer,
            streams: HashMap::new(),
        })
    }

    /// Bytes currently buffered for one direction of a flow.
    pub fn buffered(&self, flow_id: u64, direction: Direction) -> usize {
        self.streams
            .get(&flow_id)
            .map(|s| match direction {
                Direction::AToB => s.buffer_a_to_b.len(),
                Direction::BToA => s.buffer_b_to_a.len(),
            })
            .unwrap_or(0)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}

impl ProtocolAnalyzer for TcpAnalyzer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn matches(&self, packet: &Packet<'_>) -> bool {
        packet.tuple.transport == Transport::Tcp
    }

    fn decode(&mut self, packet: &Packet<'_>, flow: &mut FlowHandle<'_>) -> Option<ProtocolEvent> {
        let direction = flow.direction();
        let flags = packet.tcp_flags.unwrap_or_default();
        let stream = self.streams.entry(flow.id()).or_default();

        // A bare SYN on a known flow reuses the 5-tuple for a new connection.
        if flags.syn() && !flags.ack() && !flow.is_new() {
            trace!("Flow {} reopened", flow.id());
            *stream = Stream::default();
        }

        if !packet.payload.is_empty() {
            let buffer = stream.buffer(direction);
            buffer.extend_from_slice(packet.payload);
            // Keep the newest bytes only.
            if buffer.len() > self.max_buffer {
                let excess = buffer.len() - self.max_buffer;
                buffer.drain(..excess);
            }
        }

        if flags.fin() {
            match direction {
                Direction::AToB => stream.fin_a_to_b = true,
                Direction::BToA => stream.fin_b_to_a = true,
            }
        }

        if flags.rst() || (stream.fin_a_to_b && stream.fin_b_to_a) {
            trace!("Teardown seen on flow {}", flow.id());
            flow.mark_closing();
        }

        None
    }

    fn on_flow_expired(&mut self, flow: &FlowRecord) {
        self.streams.remove(&flow.id);
    }
}
