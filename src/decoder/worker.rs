//! Per-session packet pipeline.

use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{info, trace};

use super::link::decode_frame;
use crate::domain::{LinkType, Packet};
use crate::error::ParseError;
use crate::flows::{FlowRecord, FlowTracker};
use crate::protos::Protocols;
use crate::reporter::EventReporter;

/// Frame counters of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub frames: u64,
    pub decoded: u64,
    /// Packets handed to an analyzer.
    pub dispatched: u64,
    pub truncated: u64,
    pub unsupported: u64,
    pub fragments: u64,
    pub other_errors: u64,
    pub flows_expired: u64,
}

impl DecodeStats {
    fn record_drop(&mut self, error: &ParseError) {
        match error {
            ParseError::TruncatedHeader { .. } | ParseError::PacketTooShort { .. } => {
                self.truncated += 1
            }
            ParseError::Unsupported { .. } => self.unsupported += 1,
            ParseError::Fragment => self.fragments += 1,
            _ => self.other_errors += 1,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.truncated + self.unsupported + self.fragments + self.other_errors
    }
}

/// Binds one capture session to its analyzers and flow table.
///
/// Processing is synchronous, so packets of a flow are decoded, counted and
/// reported in capture order. Idle flows are swept every `period` of capture
/// time, both as frames arrive and from [`Worker::tick`] while the source is
/// quiet.
pub struct Worker {
    link_type: LinkType,
    protocols: Protocols,
    flows: FlowTracker,
    flow_reporter: Option<Box<dyn EventReporter>>,
    seed: u16,
    period: chrono::Duration,
    next_sweep: Option<DateTime<Utc>>,
    /// Capture timestamp of the latest frame and when it was read.
    last_frame: Option<(DateTime<Utc>, Instant)>,
    stats: DecodeStats,
}

impl Worker {
    /// `flow_reporter` receives flow-summary events; `None` disables them.
    pub fn new(
        link_type: LinkType,
        protocols: Protocols,
        flows: FlowTracker,
        flow_reporter: Option<Box<dyn EventReporter>>,
        seed: u16,
        period: std::time::Duration,
    ) -> Self {
        Self {
            link_type,
            protocols,
            flows,
            flow_reporter,
            seed,
            period: chrono::Duration::from_std(period)
                .unwrap_or_else(|_| chrono::Duration::days(1)),
            next_sweep: None,
            last_frame: None,
            stats: DecodeStats::default(),
        }
    }

    pub fn link_type(&self) -> LinkType {
        self.link_type
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    pub fn active_flows(&self) -> usize {
        self.flows.len()
    }

    pub fn on_start(&self, source: &str) {
        self.protocols.on_start(source);
        if let Some(reporter) = &self.flow_reporter {
            reporter.on_start(source);
        }
    }

    /// Decode one frame and dispatch it. Undecodable frames are counted and
    /// dropped.
    pub fn process(&mut self, frame: &[u8], ts: DateTime<Utc>) {
        self.stats.frames += 1;
        self.last_frame = Some((ts, Instant::now()));

        let decoded = match decode_frame(self.link_type, frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                trace!("Dropping frame: {}", e);
                self.stats.record_drop(&e);
                return;
            }
        };
        self.stats.decoded += 1;

        let mut packet = Packet::new(ts, decoded.tuple, decoded.payload);
        if let Some(flags) = decoded.tcp_flags {
            packet = packet.with_tcp_flags(flags);
        }

        let mut flow = self.flows.touch(&packet.tuple, ts, frame.len() as u64);
        if self.protocols.wants(&packet) {
            self.stats.dispatched += 1;
            self.protocols.dispatch(&packet, &mut flow);
        }

        self.maybe_sweep(ts);
    }

    /// Run a due sweep while no frames arrive.
    ///
    /// Capture time is extrapolated from the latest frame by the wall-clock
    /// time elapsed since it was read, so paced replays and live captures
    /// age their flows alike. Does nothing before the first frame.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    fn tick_at(&mut self, at: Instant) {
        let Some((ts, read_at)) = self.last_frame else {
            return;
        };
        let idle = chrono::Duration::from_std(at.saturating_duration_since(read_at))
            .unwrap_or_else(|_| chrono::Duration::zero());
        if let Some(now) = ts.checked_add_signed(idle) {
            self.maybe_sweep(now);
        }
    }

    fn maybe_sweep(&mut self, now: DateTime<Utc>) {
        match self.next_sweep {
            None => self.next_sweep = now.checked_add_signed(self.period),
            Some(due) if now >= due => {
                self.sweep(now);
                self.next_sweep = now.checked_add_signed(self.period);
            }
            Some(_) => {}
        }
    }

    /// Evict idle and closed flows as of `now`.
    pub fn sweep(&mut self, now: DateTime<Utc>) {
        let expired = self.flows.sweep(now);
        self.expire(expired, true);
    }

    fn expire(&mut self, records: Vec<FlowRecord>, is_final: bool) {
        for record in records {
            self.stats.flows_expired += 1;
            self.protocols.on_flow_expired(&record);
            if let Some(reporter) = &self.flow_reporter {
                reporter.report(record.to_event(self.seed, is_final));
            }
        }
    }

    /// End the session: report every remaining flow and stop the reporters.
    ///
    /// Flows cut off here are reported with `final: false`.
    pub fn finish(mut self) -> DecodeStats {
        let remaining = self.flows.drain();
        self.expire(remaining, false);

        self.protocols.on_stop();
        if let Some(reporter) = &self.flow_reporter {
            reporter.on_stop();
        }

        let stats = self.stats;
        info!(
            "Session done: {} frames, {} decoded, {} dispatched, {} dropped \
             ({} truncated, {} unsupported, {} fragments), {} flows",
            stats.frames,
            stats.decoded,
            stats.dispatched,
            stats.dropped(),
            stats.truncated,
            stats.unsupported,
            stats.fragments,
            stats.flows_expired
        );
        stats
    }
}
