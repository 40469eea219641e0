//! Single-owner flow table.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Map};
use tracing::trace;

use crate::domain::{Direction, FlowKey, IpPortTuple, ProtocolEvent};

/// Aggregate state of one bidirectional flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRecord {
    pub id: u64,
    pub key: FlowKey,
    /// Direction of the first packet seen, i.e. the side that opened the flow.
    pub initiator: Direction,
    /// Wire tuple of the first packet. Unlike `key`, it keeps ICMP type and
    /// code, so the flow hashes to the same community ID as its packets.
    pub origin: IpPortTuple,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub bytes_a_to_b: u64,
    pub bytes_b_to_a: u64,
    pub packets_a_to_b: u64,
    pub packets_b_to_a: u64,
    closing: bool,
}

impl FlowRecord {
    fn new(
        id: u64,
        key: FlowKey,
        origin: IpPortTuple,
        initiator: Direction,
        ts: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            key,
            initiator,
            origin,
            created_at: ts,
            last_seen_at: ts,
            bytes_a_to_b: 0,
            bytes_b_to_a: 0,
            packets_a_to_b: 0,
            packets_b_to_a: 0,
            closing: false,
        }
    }

    fn update(&mut self, direction: Direction, ts: DateTime<Utc>, bytes: u64) {
        if ts > self.last_seen_at {
            self.last_seen_at = ts;
        }
        match direction {
            Direction::AToB => {
                self.bytes_a_to_b += bytes;
                self.packets_a_to_b += 1;
            }
            Direction::BToA => {
                self.bytes_b_to_a += bytes;
                self.packets_b_to_a += 1;
            }
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_a_to_b + self.bytes_b_to_a
    }

    pub fn total_packets(&self) -> u64 {
        self.packets_a_to_b + self.packets_b_to_a
    }

    /// True once a protocol teardown has been observed.
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Build the flow-summary event, oriented from the initiator.
    pub fn to_event(&self, seed: u16, is_final: bool) -> ProtocolEvent {
        let (src_bytes, src_packets, dst_bytes, dst_packets) = match self.initiator {
            Direction::AToB => (
                self.bytes_a_to_b,
                self.packets_a_to_b,
                self.bytes_b_to_a,
                self.packets_b_to_a,
            ),
            Direction::BToA => (
                self.bytes_b_to_a,
                self.packets_b_to_a,
                self.bytes_a_to_b,
                self.packets_a_to_b,
            ),
        };

        let mut fields = Map::new();
        fields.insert("id".to_string(), json!(format!("{:016x}", self.id)));
        fields.insert("final".to_string(), json!(is_final));

        let mut event =
            ProtocolEvent::new("flow", self.created_at, &self.origin, seed).with_fields(fields);
        event.end = Some(self.last_seen_at);
        event.source.bytes = Some(src_bytes);
        event.source.packets = Some(src_packets);
        event.destination.bytes = Some(dst_bytes);
        event.destination.packets = Some(dst_packets);
        event.network_bytes = self.total_bytes();
        event.network_packets = Some(self.total_packets());
        event
    }
}

/// Borrowed access to a flow for the duration of one analyzer call.
///
/// Analyzers never own flow records; the handle cannot outlive the packet
/// that produced it.
#[derive(Debug)]
pub struct FlowHandle<'a> {
    record: &'a mut FlowRecord,
    direction: Direction,
    is_new: bool,
}

impl<'a> FlowHandle<'a> {
    pub fn id(&self) -> u64 {
        self.record.id
    }

    pub fn key(&self) -> &FlowKey {
        &self.record.key
    }

    /// Direction of the current packet.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// True if the current packet created the flow.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn record(&self) -> &FlowRecord {
        self.record
    }

    /// Request eviction at the next sweep (protocol teardown seen).
    pub fn mark_closing(&mut self) {
        self.record.closing = true;
    }
}

/// Maps normalized 5-tuples to flow records and expires idle ones.
///
/// Mutated only by its owning worker; see [`super::ShardedFlowTracker`] for
/// concurrent dispatch.
#[derive(Debug)]
pub struct FlowTracker {
    timeout: Duration,
    flows: HashMap<FlowKey, FlowRecord>,
    next_id: u64,
    id_stride: u64,
}

impl FlowTracker {
    /// Create a tracker that evicts flows idle for `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self::with_id_space(timeout, 0, 1)
    }

    /// Create a tracker whose flow IDs are `offset + n * stride`, so that
    /// several trackers can hand out disjoint IDs.
    pub fn with_id_space(timeout: Duration, offset: u64, stride: u64) -> Self {
        Self {
            timeout,
            flows: HashMap::new(),
            next_id: offset + 1,
            id_stride: stride.max(1),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record a frame of `bytes` bytes and return a handle to its flow.
    ///
    /// Creates the flow on first sight of its normalized key.
    pub fn touch(&mut self, tuple: &IpPortTuple, ts: DateTime<Utc>, bytes: u64) -> FlowHandle<'_> {
        let (key, direction) = FlowKey::normalize(tuple);
        let mut is_new = false;

        let next_id = &mut self.next_id;
        let stride = self.id_stride;
        let record = self.flows.entry(key).or_insert_with(|| {
            is_new = true;
            let id = *next_id;
            *next_id += stride;
            trace!("New flow {} ({})", id, key);
            FlowRecord::new(id, key, *tuple, direction, ts)
        });
        record.update(direction, ts, bytes);

        FlowHandle {
            record,
            direction,
            is_new,
        }
    }

    /// Remove flows idle for at least the timeout, and flows marked closing.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<FlowRecord> {
        let timeout = self.timeout;
        let expired_keys: Vec<FlowKey> = self
            .flows
            .values()
            .filter(|record| {
                record.closing
                    || (now - record.last_seen_at)
                        .to_std()
                        .map(|idle| idle >= timeout)
                        .unwrap_or(false)
            })
            .map(|record| record.key)
            .collect();

        expired_keys
            .iter()
            .filter_map(|key| self.flows.remove(key))
            .collect()
    }

    /// Remove every flow, e.g. when the session ends.
    pub fn drain(&mut self) -> Vec<FlowRecord> {
        self.flows.drain().map(|(_, record)| record).collect()
    }

    pub fn get(&self, key: &FlowKey) -> Option<&FlowRecord> {
        self.flows.get(key)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}
