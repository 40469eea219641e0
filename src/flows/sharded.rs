//! Flow table shared by several dispatch threads.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::tracker::{FlowHandle, FlowRecord, FlowTracker};
use crate::domain::{FlowKey, IpPortTuple};

/// A flow table split into shards by key hash, one lock per shard.
///
/// All packets of one flow land in the same shard, so creation, lookup and
/// update of a key are serialized while unrelated flows proceed in parallel.
#[derive(Debug)]
pub struct ShardedFlowTracker {
    shards: Vec<Mutex<FlowTracker>>,
}

impl ShardedFlowTracker {
    pub fn new(shard_count: usize, timeout: Duration) -> Self {
        let shard_count = shard_count.max(1);
        let shards = (0..shard_count)
            .map(|i| {
                Mutex::new(FlowTracker::with_id_space(
                    timeout,
                    i as u64,
                    shard_count as u64,
                ))
            })
            .collect();
        Self { shards }
    }

    /// Record a packet and run `f` on its flow while the shard is locked.
    pub fn touch_with<R>(
        &self,
        tuple: &IpPortTuple,
        ts: DateTime<Utc>,
        bytes: u64,
        f: impl FnOnce(&mut FlowHandle<'_>) -> R,
    ) -> R {
        let (key, _) = FlowKey::normalize(tuple);
        let mut shard = self.lock(self.shard_index(&key));
        let mut handle = shard.touch(tuple, ts, bytes);
        f(&mut handle)
    }

    /// Sweep every shard.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<FlowRecord> {
        (0..self.shards.len())
            .flat_map(|i| self.lock(i).sweep(now))
            .collect()
    }

    pub fn drain(&self) -> Vec<FlowRecord> {
        (0..self.shards.len())
            .flat_map(|i| self.lock(i).drain())
            .collect()
    }

    /// Copy of the record for `key`, if tracked.
    pub fn get(&self, key: &FlowKey) -> Option<FlowRecord> {
        self.lock(self.shard_index(key)).get(key).cloned()
    }

    pub fn len(&self) -> usize {
        (0..self.shards.len()).map(|i| self.lock(i).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard_index(&self, key: &FlowKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    fn lock(&self, index: usize) -> MutexGuard<'_, FlowTracker> {
        // A panic inside `touch_with` leaves the table itself consistent.
        self.shards[index]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
