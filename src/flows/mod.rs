//! Bidirectional flow tracking.
//!
//! [`FlowTracker`] is owned by a single worker and needs no locking.
//! [`ShardedFlowTracker`] keeps the one-record-per-key guarantee when packets
//! of the same flow may arrive from several dispatch threads.

mod sharded;
mod tracker;

pub use sharded::ShardedFlowTracker;
pub use tracker::{FlowHandle, FlowRecord, FlowTracker};
