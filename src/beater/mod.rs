//! Session lifecycle and process run modes.
//!
//! [`ProcessorFactory`] turns a [`Config`](crate::config::Config) into a
//! [`Runner`]; the [`Supervisor`] starts and stops runners and collects
//! their outcomes through a bounded error queue.

mod error_queue;
mod factory;
mod runner;
mod supervisor;

pub use error_queue::{error_queue, ErrorQueue, ErrorSink, SessionOutcome};
pub use factory::{ProcessorFactory, SourceOpener, FLOW_REPORTER};
pub use runner::{RunState, Runner};
pub use supervisor::{StopHandle, Supervisor};
