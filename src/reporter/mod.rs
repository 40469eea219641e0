//! Event publishing.
//!
//! A [`Publisher`] hands out one [`EventReporter`] per analyzer. Shipping,
//! queuing and spooling live behind these traits; the pipeline only builds
//! events and passes each one to a reporter exactly once.

mod console_reporter;
mod memory_reporter;

pub use console_reporter::{ConsolePublisher, ConsoleReporter};
pub use memory_reporter::{MemoryPublisher, MemoryReporter};

use crate::domain::ProtocolEvent;
use crate::error::PublishError;

/// Sink for finished events of one analyzer.
///
/// Intentionally minimal: it only handles reporting, not filtering or
/// transformation.
pub trait EventReporter: Send {
    /// Report a finished event. Ownership passes to the reporter.
    fn report(&self, event: ProtocolEvent);

    /// Called when the capture session starts.
    fn on_start(&self, _source: &str) {}

    /// Called when the capture session stops.
    fn on_stop(&self) {}
}

/// Factory for reporters.
pub trait Publisher: Send + Sync {
    /// Create the reporter used by the analyzer named `name`.
    fn create_reporter(&self, name: &str) -> Result<Box<dyn EventReporter>, PublishError>;
}
