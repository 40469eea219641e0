//! Console-based event reporter.

use std::io::{self, Write};

use crate::domain::{ProtocolEvent, Status};
use crate::error::PublishError;
use crate::reporter::{EventReporter, Publisher};

/// Reports events to stdout, one JSON document per line.
///
/// The summary format is a short human-readable line instead.
pub struct ConsoleReporter {
    /// Analyzer this reporter belongs to
    name: String,
    /// Print a one-line summary instead of JSON
    summary: bool,
}

impl ConsoleReporter {
    /// Create a new console reporter.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            summary: false,
        }
    }

    /// Enable or disable summary output.
    pub fn with_summary(mut self, summary: bool) -> Self {
        self.summary = summary;
        self
    }

    fn format_event(&self, event: &ProtocolEvent) -> Result<String, serde_json::Error> {
        if !self.summary {
            return serde_json::to_string(event);
        }

        let client = event.client();
        let server = event.server();
        let mut output = format!(
            "[{}] {}:{} -> {}:{} | {} bytes | {}",
            event.kind.to_uppercase(),
            client.ip,
            client.port,
            server.ip,
            server.port,
            event.network_bytes,
            event.community_id
        );

        if let Some(message_type) = event
            .fields
            .get("option")
            .and_then(|o| o.get("message_type"))
            .and_then(|m| m.as_str())
        {
            output.push_str(&format!(" | {}", message_type));
        }

        if event.status == Status::Error {
            let message = event.error_message.as_deref().unwrap_or("unknown error");
            output.push_str(&format!(" | ERROR: {}", message));
        }

        Ok(output)
    }
}

impl EventReporter for ConsoleReporter {
    fn report(&self, event: ProtocolEvent) {
        match self.format_event(&event) {
            Ok(output) => {
                let mut stdout = io::stdout().lock();
                let _ = writeln!(stdout, "{}", output);
            }
            Err(e) => tracing::warn!("Failed to serialize {} event: {}", self.name, e),
        }
    }

    fn on_start(&self, source: &str) {
        tracing::debug!("{} reporter started on {}", self.name, source);
    }

    fn on_stop(&self) {
        tracing::debug!("{} reporter stopped", self.name);
    }
}

/// Publisher creating console reporters.
#[derive(Debug, Default, Clone)]
pub struct ConsolePublisher {
    summary: bool,
}

impl ConsolePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_summary(mut self, summary: bool) -> Self {
        self.summary = summary;
        self
    }
}

impl Publisher for ConsolePublisher {
    fn create_reporter(&self, name: &str) -> Result<Box<dyn EventReporter>, PublishError> {
        Ok(Box::new(ConsoleReporter::new(name).with_summary(self.summary)))
    }
}
