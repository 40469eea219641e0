//! In-memory reporter, for embedding and tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::domain::ProtocolEvent;
use crate::error::PublishError;
use crate::reporter::{EventReporter, Publisher};

/// Publisher collecting every reported event into a shared buffer.
#[derive(Debug, Default, Clone)]
pub struct MemoryPublisher {
    events: Arc<Mutex<Vec<ProtocolEvent>>>,
    rejected: HashSet<String>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse to create a reporter for `name`.
    pub fn with_rejected(mut self, name: &str) -> Self {
        self.rejected.insert(name.to_string());
        self
    }

    /// Snapshot of the events reported so far.
    pub fn events(&self) -> Vec<ProtocolEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events of one type.
    pub fn events_of(&self, kind: &str) -> Vec<ProtocolEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.kind == kind)
            .collect()
    }
}

impl Publisher for MemoryPublisher {
    fn create_reporter(&self, name: &str) -> Result<Box<dyn EventReporter>, PublishError> {
        if self.rejected.contains(name) {
            return Err(PublishError::Create(
                name.to_string(),
                "rejected by publisher".to_string(),
            ));
        }
        Ok(Box::new(MemoryReporter {
            events: Arc::clone(&self.events),
        }))
    }
}

/// Reporter appending to a [`MemoryPublisher`]'s buffer.
pub struct MemoryReporter {
    events: Arc<Mutex<Vec<ProtocolEvent>>>,
}

impl EventReporter for MemoryReporter {
    fn report(&self, event: ProtocolEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IpPortTuple, Transport};
    use chrono::Utc;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_collects_events_from_all_reporters() {
        let publisher = MemoryPublisher::new();
        let tuple = IpPortTuple::new(
            Transport::Icmp,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            8,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            0,
        );

        let icmp = publisher.create_reporter("icmp").unwrap();
        let flow = publisher.create_reporter("flow").unwrap();
        icmp.report(ProtocolEvent::new("icmp", Utc::now(), &tuple, 0));
        flow.report(ProtocolEvent::new("flow", Utc::now(), &tuple, 0));

        assert_eq!(publisher.events().len(), 2);
        assert_eq!(publisher.events_of("icmp").len(), 1);
    }

    #[test]
    fn test_rejected_name() {
        let publisher = MemoryPublisher::new().with_rejected("dhcpv4");
        assert!(publisher.create_reporter("dhcpv4").is_err());
        assert!(publisher.create_reporter("icmp").is_ok());
    }
}
