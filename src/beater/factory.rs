//! Builds capture sessions from configuration.

use std::sync::Arc;

use tracing::{debug, info};

use super::error_queue::ErrorSink;
use super::runner::{Runner, Session};
use crate::capture::{self, CaptureSource};
use crate::config::{CaptureConfig, Config};
use crate::decoder::Worker;
use crate::error::{CaptureError, SessionError};
use crate::flows::FlowTracker;
use crate::protos::Protocols;
use crate::reporter::{MemoryPublisher, Publisher};
use crate::thread;

/// Reporter name for flow-summary events.
pub const FLOW_REPORTER: &str = "flow";

/// Opens the capture source of a session.
pub type SourceOpener =
    Arc<dyn Fn(&CaptureConfig) -> Result<Box<dyn CaptureSource>, CaptureError> + Send + Sync>;

/// Creates [`Runner`]s wired to the supervisor's error queue.
///
/// Everything a session needs is built here, so configuration and capture
/// problems surface when the runner is created rather than on the first
/// packet.
pub struct ProcessorFactory {
    errors: ErrorSink,
    publisher: Arc<dyn Publisher>,
    opener: SourceOpener,
}

impl ProcessorFactory {
    pub fn new(errors: ErrorSink, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            errors,
            publisher,
            opener: Arc::new(capture::open),
        }
    }

    /// Replace how capture sources are opened.
    pub fn with_source_opener(mut self, opener: SourceOpener) -> Self {
        self.opener = opener;
        self
    }

    /// Validate `config` and every enabled analyzer without opening a source.
    pub fn check_config(&self, config: &Config) -> Result<(), SessionError> {
        config.validate()?;
        // Analyzer options are checked by building them against a scratch
        // publisher, so the real one never sees these reporters.
        Protocols::build(
            &config.protocols,
            config.community_id_seed,
            &MemoryPublisher::new(),
        )?;
        Ok(())
    }

    /// Build a session for `config`: analyzers, reporters, flow tracker and
    /// the capture source.
    pub fn create(&self, config: &Config) -> Result<Runner, SessionError> {
        config.validate()?;

        let seed = config.community_id_seed;
        let protocols = Protocols::build(&config.protocols, seed, self.publisher.as_ref())?;
        let flow_reporter = if config.flows.enabled {
            Some(self.publisher.create_reporter(FLOW_REPORTER)?)
        } else {
            None
        };

        let capture_thread = if config.capture.pin_thread {
            Some(thread::init()?)
        } else {
            None
        };

        let source = match &capture_thread {
            Some(capture_thread) => {
                let opener = Arc::clone(&self.opener);
                let capture_config = config.capture.clone();
                capture_thread.run(move || opener(&capture_config))??
            }
            None => (self.opener)(&config.capture)?,
        };

        info!(
            "Session on {} ({:?}), events: {:?}{}",
            source.name(),
            source.link_type(),
            protocols.event_types(),
            if flow_reporter.is_some() { " + flow" } else { "" }
        );
        debug!(
            "Flow timeout {:?}, period {:?}",
            config.flows.timeout, config.flows.period
        );

        let worker = Worker::new(
            source.link_type(),
            protocols,
            FlowTracker::new(config.flows.timeout),
            flow_reporter,
            seed,
            config.flows.period,
        );

        Ok(Runner::new(
            Session::new(source, worker),
            capture_thread,
            self.errors.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beater::error_queue::error_queue;
    use crate::capture::MemorySource;
    use crate::domain::LinkType;
    use crate::error::ConfigError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_opener(opened: Arc<AtomicUsize>) -> SourceOpener {
        Arc::new(move |_config: &CaptureConfig| {
            opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MemorySource::new(LinkType::Ethernet, vec![])) as Box<dyn CaptureSource>)
        })
    }

    fn factory(publisher: MemoryPublisher, opened: Arc<AtomicUsize>) -> ProcessorFactory {
        let (sink, _queue) = error_queue(1);
        ProcessorFactory::new(sink, Arc::new(publisher)).with_source_opener(counting_opener(opened))
    }

    mod check {
        use super::*;

        #[test]
        fn test_valid_default_config() {
            let opened = Arc::new(AtomicUsize::new(0));
            let factory = factory(MemoryPublisher::new(), Arc::clone(&opened));
            factory.check_config(&Config::default()).unwrap();
            assert_eq!(opened.load(Ordering::SeqCst), 0);
        }

        #[test]
        fn test_bad_analyzer_option() {
            let factory = factory(MemoryPublisher::new(), Arc::new(AtomicUsize::new(0)));
            let mut config = Config::default();
            config.protocols.tcp.max_buffer = 0;
            let err = factory.check_config(&config).unwrap_err();
            assert!(matches!(err, SessionError::Config(ConfigError::Protocol { .. })));
        }
    }

    mod create {
        use super::*;

        #[test]
        fn test_opens_source_once() {
            let opened = Arc::new(AtomicUsize::new(0));
            let factory = factory(MemoryPublisher::new(), Arc::clone(&opened));
            let runner = factory.create(&Config::default()).unwrap();
            assert_eq!(runner.name(), "memory");
            assert_eq!(opened.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn test_invalid_config_opens_nothing() {
            let opened = Arc::new(AtomicUsize::new(0));
            let factory = factory(MemoryPublisher::new(), Arc::clone(&opened));
            let mut config = Config::default();
            config.protocols.dhcpv4.ports.clear();

            assert!(factory.create(&config).is_err());
            assert_eq!(opened.load(Ordering::SeqCst), 0);
        }

        #[test]
        fn test_flow_reporter_only_when_enabled() {
            let publisher = MemoryPublisher::new().with_rejected(FLOW_REPORTER);
            let factory = factory(publisher, Arc::new(AtomicUsize::new(0)));

            let err = factory.create(&Config::default()).unwrap_err();
            assert!(matches!(err, SessionError::Publish(_)));

            let mut config = Config::default();
            config.flows.enabled = false;
            assert!(factory.create(&config).is_ok());
        }

        #[test]
        fn test_open_failure_surfaces() {
            let (sink, _queue) = error_queue(1);
            let factory = ProcessorFactory::new(sink, Arc::new(MemoryPublisher::new()));
            // Neither a device nor a file is configured.
            let err = factory.create(&Config::default()).unwrap_err();
            assert!(matches!(err, SessionError::Capture(CaptureError::NoSource)));
        }

        #[test]
        fn test_pinned_source_opened_on_capture_thread() {
            let capture = thread::init().unwrap();
            let seen = Arc::new(std::sync::Mutex::new(None));
            let probe = Arc::clone(&seen);
            let (sink, _queue) = error_queue(1);
            let factory = ProcessorFactory::new(sink, Arc::new(MemoryPublisher::new()))
                .with_source_opener(Arc::new(move |_config: &CaptureConfig| {
                    *probe.lock().unwrap() = Some(std::thread::current().id());
                    Ok(Box::new(MemorySource::new(LinkType::Raw, vec![])) as Box<dyn CaptureSource>)
                }));

            let mut config = Config::default();
            config.capture.pin_thread = true;
            factory.create(&config).unwrap();
            assert_eq!(*seen.lock().unwrap(), Some(capture.id()));
        }
    }
}
