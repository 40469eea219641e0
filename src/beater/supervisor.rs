//! Process-level run control.
//!
//! The supervisor owns the session runner and decides when the process
//! ends. Standalone mode ends with the first session outcome. Managed mode
//! keeps going across clean session endings and swaps the session when a
//! new configuration arrives; only a session error ends it.

use std::future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::error_queue::{error_queue, ErrorQueue};
use super::factory::{ProcessorFactory, SourceOpener};
use super::runner::Runner;
use crate::config::Config;
use crate::error::SessionError;
use crate::reporter::Publisher;

/// Requests the supervisor to stop. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        info!("Stop requested");
        self.tx.send_replace(true);
    }
}

pub struct Supervisor {
    config: Config,
    factory: ProcessorFactory,
    errors: ErrorQueue,
    stop: Arc<watch::Sender<bool>>,
}

impl Supervisor {
    /// Check `config` and prepare to run it. No capture source is opened yet.
    pub fn new(config: Config, publisher: Arc<dyn Publisher>) -> Result<Self, SessionError> {
        let (sink, errors) = error_queue(config.max_sessions);
        let factory = ProcessorFactory::new(sink, publisher);
        factory.check_config(&config)?;

        let (stop, _) = watch::channel(false);
        Ok(Self {
            config,
            factory,
            errors,
            stop: Arc::new(stop),
        })
    }

    /// Replace how capture sources are opened.
    pub fn with_source_opener(mut self, opener: SourceOpener) -> Self {
        self.factory = self.factory.with_source_opener(opener);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: Arc::clone(&self.stop),
        }
    }

    pub fn is_managed(&self) -> bool {
        self.config.managed
    }

    /// Run until stopped or until a session outcome ends the process.
    ///
    /// `reloads` delivers new configurations in managed mode; standalone
    /// mode ignores it.
    pub async fn run(self, reloads: Option<mpsc::Receiver<Config>>) -> Result<(), SessionError> {
        if self.config.managed {
            self.run_managed(reloads).await
        } else {
            if reloads.is_some() {
                debug!("Standalone mode, configuration reloads are ignored");
            }
            self.run_static().await
        }
    }

    async fn run_static(mut self) -> Result<(), SessionError> {
        let mut done = self.stop.subscribe();
        let mut runner = self.factory.create(&self.config)?;
        runner.start()?;

        debug!("Waiting for the runner to finish");
        let result = tokio::select! {
            _ = stopped(&mut done) => Ok(()),
            outcome = self.errors.recv() => outcome.unwrap_or(Ok(())),
        };

        stop_runner(runner).await;
        result
    }

    async fn run_managed(
        mut self,
        mut reloads: Option<mpsc::Receiver<Config>>,
    ) -> Result<(), SessionError> {
        let mut done = self.stop.subscribe();
        let mut first = self.factory.create(&self.config)?;
        first.start()?;
        let mut runner = Some(first);

        info!("Running in managed mode");
        let result = loop {
            tokio::select! {
                _ = stopped(&mut done) => break Ok(()),
                outcome = self.errors.recv() => match outcome {
                    Some(Err(e)) => break Err(e),
                    // A session stopped by a reload ends cleanly.
                    Some(Ok(())) => debug!("Session ended without error"),
                    None => break Ok(()),
                },
                Some(config) = next_reload(&mut reloads) => {
                    if let Err(e) = self.factory.check_config(&config) {
                        warn!("Rejecting reloaded configuration: {}", e);
                        continue;
                    }

                    info!("Reloading configuration");
                    // The old session is fully stopped before the new one
                    // opens its source.
                    if let Some(old) = runner.take() {
                        stop_runner(old).await;
                    }
                    let mut next = match self.factory.create(&config) {
                        Ok(next) => next,
                        Err(e) => break Err(e),
                    };
                    if let Err(e) = next.start() {
                        break Err(e);
                    }
                    runner = Some(next);
                    self.config = config;
                }
            }
        };

        if let Some(runner) = runner {
            stop_runner(runner).await;
        }
        if let Err(e) = &result {
            error!("Managed session failed: {}", e);
        }
        result
    }
}

/// Resolves once a stop has been requested.
async fn stopped(done: &mut watch::Receiver<bool>) {
    let _ = done.wait_for(|stopped| *stopped).await;
}

async fn next_reload(reloads: &mut Option<mpsc::Receiver<Config>>) -> Option<Config> {
    match reloads {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

/// Stop `runner` off the async runtime; joining its thread blocks.
async fn stop_runner(runner: Runner) {
    let name = runner.name().to_string();
    let stopped = tokio::task::spawn_blocking(move || {
        let mut runner = runner;
        runner.stop();
    })
    .await;
    if let Err(e) = stopped {
        error!("Stopping session {} failed: {}", name, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureSource, Frame, MemorySource, ReadOutcome};
    use crate::config::CaptureConfig;
    use crate::decoder::frames;
    use crate::domain::LinkType;
    use crate::error::CaptureError;
    use crate::reporter::MemoryPublisher;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn dhcp_frame() -> Frame {
        let payload = crate::protos::dhcpv4::tests::dhcp_request();
        let data = frames::ethernet_ipv4_udp([0, 0, 0, 0], 68, [255, 255, 255, 255], 67, &payload);
        Frame::new(Utc::now(), data)
    }

    fn opener(make: impl Fn() -> MemorySource + Send + Sync + 'static) -> SourceOpener {
        Arc::new(move |_config: &CaptureConfig| Ok(Box::new(make()) as Box<dyn CaptureSource>))
    }

    fn supervisor(config: Config, publisher: &MemoryPublisher, opener: SourceOpener) -> Supervisor {
        Supervisor::new(config, Arc::new(publisher.clone()))
            .unwrap()
            .with_source_opener(opener)
    }

    fn managed() -> Config {
        Config {
            managed: true,
            ..Config::default()
        }
    }

    async fn eventually(condition: impl Fn() -> bool) {
        for _ in 0..1000 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    /// Counts opened and live sources.
    #[derive(Clone, Default)]
    struct Counters {
        opens: Arc<AtomicUsize>,
        live: Arc<AtomicUsize>,
        max_live: Arc<AtomicUsize>,
    }

    struct Tracked {
        inner: MemorySource,
        live: Arc<AtomicUsize>,
    }

    impl CaptureSource for Tracked {
        fn name(&self) -> &str {
            "tracked"
        }

        fn link_type(&self) -> LinkType {
            self.inner.link_type()
        }

        fn next_frame(&mut self) -> Result<ReadOutcome, CaptureError> {
            self.inner.next_frame()
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn tracked_opener(counters: Counters) -> SourceOpener {
        Arc::new(move |_config: &CaptureConfig| {
            counters.opens.fetch_add(1, Ordering::SeqCst);
            let live = counters.live.fetch_add(1, Ordering::SeqCst) + 1;
            counters.max_live.fetch_max(live, Ordering::SeqCst);
            Ok(Box::new(Tracked {
                inner: MemorySource::new(LinkType::Ethernet, vec![]).endless(),
                live: Arc::clone(&counters.live),
            }) as Box<dyn CaptureSource>)
        })
    }

    mod standalone {
        use super::*;

        #[test]
        fn test_rejects_bad_config_up_front() {
            let mut config = Config::default();
            config.protocols.tcp.max_buffer = 0;
            let result = Supervisor::new(config, Arc::new(MemoryPublisher::new()));
            assert!(matches!(result, Err(SessionError::Config(_))));
        }

        #[tokio::test]
        async fn test_clean_end_of_input() {
            let publisher = MemoryPublisher::new();
            let sup = supervisor(
                Config::default(),
                &publisher,
                opener(|| MemorySource::new(LinkType::Ethernet, vec![dhcp_frame()])),
            );
            assert!(!sup.is_managed());

            sup.run(None).await.unwrap();

            assert_eq!(publisher.events_of("dhcpv4").len(), 1);
            let flows = publisher.events_of("flow");
            assert_eq!(flows.len(), 1);
            assert_eq!(flows[0].fields["final"], false);
        }

        #[tokio::test]
        async fn test_first_error_returned() {
            let publisher = MemoryPublisher::new();
            let sup = supervisor(
                Config::default(),
                &publisher,
                opener(|| {
                    MemorySource::new(LinkType::Ethernet, vec![])
                        .with_failure(CaptureError::Read("device vanished".to_string()))
                }),
            );

            let err = sup.run(None).await.unwrap_err();
            assert!(matches!(err, SessionError::Capture(CaptureError::Read(_))));
        }

        #[tokio::test]
        async fn test_stop_request() {
            let publisher = MemoryPublisher::new();
            let sup = supervisor(
                Config::default(),
                &publisher,
                opener(|| MemorySource::new(LinkType::Ethernet, vec![]).endless()),
            );
            let stop = sup.stop_handle();

            let run = tokio::spawn(sup.run(None));
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop.stop();

            let result = tokio::time::timeout(Duration::from_secs(5), run).await.unwrap();
            assert!(result.unwrap().is_ok());
        }
    }

    mod managed {
        use super::*;

        #[tokio::test]
        async fn test_clean_end_is_not_fatal() {
            let publisher = MemoryPublisher::new();
            let sup = supervisor(
                managed(),
                &publisher,
                opener(|| MemorySource::new(LinkType::Ethernet, vec![dhcp_frame()])),
            );
            let stop = sup.stop_handle();

            let run = tokio::spawn(sup.run(None));
            eventually(|| publisher.events_of("flow").len() == 1).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(!run.is_finished());

            stop.stop();
            let result = tokio::time::timeout(Duration::from_secs(5), run).await.unwrap();
            assert!(result.unwrap().is_ok());
        }

        #[tokio::test]
        async fn test_error_is_fatal() {
            let publisher = MemoryPublisher::new();
            let sup = supervisor(
                managed(),
                &publisher,
                opener(|| {
                    MemorySource::new(LinkType::Ethernet, vec![])
                        .with_failure(CaptureError::Read("device vanished".to_string()))
                }),
            );

            let err = sup.run(None).await.unwrap_err();
            assert!(matches!(err, SessionError::Capture(_)));
        }

        #[tokio::test]
        async fn test_reload_swaps_sessions_without_overlap() {
            let publisher = MemoryPublisher::new();
            let counters = Counters::default();
            let sup = supervisor(managed(), &publisher, tracked_opener(counters.clone()));
            let stop = sup.stop_handle();
            let (reload_tx, reload_rx) = mpsc::channel(1);

            let run = tokio::spawn(sup.run(Some(reload_rx)));
            eventually(|| counters.opens.load(Ordering::SeqCst) == 1).await;

            let mut next = managed();
            next.protocols.icmp.enabled = false;
            reload_tx.send(next).await.unwrap();
            eventually(|| counters.opens.load(Ordering::SeqCst) == 2).await;

            stop.stop();
            let result = tokio::time::timeout(Duration::from_secs(5), run).await.unwrap();
            assert!(result.unwrap().is_ok());
            assert_eq!(counters.max_live.load(Ordering::SeqCst), 1);
            assert_eq!(counters.live.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn test_invalid_reload_keeps_current_session() {
            let publisher = MemoryPublisher::new();
            let counters = Counters::default();
            let sup = supervisor(managed(), &publisher, tracked_opener(counters.clone()));
            let stop = sup.stop_handle();
            let (reload_tx, reload_rx) = mpsc::channel(1);

            let run = tokio::spawn(sup.run(Some(reload_rx)));
            eventually(|| counters.opens.load(Ordering::SeqCst) == 1).await;

            let mut bad = managed();
            bad.protocols.dhcpv4.ports.clear();
            reload_tx.send(bad).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;

            assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
            assert_eq!(counters.live.load(Ordering::SeqCst), 1);
            assert!(!run.is_finished());

            stop.stop();
            let result = tokio::time::timeout(Duration::from_secs(5), run).await.unwrap();
            assert!(result.unwrap().is_ok());
        }
    }
}
