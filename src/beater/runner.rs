//! Capture session lifecycle.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use super::error_queue::ErrorSink;
use crate::capture::{CaptureSource, ReadOutcome};
use crate::decoder::{DecodeStats, Worker};
use crate::error::{CaptureError, SessionError};
use crate::thread::CaptureThread;

/// Lifecycle of a [`Runner`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Starting,
    /// The worker is consuming frames.
    Running,
    Stopping,
    /// The capture source has been released.
    Stopped,
}

/// A capture source bound to the worker that consumes it.
pub(crate) struct Session {
    source: Box<dyn CaptureSource>,
    worker: Worker,
}

impl Session {
    pub(crate) fn new(source: Box<dyn CaptureSource>, worker: Worker) -> Self {
        Self { source, worker }
    }

    /// Pump frames until end of input, a capture error, or `running` clears.
    fn run(
        self,
        running: &AtomicBool,
        state: &Mutex<RunState>,
    ) -> Result<DecodeStats, CaptureError> {
        let Session { mut source, mut worker } = self;
        let name = source.name().to_string();

        worker.on_start(&name);
        transition(state, &[RunState::Starting], RunState::Running);
        debug!("Session {} consuming frames", name);

        let result = loop {
            if !running.load(Ordering::SeqCst) {
                debug!("Session {} stop requested", name);
                break Ok(());
            }
            match source.next_frame() {
                Ok(ReadOutcome::Frame(frame)) => {
                    // A frame read after stop was requested is not dispatched.
                    if running.load(Ordering::SeqCst) {
                        worker.process(&frame.data, frame.timestamp);
                    }
                }
                Ok(ReadOutcome::Timeout) => worker.tick(),
                Ok(ReadOutcome::Eof) => {
                    info!("End of input on {}", name);
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        };

        transition(state, &[RunState::Running], RunState::Stopping);
        let stats = worker.finish();
        drop(source);
        result.map(|()| stats)
    }
}

/// Runs one capture session on its own thread and reports how it ended to
/// the supervisor's error queue.
pub struct Runner {
    name: String,
    state: Arc<Mutex<RunState>>,
    running: Arc<AtomicBool>,
    session: Option<Session>,
    capture_thread: Option<CaptureThread>,
    errors: ErrorSink,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("pinned", &self.capture_thread.is_some())
            .finish()
    }
}

impl Runner {
    /// `capture_thread`, when set, executes the whole session.
    pub(crate) fn new(
        session: Session,
        capture_thread: Option<CaptureThread>,
        errors: ErrorSink,
    ) -> Self {
        Self {
            name: session.source.name().to_string(),
            state: Arc::new(Mutex::new(RunState::Created)),
            running: Arc::new(AtomicBool::new(false)),
            session: Some(session),
            capture_thread,
            errors,
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RunState {
        current(&self.state)
    }

    /// Cleared when the session should stop.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Start consuming frames. A second call is a no-op.
    pub fn start(&mut self) -> Result<(), SessionError> {
        let Some(session) = self.session.take() else {
            warn!("Session {} already started", self.name);
            return Ok(());
        };

        info!("Starting session {}", self.name);
        transition(&self.state, &[RunState::Created], RunState::Starting);
        self.running.store(true, Ordering::SeqCst);

        let name = self.name.clone();
        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);
        let capture_thread = self.capture_thread.clone();
        let errors = self.errors.clone();

        let spawned = thread::Builder::new()
            .name(format!("session-{}", name))
            .spawn(move || {
                let outcome =
                    run_session(session, capture_thread, Arc::clone(&running), Arc::clone(&state));
                running.store(false, Ordering::SeqCst);
                set(&state, RunState::Stopped);

                match &outcome {
                    Ok(stats) => info!("Session {} stopped after {} frames", name, stats.frames),
                    Err(e) => error!("Session {} failed: {}", name, e),
                }
                errors.report(&name, outcome.map(|_| ()));
            });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                set(&self.state, RunState::Stopped);
                Err(SessionError::Spawn(e))
            }
        }
    }

    /// Stop the session and wait until its capture source is released.
    ///
    /// Idempotent. A runner stopped before it was started never runs.
    pub fn stop(&mut self) {
        if self.state() == RunState::Created {
            self.session = None;
            set(&self.state, RunState::Stopped);
            info!("Session {} stopped before start", self.name);
            return;
        }

        self.running.store(false, Ordering::SeqCst);
        transition(
            &self.state,
            &[RunState::Starting, RunState::Running],
            RunState::Stopping,
        );

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Session {} thread panicked", self.name);
                set(&self.state, RunState::Stopped);
            }
        }
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

fn run_session(
    session: Session,
    capture_thread: Option<CaptureThread>,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<RunState>>,
) -> Result<DecodeStats, SessionError> {
    match capture_thread {
        Some(capture_thread) => {
            let stats = capture_thread.run(move || session.run(&running, &state))??;
            Ok(stats)
        }
        None => {
            let result = panic::catch_unwind(AssertUnwindSafe(|| session.run(&running, &state)))
                .map_err(|_| SessionError::Panicked)?;
            Ok(result?)
        }
    }
}

fn current(state: &Mutex<RunState>) -> RunState {
    match state.lock() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

fn set(state: &Mutex<RunState>, to: RunState) {
    match state.lock() {
        Ok(mut guard) => *guard = to,
        Err(poisoned) => *poisoned.into_inner() = to,
    }
}

/// Move to `to` if the current state is one of `from`.
fn transition(state: &Mutex<RunState>, from: &[RunState], to: RunState) -> bool {
    let mut guard = match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if from.contains(&*guard) {
        debug!("Session state {:?} -> {:?}", *guard, to);
        *guard = to;
        true
    } else {
        false
    }
}
