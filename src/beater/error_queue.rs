//! Outcome channel from capture sessions to the supervisor.

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};

use crate::error::SessionError;

/// How a session ended: `Ok` on clean end of input or stop.
pub type SessionOutcome = Result<(), SessionError>;

/// Create a queue holding up to `capacity` pending outcomes.
///
/// `capacity` should be the largest number of sessions that can run at
/// once, so that every session can deliver its outcome even after the
/// supervisor has stopped reading.
pub fn error_queue(capacity: usize) -> (ErrorSink, ErrorQueue) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    (ErrorSink { tx }, ErrorQueue { rx, capacity })
}

/// Writing side, one clone per session.
#[derive(Debug, Clone)]
pub struct ErrorSink {
    tx: mpsc::Sender<SessionOutcome>,
}

impl ErrorSink {
    /// Deliver the outcome of session `session`. Never blocks.
    ///
    /// An outcome that cannot be queued is logged instead.
    pub fn report(&self, session: &str, outcome: SessionOutcome) {
        match self.tx.try_send(outcome) {
            Ok(()) => debug!("Session {} outcome queued", session),
            Err(TrySendError::Full(outcome)) => {
                error!(
                    "Error queue full, outcome of session {} not delivered: {:?}",
                    session, outcome
                );
            }
            Err(TrySendError::Closed(Ok(()))) => {
                debug!("Supervisor gone, session {} ended cleanly", session);
            }
            Err(TrySendError::Closed(Err(e))) => {
                warn!("Supervisor gone, late error from session {}: {}", session, e);
            }
        }
    }
}

/// Reading side, owned by the supervisor.
#[derive(Debug)]
pub struct ErrorQueue {
    rx: mpsc::Receiver<SessionOutcome>,
    capacity: usize,
}

impl ErrorQueue {
    /// Next session outcome. `None` once every sink is dropped.
    pub async fn recv(&mut self) -> Option<SessionOutcome> {
        self.rx.recv().await
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
