//! Thread affinity for capture backends.
//!
//! Some native capture libraries only accept calls from the thread that
//! initialized them. A [`CaptureThread`] owns such a thread: work submitted
//! from anywhere else is queued to it and the caller blocks for the result,
//! while work submitted from the capture thread itself runs inline.
//!
//! [`init`] creates the process-wide instance once; components receive a
//! cloned handle instead of reaching for global state.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use tracing::{debug, info};

use crate::error::AffinityError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Pending jobs held by the queue before submitters block.
const QUEUE_DEPTH: usize = 1;

static CAPTURE_THREAD: OnceLock<Result<CaptureThread, AffinityError>> = OnceLock::new();

/// Start the process-wide capture thread, or return the one already running.
///
/// Only the first call spawns a thread; later calls are no-ops returning the
/// same handle (or the same spawn error).
pub fn init() -> Result<CaptureThread, AffinityError> {
    CAPTURE_THREAD
        .get_or_init(|| CaptureThread::spawn("capture"))
        .clone()
}

/// Handle to a dedicated OS thread that executes submitted work in order.
#[derive(Clone)]
pub struct CaptureThread {
    inner: Arc<Inner>,
}

struct Inner {
    id: ThreadId,
    os_tid: Option<i64>,
    jobs: SyncSender<Job>,
}

impl std::fmt::Debug for CaptureThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureThread")
            .field("id", &self.inner.id)
            .field("os_tid", &self.inner.os_tid)
            .finish()
    }
}

impl CaptureThread {
    /// Spawn a new capture thread.
    ///
    /// The thread runs until every handle is dropped. Prefer [`init`] for the
    /// process-wide instance.
    pub fn spawn(name: &str) -> Result<Self, AffinityError> {
        let (jobs, queue) = mpsc::sync_channel::<Job>(QUEUE_DEPTH);
        let (ready_tx, ready_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _ = ready_tx.send(os_thread_id());
                for job in queue {
                    job();
                }
                debug!("Capture thread exiting");
            })
            .map_err(|e| AffinityError::Spawn(e.to_string()))?;

        let os_tid = ready_rx.recv().map_err(|_| AffinityError::ThreadGone)?;
        info!("Capture thread {} started (tid {:?})", name, os_tid);

        Ok(Self {
            inner: Arc::new(Inner {
                id: handle.thread().id(),
                os_tid,
                jobs,
            }),
        })
    }

    pub fn id(&self) -> ThreadId {
        self.inner.id
    }

    /// Kernel thread id, where the platform exposes one.
    pub fn os_tid(&self) -> Option<i64> {
        self.inner.os_tid
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.id
    }

    /// Run `f` on the capture thread and return its result.
    ///
    /// Inline when already on the capture thread, so nested calls cannot
    /// deadlock. Otherwise blocks until the thread has run `f`. A panic in
    /// `f` is caught and reported as [`AffinityError::Panicked`]; the thread
    /// keeps serving.
    pub fn run<F, T>(&self, f: F) -> Result<T, AffinityError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_current() {
            return panic::catch_unwind(AssertUnwindSafe(f)).map_err(|_| AffinityError::Panicked);
        }

        let (result_tx, result_rx) = mpsc::sync_channel(1);
        let job: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(f));
            let _ = result_tx.send(result);
        });

        self.inner
            .jobs
            .send(job)
            .map_err(|_| AffinityError::ThreadGone)?;

        match result_rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(AffinityError::Panicked),
            Err(_) => Err(AffinityError::ThreadGone),
        }
    }
}

#[cfg(target_os = "linux")]
fn os_thread_id() -> Option<i64> {
    // SAFETY: gettid takes no arguments and cannot fail.
    Some(unsafe { libc::syscall(libc::SYS_gettid) } as i64)
}

#[cfg(not(target_os = "linux"))]
fn os_thread_id() -> Option<i64> {
    None
}
