//! AsyncJobWatcher: trigger an analysis job and learn when it completes.
//!
//! A watch runs through three stages:
//!
//! 1. **Trigger**: `start` reserves the `(subject, kind)` key, moves the job to
//!    `requested` and sends the trigger request. A rejected trigger yields a
//!    handle that is already `failed`.
//! 2. **Session**: once acknowledged, a spawned driver task listens on the event
//!    stream, falling back to polling at most once if the stream is lost.
//! 3. **Terminal**: the first of completion, failure or deadline wins. The key is
//!    released, the driver task ends and the handle's callback fires once.
//!
//! Cancelling a handle at any point returns the job to `idle`, aborts the driver
//! task and suppresses every notification.
//!
//! ```text
//! idle -> requested -> in_progress -> completed | failed | timed_out
//!            |              |
//!            +-> failed     +-> (stream lost) in_progress, polling
//! ```

pub mod handle;
mod session;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::analysis::{AnalysisResult, Baseline, ResourceSnapshot};
use crate::backend::AnalysisBackend;
use crate::errors::{Failure, WatchError};
use crate::job::{AnalysisKind, AnalysisRequest, JobKey, SubjectId};

pub use handle::{Outcome, WatchHandle};
use handle::SessionCell;
use session::SessionDriver;

/// Default upper bound on how long a watch waits for a result.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(120);
/// Default interval between polls once the stream is lost.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Shortest poll interval a watcher will use; a zero period cannot drive a ticker.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Timing of every session started by a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherConfig {
    pub max_wait: Duration,
    pub poll_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            max_wait: DEFAULT_MAX_WAIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Recover the guard from a poisoned lock; the protected state stays consistent
/// because every critical section is a handful of field writes.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::error!("watcher lock poisoned, recovering");
        poisoned.into_inner()
    })
}

pub(crate) struct WatcherInner {
    backend: Arc<dyn AnalysisBackend>,
    config: WatcherConfig,
    active: Mutex<HashMap<JobKey, Arc<SessionCell>>>,
    baselines: Mutex<HashMap<JobKey, Baseline>>,
}

impl WatcherInner {
    /// Drop `cell`'s registry entry (if it still owns the key) and record a new baseline.
    pub(crate) fn release(&self, cell: &SessionCell, completed: Option<&AnalysisResult>) {
        {
            let mut active = lock(&self.active);
            let owned = active
                .get(cell.key())
                .is_some_and(|existing| std::ptr::eq(Arc::as_ptr(existing), cell));
            if owned {
                active.remove(cell.key());
            }
        }
        if let Some(result) = completed {
            lock(&self.baselines).insert(cell.key().clone(), Baseline::from_result(result.clone()));
        }
    }

    fn baseline(&self, key: &JobKey) -> Baseline {
        lock(&self.baselines).get(key).cloned().unwrap_or_default()
    }
}

/// Releases a reserved key if `start` is dropped before the trigger resolves.
struct Reservation {
    cell: Option<Arc<SessionCell>>,
}

impl Reservation {
    fn disarm(&mut self) {
        self.cell = None;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if let Some(cell) = self.cell.take() {
            if cell.cancel() {
                warn!(key = %cell.key(), "Watch start abandoned before the trigger resolved");
            }
        }
    }
}

/// Watches analysis jobs. Cheap to clone; clones share sessions.
#[derive(Clone)]
pub struct AsyncJobWatcher {
    inner: Arc<WatcherInner>,
}

impl AsyncJobWatcher {
    pub fn new(backend: Arc<dyn AnalysisBackend>, mut config: WatcherConfig) -> Self {
        if config.poll_interval < MIN_POLL_INTERVAL {
            warn!(
                requested_ms = config.poll_interval.as_millis() as u64,
                "Poll interval too short, using {:?}",
                MIN_POLL_INTERVAL
            );
            config.poll_interval = MIN_POLL_INTERVAL;
        }
        Self {
            inner: Arc::new(WatcherInner {
                backend,
                config,
                active: Mutex::new(HashMap::new()),
                baselines: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn with_backend<B: AnalysisBackend>(backend: B, config: WatcherConfig) -> Self {
        Self::new(Arc::new(backend), config)
    }

    pub fn config(&self) -> WatcherConfig {
        self.inner.config
    }

    /// Trigger `kind` against `subject` and watch it to a terminal outcome.
    pub async fn start(
        &self,
        subject: SubjectId,
        kind: AnalysisKind,
    ) -> Result<WatchHandle, WatchError> {
        self.start_request(AnalysisRequest::new(subject, kind)).await
    }

    /// Like [`start`](Self::start), for requests that carry extra trigger data
    /// such as a release-risk pull request selection.
    pub async fn start_request(&self, request: AnalysisRequest) -> Result<WatchHandle, WatchError> {
        if !request.kind.accepts(&request.subject) {
            return Err(WatchError::UnsupportedSubject {
                kind: request.kind,
                subject: request.subject,
            });
        }

        let key = request.key();
        let cell = {
            let mut active = lock(&self.inner.active);
            if active.contains_key(&key) {
                return Err(WatchError::AlreadyInProgress { key });
            }
            let cell = Arc::new(SessionCell::new(key.clone(), Arc::downgrade(&self.inner)));
            active.insert(key.clone(), cell.clone());
            cell
        };
        let handle = WatchHandle::new(cell.clone());
        let mut reservation = Reservation {
            cell: Some(cell.clone()),
        };

        cell.mark_requested();
        let deadline = Instant::now() + self.inner.config.max_wait;
        info!(session_id = %cell.id(), key = %key, "Triggering analysis");

        let triggered = self.inner.backend.trigger_analysis(&request).await;
        reservation.disarm();

        if let Err(e) = triggered {
            warn!(session_id = %cell.id(), key = %key, error = %e, "Analysis trigger failed");
            cell.finish(Outcome::Failed(Failure::TriggerFailed(e.to_string())));
            return Ok(handle);
        }

        if !cell.mark_in_progress() {
            // Cancelled while the trigger was in flight.
            return Ok(handle);
        }

        let driver = SessionDriver {
            cell: cell.clone(),
            backend: self.inner.backend.clone(),
            baseline: self.inner.baseline(&key),
            request,
            poll_interval: self.inner.config.poll_interval,
            max_wait: self.inner.config.max_wait,
            deadline,
        };
        cell.attach_task(tokio::spawn(driver.run()));

        Ok(handle)
    }

    /// Cancel a watch. Returns false if it was already terminal or cancelled.
    pub fn cancel(&self, handle: &WatchHandle) -> bool {
        handle.cancel()
    }

    /// The live watch for `key`, if any.
    pub fn active(&self, key: &JobKey) -> Option<WatchHandle> {
        lock(&self.inner.active)
            .get(key)
            .cloned()
            .map(WatchHandle::new)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.inner.active).len()
    }

    /// Record the currently known state for `key`, so polling only accepts a newer result.
    pub fn remember(&self, key: JobKey, snapshot: &ResourceSnapshot) {
        let baseline = Baseline::from_snapshot(snapshot, key.kind);
        lock(&self.inner.baselines).insert(key, baseline);
    }
}
