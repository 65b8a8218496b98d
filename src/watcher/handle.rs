//! Caller-facing handle and the shared state cell behind it.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{WatcherInner, lock};
use crate::analysis::AnalysisResult;
use crate::errors::{Failure, WatchError};
use crate::job::{AnalysisJob, JobKey, JobStatus};

/// The single terminal notification of a watch.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(AnalysisResult),
    Failed(Failure),
    /// The deadline passed without a terminal signal. Not an error: the job may
    /// still finish server-side.
    TimedOut { waited: Duration },
}

impl Outcome {
    /// Job status this outcome moves the job to.
    pub fn status(&self) -> JobStatus {
        match self {
            Outcome::Completed(_) => JobStatus::Completed,
            Outcome::Failed(_) => JobStatus::Failed,
            Outcome::TimedOut { .. } => JobStatus::TimedOut,
        }
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        match self {
            Outcome::Completed(result) => Some(result),
            _ => None,
        }
    }

    /// What the user should do next, if anything.
    pub fn advice(&self) -> Option<&'static str> {
        match self {
            Outcome::Completed(_) => None,
            Outcome::Failed(Failure::TriggerFailed(_)) => {
                Some("The analysis could not be started. Check the API connection and try again.")
            }
            Outcome::Failed(Failure::AnalysisFailed(_)) => {
                Some("The analysis engine reported an error. Try running the analysis again.")
            }
            Outcome::TimedOut { .. } => Some(
                "Analysis is taking longer than expected. It may still finish; refresh later to see the result.",
            ),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed(result) => write!(f, "{} completed", result.kind().label()),
            Outcome::Failed(failure) => write!(f, "{}", failure),
            Outcome::TimedOut { waited } => {
                write!(f, "No result after {}s", waited.as_secs())
            }
        }
    }
}

type Callback = Box<dyn FnOnce(Outcome) + Send + 'static>;

/// Published to `wait()`ers.
#[derive(Debug, Clone)]
pub(crate) enum WatchState {
    Pending,
    Terminal(Outcome),
    Cancelled,
}

struct SessionState {
    job: AnalysisJob,
    /// False once terminal or cancelled. Every action checks it under the lock.
    live: bool,
    cancelled: bool,
    outcome: Option<Outcome>,
    callback: Option<Callback>,
    callback_registered: bool,
    task: Option<JoinHandle<()>>,
}

/// State shared between the watcher registry, the driver task and handles.
pub(crate) struct SessionCell {
    id: Uuid,
    key: JobKey,
    state: Mutex<SessionState>,
    published: watch::Sender<WatchState>,
    watcher: Weak<WatcherInner>,
}

impl SessionCell {
    pub(crate) fn new(key: JobKey, watcher: Weak<WatcherInner>) -> Self {
        let (published, _) = watch::channel(WatchState::Pending);
        Self {
            id: Uuid::new_v4(),
            state: Mutex::new(SessionState {
                job: AnalysisJob::new(key.subject.clone(), key.kind),
                live: true,
                cancelled: false,
                outcome: None,
                callback: None,
                callback_registered: false,
                task: None,
            }),
            key,
            published,
            watcher,
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        lock(&self.state)
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn key(&self) -> &JobKey {
        &self.key
    }

    pub(crate) fn is_live(&self) -> bool {
        self.state().live
    }

    pub(crate) fn mark_requested(&self) -> bool {
        let mut state = self.state();
        state.live && state.job.transition(JobStatus::Requested)
    }

    /// Trigger acknowledged. False if the watch was cancelled meanwhile.
    pub(crate) fn mark_in_progress(&self) -> bool {
        let mut state = self.state();
        state.live && state.job.transition(JobStatus::InProgress)
    }

    pub(crate) fn set_progress(&self, label: &str) {
        let mut state = self.state();
        if state.live && state.job.status == JobStatus::InProgress {
            state.job.progress = Some(label.to_string());
        }
    }

    /// Hand the driver task to the cell so cancellation can abort it.
    pub(crate) fn attach_task(&self, task: JoinHandle<()>) {
        let mut state = self.state();
        if state.live {
            state.task = Some(task);
        } else {
            // Already terminal or cancelled before the task was attached.
            task.abort();
        }
    }

    /// Perform the terminal transition. Returns false if another path got there first.
    pub(crate) fn finish(&self, outcome: Outcome) -> bool {
        let callback = {
            let mut state = self.state();
            if !state.live || !state.job.transition(outcome.status()) {
                return false;
            }
            match &outcome {
                Outcome::Completed(result) => state.job.result = Some(result.clone()),
                Outcome::Failed(failure) => state.job.error = Some(failure.message().to_string()),
                Outcome::TimedOut { .. } => {}
            }
            state.live = false;
            state.outcome = Some(outcome.clone());
            // The caller is the driver task itself (or start), so detach instead of aborting.
            state.task = None;
            state.callback.take()
        };

        self.release(outcome.result());
        self.published
            .send_replace(WatchState::Terminal(outcome.clone()));
        if let Some(callback) = callback {
            callback(outcome);
        }
        true
    }

    /// Stop the watch without a notification. Returns false if it was no longer live.
    pub(crate) fn cancel(&self) -> bool {
        let task = {
            let mut state = self.state();
            if !state.live {
                return false;
            }
            state.live = false;
            state.cancelled = true;
            state.job.transition(JobStatus::Idle);
            state.callback = None;
            state.task.take()
        };

        self.release(None);
        if let Some(task) = task {
            task.abort();
        }
        self.published.send_replace(WatchState::Cancelled);
        true
    }

    /// Free the key in the registry and record a completed result as the new baseline.
    pub(crate) fn release(&self, completed: Option<&AnalysisResult>) {
        if let Some(watcher) = self.watcher.upgrade() {
            watcher.release(self, completed);
        }
    }

    fn on_terminal(&self, callback: Callback) -> Result<(), WatchError> {
        let outcome = {
            let mut state = self.state();
            if state.callback_registered {
                return Err(WatchError::CallbackAlreadyRegistered);
            }
            state.callback_registered = true;
            if state.cancelled {
                return Ok(());
            }
            match &state.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    state.callback = Some(callback);
                    return Ok(());
                }
            }
        };
        callback(outcome);
        Ok(())
    }
}

/// Handle to one watch, returned by `AsyncJobWatcher::start`.
#[derive(Clone)]
pub struct WatchHandle {
    cell: Arc<SessionCell>,
}

impl WatchHandle {
    pub(crate) fn new(cell: Arc<SessionCell>) -> Self {
        Self { cell }
    }

    pub(crate) fn cell(&self) -> &Arc<SessionCell> {
        &self.cell
    }

    /// Session id, as it appears in log spans.
    pub fn id(&self) -> Uuid {
        self.cell.id()
    }

    pub fn key(&self) -> &JobKey {
        self.cell.key()
    }

    /// Snapshot of the job.
    pub fn job(&self) -> AnalysisJob {
        self.cell.state().job.clone()
    }

    pub fn status(&self) -> JobStatus {
        self.cell.state().job.status
    }

    /// Terminal outcome, once there is one.
    pub fn outcome(&self) -> Option<Outcome> {
        self.cell.state().outcome.clone()
    }

    /// True until the watch reaches a terminal state or is cancelled.
    pub fn is_active(&self) -> bool {
        self.cell.is_live()
    }

    /// Register the terminal callback. Runs immediately if the outcome is already known,
    /// never if the watch is cancelled.
    pub fn on_terminal<F>(&self, callback: F) -> Result<(), WatchError>
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.cell.on_terminal(Box::new(callback))
    }

    /// Wait for the terminal outcome. `None` if the watch is cancelled.
    pub async fn wait(&self) -> Option<Outcome> {
        let mut rx = self.cell.published.subscribe();
        let state = rx
            .wait_for(|state| !matches!(state, WatchState::Pending))
            .await
            .ok()?;
        match &*state {
            WatchState::Terminal(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }

    /// Idempotent. Returns whether this call cancelled a live watch.
    pub fn cancel(&self) -> bool {
        self.cell.cancel()
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("id", &self.id())
            .field("key", self.key())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::RepositorySummary;
    use crate::job::{AnalysisKind, SubjectId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn detached_handle() -> WatchHandle {
        let key = JobKey::new(SubjectId::repository("1"), AnalysisKind::RepositoryAnalysis);
        let cell = Arc::new(SessionCell::new(key, Weak::new()));
        assert!(cell.mark_requested());
        assert!(cell.mark_in_progress());
        WatchHandle::new(cell)
    }

    fn completed() -> Outcome {
        Outcome::Completed(AnalysisResult::Repository(RepositorySummary {
            summary: "done".into(),
        }))
    }

    #[test]
    fn test_only_first_terminal_transition_wins() {
        let handle = detached_handle();
        assert!(handle.cell().finish(completed()));
        assert!(!handle.cell().finish(Outcome::TimedOut {
            waited: Duration::from_secs(1)
        }));
        assert_eq!(handle.status(), JobStatus::Completed);
        assert_eq!(handle.outcome(), Some(completed()));
        assert!(!handle.cancel());
    }

    #[test]
    fn test_failure_records_error_message() {
        let handle = detached_handle();
        handle
            .cell()
            .finish(Outcome::Failed(Failure::AnalysisFailed("boom".into())));
        let job = handle.job();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(job.result.is_none());
    }

    #[test]
    fn test_callback_fires_once_and_second_registration_fails() {
        let handle = detached_handle();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        handle
            .on_terminal(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(
            handle.on_terminal(|_| {}),
            Err(WatchError::CallbackAlreadyRegistered)
        );

        handle.cell().finish(completed());
        handle.cell().finish(completed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_after_terminal_runs_immediately() {
        let handle = detached_handle();
        handle.cell().finish(completed());
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        handle
            .on_terminal(move |outcome| *slot.lock().unwrap() = Some(outcome))
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(completed()));
    }

    #[test]
    fn test_cancel_drops_callback_and_resets_to_idle() {
        let handle = detached_handle();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        handle
            .on_terminal(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(!handle.cell().finish(completed()));
        assert_eq!(handle.status(), JobStatus::Idle);
        assert!(!handle.is_active());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_registered_after_cancel_is_never_invoked() {
        let handle = detached_handle();
        handle.cancel();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        handle
            .on_terminal(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wait_returns_outcome_or_none() {
        let handle = detached_handle();
        handle.cell().finish(completed());
        assert_eq!(handle.wait().await, Some(completed()));

        let cancelled = detached_handle();
        cancelled.cancel();
        assert_eq!(cancelled.wait().await, None);
    }

    #[test]
    fn test_outcome_advice() {
        assert!(completed().advice().is_none());
        let timed_out = Outcome::TimedOut {
            waited: Duration::from_secs(120),
        };
        assert!(timed_out.advice().unwrap().contains("longer than expected"));
        assert_eq!(timed_out.to_string(), "No result after 120s");
        assert!(
            Outcome::Failed(Failure::TriggerFailed("HTTP 500".into()))
                .advice()
                .is_some()
        );
    }
}
