//! Driver task for one watch session.
//!
//! The session listens on the event stream first. If the stream cannot be
//! opened, errors, or is closed by the server, it falls back to polling the
//! resource once per interval. A deadline bounds both phases; it is polled
//! first in every `select!` so it wins a tie with a poll tick.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, Sleep};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::handle::{Outcome, SessionCell};
use crate::analysis::{AnalysisResult, Baseline};
use crate::backend::{AnalysisBackend, EventStream, StatusUpdate};
use crate::errors::{BackendError, Failure};
use crate::job::AnalysisRequest;

/// Message used when the engine reports failure without saying why.
const DEFAULT_FAILURE_MESSAGE: &str = "analysis failed";

enum Step {
    Continue,
    Done,
}

/// Ends a session that is still live when its driver goes away, so a panicking
/// driver still delivers an outcome and frees the key.
struct Unfinished {
    cell: Arc<SessionCell>,
    started: Instant,
}

impl Drop for Unfinished {
    fn drop(&mut self) {
        let waited = self.started.elapsed();
        if self.cell.finish(Outcome::TimedOut { waited }) {
            error!(
                session_id = %self.cell.id(),
                key = %self.cell.key(),
                "Watch session stopped without an outcome"
            );
        }
    }
}

pub(crate) struct SessionDriver {
    pub(crate) cell: Arc<SessionCell>,
    pub(crate) backend: Arc<dyn AnalysisBackend>,
    pub(crate) request: AnalysisRequest,
    pub(crate) baseline: Baseline,
    pub(crate) poll_interval: Duration,
    pub(crate) max_wait: Duration,
    pub(crate) deadline: Instant,
}

impl SessionDriver {
    pub(crate) async fn run(self) {
        let span = info_span!(
            "watch_session",
            session_id = %self.cell.id(),
            subject = %self.request.subject,
            kind = %self.request.kind,
        );
        let _unfinished = Unfinished {
            cell: self.cell.clone(),
            started: self.deadline.checked_sub(self.max_wait).unwrap_or(self.deadline),
        };
        self.drive().instrument(span).await
    }

    async fn drive(self) {
        let deadline = tokio::time::sleep_until(self.deadline);
        tokio::pin!(deadline);

        let opened = tokio::select! {
            biased;
            _ = &mut deadline => {
                self.time_out();
                return;
            }
            opened = self.backend.open_event_stream(&self.request) => opened,
        };

        match opened {
            Ok(events) => {
                if let Step::Done = self.listen(events, deadline.as_mut()).await {
                    return;
                }
            }
            Err(e) => warn!(error = %e, "Event stream unavailable, falling back to polling"),
        }

        if !self.cell.is_live() {
            return;
        }
        self.poll(deadline.as_mut()).await;
    }

    /// Consume stream events until a terminal event, the deadline, or a transport problem.
    /// Returns `Continue` when the caller should fall back to polling.
    async fn listen(
        &self,
        mut events: EventStream,
        mut deadline: std::pin::Pin<&mut Sleep>,
    ) -> Step {
        loop {
            let next = tokio::select! {
                biased;
                _ = &mut deadline => {
                    self.time_out();
                    return Step::Done;
                }
                next = events.next() => next,
            };

            if !self.cell.is_live() {
                return Step::Done;
            }

            match next {
                Some(Ok(update)) => {
                    if let Step::Done = self.on_update(update) {
                        return Step::Done;
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Event stream degraded, falling back to polling");
                    return Step::Continue;
                }
                None => {
                    warn!(error = %BackendError::StreamClosed, "Event stream degraded, falling back to polling");
                    return Step::Continue;
                }
            }
        }
    }

    fn on_update(&self, update: StatusUpdate) -> Step {
        let kind = self.request.kind;

        if update.is_completed() {
            let result = update
                .result
                .as_ref()
                .and_then(|payload| AnalysisResult::from_payload(kind, payload));
            return match result {
                Some(result) => {
                    info!("Analysis completed");
                    self.cell.finish(Outcome::Completed(result));
                    Step::Done
                }
                None => {
                    debug!("Completion event carries no {} result, treating as progress", kind);
                    self.cell.set_progress(&update.status);
                    Step::Continue
                }
            };
        }

        if update.is_error() {
            let message = update
                .message
                .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
            info!(error = %message, "Analysis failed");
            self.cell
                .finish(Outcome::Failed(Failure::AnalysisFailed(message)));
            return Step::Done;
        }

        debug!(status = %update.status, "Progress");
        self.cell.set_progress(&update.status);
        Step::Continue
    }

    async fn poll(&self, mut deadline: std::pin::Pin<&mut Sleep>) {
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.poll_interval,
            self.poll_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut deadline => {
                    self.time_out();
                    return;
                }
                _ = ticker.tick() => {}
            }

            if !self.cell.is_live() {
                return;
            }

            let fetched = tokio::select! {
                biased;
                _ = &mut deadline => {
                    self.time_out();
                    return;
                }
                fetched = self.backend.fetch_current_state(&self.request.subject) => fetched,
            };

            if !self.cell.is_live() {
                return;
            }

            match fetched {
                Ok(snapshot) => {
                    match self.baseline.detect_new_result(&snapshot, self.request.kind) {
                        Some(result) => {
                            info!("New analysis result found by polling");
                            self.cell.finish(Outcome::Completed(result));
                            return;
                        }
                        None => debug!("No new result yet"),
                    }
                }
                Err(e) => warn!(error = %e, "Poll failed, retrying at next interval"),
            }
        }
    }

    fn time_out(&self) {
        if self.cell.finish(Outcome::TimedOut {
            waited: self.max_wait,
        }) {
            info!(waited_secs = self.max_wait.as_secs(), "Analysis timed out");
        }
    }
}
