//! Typed error hierarchy for the DevPulse watcher.
//!
//! Three enums cover the three boundaries:
//! - `WatchError`: synchronous rejections from `AsyncJobWatcher::start` and handle registration
//! - `Failure`: terminal failures delivered to the caller inside an `Outcome`
//! - `BackendError`: failures of the DevPulse API calls (trigger, stream, fetch)

use thiserror::Error;

use crate::job::{AnalysisKind, JobKey, SubjectId};

/// Synchronous errors returned by the watcher API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    #[error("Analysis already in progress for {key}")]
    AlreadyInProgress { key: JobKey },

    #[error("{kind} cannot be run against subject {subject}")]
    UnsupportedSubject {
        kind: AnalysisKind,
        subject: SubjectId,
    },

    #[error("A terminal callback is already registered for this watch")]
    CallbackAlreadyRegistered,
}

/// Terminal failure of an analysis job, as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    /// The initiating request did not succeed; no session was created.
    #[error("Failed to start analysis: {0}")]
    TriggerFailed(String),

    /// The analysis engine reported failure on the event stream.
    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),
}

impl Failure {
    pub fn message(&self) -> &str {
        match self {
            Failure::TriggerFailed(msg) | Failure::AnalysisFailed(msg) => msg,
        }
    }
}

/// Errors from the DevPulse API boundary.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },

    #[error("Request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Malformed response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    #[error("Event stream transport error: {0}")]
    Transport(String),

    #[error("Event stream closed by server")]
    StreamClosed,
}

impl BackendError {
    /// HTTP status carried by the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Status { status, .. } => Some(*status),
            BackendError::Request { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_in_progress_names_the_key() {
        let key = JobKey::new(
            SubjectId::pull_request("42", 7),
            AnalysisKind::PullRequestAnalysis,
        );
        let err = WatchError::AlreadyInProgress { key };
        assert!(err.to_string().contains("42:7"));
        assert!(err.to_string().contains("pull_request_analysis"));
    }

    #[test]
    fn unsupported_subject_is_matchable() {
        let err = WatchError::UnsupportedSubject {
            kind: AnalysisKind::PullRequestAnalysis,
            subject: SubjectId::repository("42"),
        };
        match &err {
            WatchError::UnsupportedSubject { kind, subject } => {
                assert_eq!(*kind, AnalysisKind::PullRequestAnalysis);
                assert_eq!(subject, &SubjectId::repository("42"));
            }
            _ => panic!("Expected UnsupportedSubject"),
        }
    }

    #[test]
    fn failure_message_strips_prefix() {
        let err = Failure::AnalysisFailed("boom".to_string());
        assert_eq!(err.message(), "boom");
        assert_eq!(err.to_string(), "Analysis failed: boom");

        let err = Failure::TriggerFailed("HTTP 500".to_string());
        assert_eq!(err.message(), "HTTP 500");
    }

    #[test]
    fn backend_status_error_exposes_code() {
        let err = BackendError::Status {
            endpoint: "/v1/repos/1/analyze".to_string(),
            status: 500,
        };
        assert_eq!(err.status(), Some(500));
        assert!(err.to_string().contains("HTTP 500"));
        assert_eq!(BackendError::StreamClosed.status(), None);
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&WatchError::CallbackAlreadyRegistered);
        assert_std_error(&Failure::TriggerFailed("x".into()));
        assert_std_error(&BackendError::Transport("reset".into()));
    }
}
