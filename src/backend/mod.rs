//! Boundary operations the watcher consumes.
//!
//! The watcher never talks HTTP itself. It drives an [`AnalysisBackend`], which
//! exposes the three calls the DevPulse API offers for asynchronous analyses:
//!
//! | Operation               | Purpose                                         |
//! |-------------------------|-------------------------------------------------|
//! | `trigger_analysis`      | One-shot request that starts the job server-side |
//! | `open_event_stream`     | Push channel of status updates for the job      |
//! | `fetch_current_state`   | Plain read of the resource, used when polling   |
//!
//! [`HttpBackend`] implements them against the REST API; tests substitute a
//! scripted in-memory backend.

pub mod http;
pub mod sse;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analysis::ResourceSnapshot;
use crate::errors::BackendError;
use crate::job::{AnalysisRequest, SubjectId};

pub use http::HttpBackend;
pub use sse::SseDecoder;

/// Status reported by the engine for the job being watched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// `completed`, `error`, or any progress label (`connected`, `analyzing`, ...).
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusUpdate {
    pub fn completed(result: Value) -> Self {
        Self {
            status: "completed".to_string(),
            result: Some(result),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            result: None,
            message: Some(message.into()),
        }
    }

    pub fn progress(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            result: None,
            message: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status.eq_ignore_ascii_case("completed")
    }

    pub fn is_error(&self) -> bool {
        self.status.eq_ignore_ascii_case("error")
    }
}

/// Live status updates for one job. The stream ending means the server closed the connection.
pub type EventStream = BoxStream<'static, Result<StatusUpdate, BackendError>>;

/// The external collaborator that runs analyses.
#[async_trait]
pub trait AnalysisBackend: Send + Sync + 'static {
    /// Ask the engine to start the job. `Ok` means the request was acknowledged.
    async fn trigger_analysis(&self, request: &AnalysisRequest) -> Result<(), BackendError>;

    /// Open the push channel scoped to the request's subject and kind.
    async fn open_event_stream(&self, request: &AnalysisRequest)
    -> Result<EventStream, BackendError>;

    /// Read the subject's current state, including its latest analysis results.
    async fn fetch_current_state(&self, subject: &SubjectId)
    -> Result<ResourceSnapshot, BackendError>;
}
