pub mod analysis;
pub mod backend;
pub mod config;
pub mod errors;
pub mod job;
pub mod logging;
pub mod ui;
pub mod watcher;

pub use analysis::{AnalysisResult, ResourceSnapshot};
pub use backend::{AnalysisBackend, HttpBackend};
pub use errors::{BackendError, Failure, WatchError};
pub use job::{AnalysisJob, AnalysisKind, AnalysisRequest, JobKey, JobStatus, SubjectId};
pub use watcher::{AsyncJobWatcher, Outcome, WatchHandle, WatcherConfig};
