//! Analysis job model: subjects, kinds, keys and the job state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::analysis::AnalysisResult;

/// The thing an analysis runs against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubjectId {
    Repository { id: String },
    PullRequest { repository_id: String, number: u64 },
}

impl SubjectId {
    pub fn repository(id: impl Into<String>) -> Self {
        SubjectId::Repository { id: id.into() }
    }

    pub fn pull_request(repository_id: impl Into<String>, number: u64) -> Self {
        SubjectId::PullRequest {
            repository_id: repository_id.into(),
            number,
        }
    }

    /// Repository the subject belongs to.
    pub fn repository_id(&self) -> &str {
        match self {
            SubjectId::Repository { id } => id,
            SubjectId::PullRequest { repository_id, .. } => repository_id,
        }
    }

    pub fn pull_request_number(&self) -> Option<u64> {
        match self {
            SubjectId::Repository { .. } => None,
            SubjectId::PullRequest { number, .. } => Some(*number),
        }
    }
}

/// `<repo>` for repositories, `<repo>:<number>` for pull requests.
impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectId::Repository { id } => write!(f, "{}", id),
            SubjectId::PullRequest {
                repository_id,
                number,
            } => write!(f, "{}:{}", repository_id, number),
        }
    }
}

/// Which analysis the engine should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    RepositoryAnalysis,
    PullRequestAnalysis,
    ReleaseRiskAnalysis,
}

impl AnalysisKind {
    /// Whether this kind of analysis can run against `subject`.
    pub fn accepts(self, subject: &SubjectId) -> bool {
        matches!(
            (self, subject),
            (AnalysisKind::PullRequestAnalysis, SubjectId::PullRequest { .. })
                | (AnalysisKind::RepositoryAnalysis, SubjectId::Repository { .. })
                | (AnalysisKind::ReleaseRiskAnalysis, SubjectId::Repository { .. })
        )
    }

    /// Human-readable label for terminal output.
    pub fn label(self) -> &'static str {
        match self {
            AnalysisKind::RepositoryAnalysis => "Repository analysis",
            AnalysisKind::PullRequestAnalysis => "Pull request analysis",
            AnalysisKind::ReleaseRiskAnalysis => "Release risk analysis",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisKind::RepositoryAnalysis => write!(f, "repository_analysis"),
            AnalysisKind::PullRequestAnalysis => write!(f, "pull_request_analysis"),
            AnalysisKind::ReleaseRiskAnalysis => write!(f, "release_risk_analysis"),
        }
    }
}

impl std::str::FromStr for AnalysisKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "repository_analysis" | "repository" | "repo" => Ok(AnalysisKind::RepositoryAnalysis),
            "pull_request_analysis" | "pull_request" | "pr" => {
                Ok(AnalysisKind::PullRequestAnalysis)
            }
            "release_risk_analysis" | "release_risk" | "release" => {
                Ok(AnalysisKind::ReleaseRiskAnalysis)
            }
            _ => anyhow::bail!(
                "Invalid analysis kind '{}'. Valid values: repository_analysis, pull_request_analysis, release_risk_analysis",
                s
            ),
        }
    }
}

/// Identity of a watch: at most one live session exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub subject: SubjectId,
    pub kind: AnalysisKind,
}

impl JobKey {
    pub fn new(subject: SubjectId, kind: AnalysisKind) -> Self {
        Self { subject, kind }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.subject, self.kind)
    }
}

/// A request to run one analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub subject: SubjectId,
    pub kind: AnalysisKind,
    /// Pull requests a release-risk analysis covers. Ignored by the other kinds.
    #[serde(default)]
    pub pull_request_ids: Vec<String>,
}

impl AnalysisRequest {
    pub fn new(subject: SubjectId, kind: AnalysisKind) -> Self {
        Self {
            subject,
            kind,
            pull_request_ids: Vec::new(),
        }
    }

    pub fn release_risk(repository_id: impl Into<String>, pull_request_ids: Vec<String>) -> Self {
        Self {
            subject: SubjectId::repository(repository_id),
            kind: AnalysisKind::ReleaseRiskAnalysis,
            pull_request_ids,
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey::new(self.subject.clone(), self.kind)
    }
}

/// Lifecycle state of an analysis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Idle,
    Requested,
    InProgress,
    Completed,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut
        )
    }

    /// Legal edges of the job state machine.
    ///
    /// ```text
    /// idle -> requested -> in_progress -> {completed | failed | timed_out}
    /// requested -> failed             (trigger rejected)
    /// requested | in_progress -> idle (cancelled)
    /// ```
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Idle, Requested)
                | (Requested, InProgress)
                | (Requested, Failed)
                | (Requested, Idle)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, TimedOut)
                | (InProgress, Idle)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Idle => "idle",
            JobStatus::Requested => "requested",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
        };
        write!(f, "{}", s)
    }
}

/// One asynchronous unit of work requested by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub subject: SubjectId,
    pub kind: AnalysisKind,
    pub status: JobStatus,
    /// Present only when `status == Completed`.
    pub result: Option<AnalysisResult>,
    /// Present only when `status == Failed`.
    pub error: Option<String>,
    /// Last non-terminal status label seen on the stream.
    pub progress: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl AnalysisJob {
    pub fn new(subject: SubjectId, kind: AnalysisKind) -> Self {
        Self {
            subject,
            kind,
            status: JobStatus::Idle,
            result: None,
            error: None,
            progress: None,
            started_at: None,
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey::new(self.subject.clone(), self.kind)
    }

    /// Move to `next` if the state machine allows it. Returns whether the move happened.
    pub(crate) fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        match next {
            JobStatus::Requested => {
                self.started_at = Some(Utc::now());
                self.result = None;
                self.error = None;
                self.progress = None;
            }
            JobStatus::Idle => self.progress = None,
            _ => {}
        }
        self.status = next;
        true
    }
}
