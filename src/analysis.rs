//! Analysis results, resource snapshots, and the rule that decides whether a
//! polled snapshot carries a result the watcher has not seen yet.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

use crate::job::AnalysisKind;

/// Matches a whole payload wrapped in a markdown code fence (optionally tagged, e.g. ```json).
static FENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?si)^\s*```[A-Za-z0-9_-]*\s*(.*?)\s*```\s*$")
        .expect("fence pattern is a valid static regex")
});

/// Summary of a whole repository, as markdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySummary {
    pub summary: String,
}

/// AI review of one pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestReview {
    pub summary: String,
    /// Engine decision label (`approve`, `block`, `comment`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
}

/// Risk assessment for a release made of selected pull requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseRiskReport {
    /// 0-100, higher is riskier.
    pub risk_score: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Structured analysis when the engine output parsed as JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Value>,
}

impl ReleaseRiskReport {
    /// Build a report from the engine's raw output, which may be fenced JSON or plain text.
    pub fn from_raw_analysis(
        risk_score: Option<i64>,
        changelog: Option<String>,
        raw_analysis: Option<&str>,
    ) -> Self {
        let mut report = Self {
            risk_score,
            changelog,
            summary: None,
            analysis: None,
        };

        let Some(raw) = raw_analysis.map(strip_code_fences).filter(|r| !r.is_empty()) else {
            return report;
        };

        match serde_json::from_str::<Value>(raw) {
            Ok(parsed) if parsed.is_object() => {
                report.summary = parsed
                    .get("summary")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if report.changelog.is_none() {
                    report.changelog = parsed
                        .get("changelog")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                }
                if report.risk_score.is_none() {
                    report.risk_score = parsed.get("risk_score").and_then(Value::as_i64);
                }
                report.analysis = Some(parsed);
            }
            _ => report.summary = Some(raw.to_string()),
        }
        report
    }
}

/// Result of a completed analysis job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum AnalysisResult {
    Repository(RepositorySummary),
    PullRequest(PullRequestReview),
    ReleaseRisk(ReleaseRiskReport),
}

impl AnalysisResult {
    pub fn kind(&self) -> AnalysisKind {
        match self {
            AnalysisResult::Repository(_) => AnalysisKind::RepositoryAnalysis,
            AnalysisResult::PullRequest(_) => AnalysisKind::PullRequestAnalysis,
            AnalysisResult::ReleaseRisk(_) => AnalysisKind::ReleaseRiskAnalysis,
        }
    }

    /// Parse a stream result payload for `kind`.
    ///
    /// Returns `None` when the payload does not describe a `kind` result or is empty.
    pub fn from_payload(kind: AnalysisKind, payload: &Value) -> Option<Self> {
        let result = match kind {
            AnalysisKind::RepositoryAnalysis => {
                AnalysisResult::Repository(serde_json::from_value(payload.clone()).ok()?)
            }
            AnalysisKind::PullRequestAnalysis => {
                AnalysisResult::PullRequest(serde_json::from_value(payload.clone()).ok()?)
            }
            AnalysisKind::ReleaseRiskAnalysis => {
                AnalysisResult::ReleaseRisk(serde_json::from_value(payload.clone()).ok()?)
            }
        };
        (!result.is_empty()).then_some(result)
    }

    /// An empty result never completes a job.
    pub fn is_empty(&self) -> bool {
        match self {
            AnalysisResult::Repository(r) => r.summary.trim().is_empty(),
            AnalysisResult::PullRequest(r) => r.summary.trim().is_empty(),
            AnalysisResult::ReleaseRisk(r) => r.risk_score.is_none(),
        }
    }

    /// Main text of the result, for display.
    pub fn summary(&self) -> Option<&str> {
        match self {
            AnalysisResult::Repository(r) => Some(&r.summary),
            AnalysisResult::PullRequest(r) => Some(&r.summary),
            AnalysisResult::ReleaseRisk(r) => r.summary.as_deref(),
        }
    }
}

/// Point-in-time view of a repository or pull request, as returned by the API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_summary: Option<RepositorySummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request_review: Option<PullRequestReview>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_risk: Option<ReleaseRiskReport>,
    /// Analysis version marker, when the API provides one. It versions the
    /// AI summary fields only; see [`ResourceSnapshot::revision_for`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

impl ResourceSnapshot {
    /// The non-empty result of `kind` carried by this snapshot, if any.
    pub fn result_for(&self, kind: AnalysisKind) -> Option<AnalysisResult> {
        let result = match kind {
            AnalysisKind::RepositoryAnalysis => {
                AnalysisResult::Repository(self.repository_summary.clone()?)
            }
            AnalysisKind::PullRequestAnalysis => {
                AnalysisResult::PullRequest(self.pull_request_review.clone()?)
            }
            AnalysisKind::ReleaseRiskAnalysis => {
                AnalysisResult::ReleaseRisk(self.release_risk.clone()?)
            }
        };
        (!result.is_empty()).then_some(result)
    }

    /// The revision that versions `kind`'s fields.
    ///
    /// `analysis_revision`/`analyzed_at` move with the repository summary and the
    /// pull request review. Release reports are stored alongside them but are not
    /// versioned, so they have no revision here and are compared by content.
    pub fn revision_for(&self, kind: AnalysisKind) -> Option<&str> {
        match kind {
            AnalysisKind::RepositoryAnalysis | AnalysisKind::PullRequestAnalysis => {
                self.revision.as_deref()
            }
            AnalysisKind::ReleaseRiskAnalysis => None,
        }
    }
}

/// Last result known for a job key; polling compares fetched snapshots against it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Baseline {
    pub result: Option<AnalysisResult>,
    pub revision: Option<String>,
}

impl Baseline {
    pub fn from_snapshot(snapshot: &ResourceSnapshot, kind: AnalysisKind) -> Self {
        Self {
            result: snapshot.result_for(kind),
            revision: snapshot.revision_for(kind).map(str::to_string),
        }
    }

    pub fn from_result(result: AnalysisResult) -> Self {
        Self {
            result: Some(result),
            revision: None,
        }
    }

    /// Return the snapshot's result for `kind` if it is newer than this baseline.
    ///
    /// Revisions of `kind` decide when both sides carry one; otherwise content
    /// equality does, so an identical re-analysis without a revision is not detected.
    pub fn detect_new_result(
        &self,
        snapshot: &ResourceSnapshot,
        kind: AnalysisKind,
    ) -> Option<AnalysisResult> {
        let fresh = snapshot.result_for(kind)?;
        let is_new = match (self.revision.as_deref(), snapshot.revision_for(kind)) {
            (Some(known), Some(current)) => known != current,
            _ => self.result.as_ref() != Some(&fresh),
        };
        is_new.then_some(fresh)
    }
}

/// Strip a surrounding markdown code fence, if present.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(inner) = FENCE_PATTERN
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
    {
        return inner.as_str().trim();
    }
    let trimmed = trimmed.strip_prefix("```").unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed);
    trimmed.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repo_snapshot(summary: &str) -> ResourceSnapshot {
        ResourceSnapshot {
            repository_summary: Some(RepositorySummary {
                summary: summary.to_string(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_pr_payload_is_stored_verbatim() {
        let payload = json!({"summary": "ok", "decision": "approve"});
        let result =
            AnalysisResult::from_payload(AnalysisKind::PullRequestAnalysis, &payload).unwrap();
        assert_eq!(
            result,
            AnalysisResult::PullRequest(PullRequestReview {
                summary: "ok".to_string(),
                decision: Some("approve".to_string()),
            })
        );
    }

    #[test]
    fn test_empty_summary_is_not_a_result() {
        let payload = json!({"summary": "   "});
        assert!(AnalysisResult::from_payload(AnalysisKind::RepositoryAnalysis, &payload).is_none());
    }

    #[test]
    fn test_payload_for_other_kind_is_rejected() {
        // A release-risk notification carries no summary for a repository analysis.
        let payload = json!({"risk_score": 40, "changelog": "- fix"});
        assert!(AnalysisResult::from_payload(AnalysisKind::RepositoryAnalysis, &payload).is_none());
        assert!(
            AnalysisResult::from_payload(AnalysisKind::ReleaseRiskAnalysis, &payload).is_some()
        );
    }

    #[test]
    fn test_release_payload_without_score_is_empty() {
        let payload = json!({"changelog": "- fix"});
        assert!(
            AnalysisResult::from_payload(AnalysisKind::ReleaseRiskAnalysis, &payload).is_none()
        );
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  ```\nplain\n```  "), "plain");
        assert_eq!(strip_code_fences("no fences"), "no fences");
        assert_eq!(strip_code_fences("```dangling"), "dangling");
    }

    #[test]
    fn test_release_report_from_fenced_json() {
        let raw = "```json\n{\"risk_score\": 72, \"summary\": \"Risky migration\", \"changelog\": \"- db\"}\n```";
        let report = ReleaseRiskReport::from_raw_analysis(None, None, Some(raw));
        assert_eq!(report.risk_score, Some(72));
        assert_eq!(report.summary.as_deref(), Some("Risky migration"));
        assert_eq!(report.changelog.as_deref(), Some("- db"));
        assert!(report.analysis.is_some());
    }

    #[test]
    fn test_release_report_keeps_explicit_fields() {
        let raw = "{\"risk_score\": 10, \"changelog\": \"ignored\"}";
        let report =
            ReleaseRiskReport::from_raw_analysis(Some(55), Some("- kept".into()), Some(raw));
        assert_eq!(report.risk_score, Some(55));
        assert_eq!(report.changelog.as_deref(), Some("- kept"));
    }

    #[test]
    fn test_release_report_from_plain_text() {
        let report = ReleaseRiskReport::from_raw_analysis(Some(20), None, Some("Looks fine."));
        assert_eq!(report.summary.as_deref(), Some("Looks fine."));
        assert!(report.analysis.is_none());
    }

    #[test]
    fn test_snapshot_result_for_kind() {
        let snapshot = repo_snapshot("Well structured");
        assert!(snapshot.result_for(AnalysisKind::RepositoryAnalysis).is_some());
        assert!(snapshot.result_for(AnalysisKind::ReleaseRiskAnalysis).is_none());
        assert!(repo_snapshot("").result_for(AnalysisKind::RepositoryAnalysis).is_none());
    }

    #[test]
    fn test_unchanged_content_is_not_new() {
        let baseline = Baseline::from_snapshot(&repo_snapshot("v1"), AnalysisKind::RepositoryAnalysis);
        assert!(
            baseline
                .detect_new_result(&repo_snapshot("v1"), AnalysisKind::RepositoryAnalysis)
                .is_none()
        );
        let fresh = baseline
            .detect_new_result(&repo_snapshot("v2"), AnalysisKind::RepositoryAnalysis)
            .unwrap();
        assert_eq!(fresh.summary(), Some("v2"));
    }

    #[test]
    fn test_empty_baseline_accepts_any_result() {
        let baseline = Baseline::default();
        assert!(
            baseline
                .detect_new_result(&repo_snapshot("first"), AnalysisKind::RepositoryAnalysis)
                .is_some()
        );
        assert!(
            baseline
                .detect_new_result(&ResourceSnapshot::default(), AnalysisKind::RepositoryAnalysis)
                .is_none()
        );
    }

    #[test]
    fn test_revision_detects_identical_reanalysis() {
        let mut before = repo_snapshot("same");
        before.revision = Some("2026-10-01T10:00:00Z".into());
        let mut after = repo_snapshot("same");
        after.revision = Some("2026-10-01T10:05:00Z".into());

        let baseline = Baseline::from_snapshot(&before, AnalysisKind::RepositoryAnalysis);
        assert!(
            baseline
                .detect_new_result(&after, AnalysisKind::RepositoryAnalysis)
                .is_some()
        );
        assert!(
            baseline
                .detect_new_result(&before, AnalysisKind::RepositoryAnalysis)
                .is_none()
        );
    }

    #[test]
    fn test_repository_revision_does_not_refresh_release_report() {
        let report = ReleaseRiskReport {
            risk_score: Some(40),
            changelog: None,
            summary: Some("Moderate".into()),
            analysis: None,
        };
        let before = ResourceSnapshot {
            release_risk: Some(report.clone()),
            revision: Some("R1".into()),
            ..Default::default()
        };
        // A repository analysis finished meanwhile and moved the revision.
        let after = ResourceSnapshot {
            repository_summary: Some(RepositorySummary {
                summary: "new repo summary".into(),
            }),
            release_risk: Some(report),
            revision: Some("R2".into()),
            ..Default::default()
        };

        let baseline = Baseline::from_snapshot(&before, AnalysisKind::ReleaseRiskAnalysis);
        assert_eq!(baseline.revision, None);
        assert!(
            baseline
                .detect_new_result(&after, AnalysisKind::ReleaseRiskAnalysis)
                .is_none()
        );

        let mut rescored = after.clone();
        if let Some(report) = rescored.release_risk.as_mut() {
            report.risk_score = Some(75);
        }
        assert!(
            baseline
                .detect_new_result(&rescored, AnalysisKind::ReleaseRiskAnalysis)
                .is_some()
        );
    }

    #[test]
    fn test_result_serializes_with_kind_tag() {
        let result = AnalysisResult::Repository(RepositorySummary {
            summary: "hi".into(),
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["kind"], "repository");
        assert_eq!(json["payload"]["summary"], "hi");
    }
}
