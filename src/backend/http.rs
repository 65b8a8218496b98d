//! reqwest implementation of [`AnalysisBackend`] against the DevPulse REST API.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, COOKIE};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

use super::{AnalysisBackend, EventStream, SseDecoder, StatusUpdate};
use crate::analysis::{PullRequestReview, ReleaseRiskReport, RepositorySummary, ResourceSnapshot};
use crate::config::ApiConfig;
use crate::errors::BackendError;
use crate::job::{AnalysisKind, AnalysisRequest, SubjectId};

const USER_AGENT: &str = concat!("devpulse/", env!("CARGO_PKG_VERSION"));
const SESSION_COOKIE: &str = "session_token";

/// Talks to `{base_url}/v1/...`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    /// No overall timeout: the watcher's deadline bounds stream lifetime.
    stream_client: reqwest::Client,
    base_url: String,
    session_token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &ApiConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        let stream_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build streaming HTTP client")?;

        Ok(Self {
            client,
            stream_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session_token: config.session_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.session_token {
            Some(token) => builder.header(COOKIE, format!("{}={}", SESSION_COOKIE, token)),
            None => builder,
        }
    }
}

fn trigger_path(request: &AnalysisRequest) -> String {
    let repo = request.subject.repository_id();
    match (request.kind, request.subject.pull_request_number()) {
        (AnalysisKind::PullRequestAnalysis, Some(number)) => {
            format!("/v1/repos/{}/prs/{}/analyze", repo, number)
        }
        (AnalysisKind::ReleaseRiskAnalysis, _) => format!("/v1/repos/{}/release", repo),
        _ => format!("/v1/repos/{}/analyze", repo),
    }
}

/// Repository and release-risk notifications share the repository stream.
fn stream_path(request: &AnalysisRequest) -> String {
    let repo = request.subject.repository_id();
    match request.subject.pull_request_number() {
        Some(number) => format!("/v1/repos/{}/prs/{}/analyze/stream", repo, number),
        None => format!("/v1/repos/{}/analyze/stream", repo),
    }
}

fn resource_path(subject: &SubjectId) -> String {
    match subject {
        SubjectId::Repository { id } => format!("/v1/repos/{}", id),
        SubjectId::PullRequest {
            repository_id,
            number,
        } => format!("/v1/repos/{}/prs/{}", repository_id, number),
    }
}

fn check_status(
    endpoint: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(BackendError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl AnalysisBackend for HttpBackend {
    async fn trigger_analysis(&self, request: &AnalysisRequest) -> Result<(), BackendError> {
        let endpoint = trigger_path(request);
        let mut builder = self
            .client
            .post(self.url(&endpoint))
            .header(ACCEPT, "application/json");
        if request.kind == AnalysisKind::ReleaseRiskAnalysis {
            builder = builder.json(&json!({ "pr_ids": request.pull_request_ids }));
        }

        let resp = self
            .authorize(builder)
            .send()
            .await
            .map_err(|source| BackendError::Request {
                endpoint: endpoint.clone(),
                source,
            })?;
        check_status(&endpoint, resp)?;
        debug!(endpoint = %endpoint, "Analysis trigger acknowledged");
        Ok(())
    }

    async fn open_event_stream(
        &self,
        request: &AnalysisRequest,
    ) -> Result<EventStream, BackendError> {
        let endpoint = stream_path(request);
        let builder = self
            .stream_client
            .get(self.url(&endpoint))
            .header(ACCEPT, "text/event-stream");

        let resp = self
            .authorize(builder)
            .send()
            .await
            .map_err(|source| BackendError::Request {
                endpoint: endpoint.clone(),
                source,
            })?;
        let resp = check_status(&endpoint, resp)?;
        debug!(endpoint = %endpoint, "Event stream opened");
        Ok(sse_updates(resp.bytes_stream(), request.kind))
    }

    async fn fetch_current_state(
        &self,
        subject: &SubjectId,
    ) -> Result<ResourceSnapshot, BackendError> {
        let endpoint = resource_path(subject);
        let builder = self
            .client
            .get(self.url(&endpoint))
            .header(ACCEPT, "application/json");

        let resp = self
            .authorize(builder)
            .send()
            .await
            .map_err(|source| BackendError::Request {
                endpoint: endpoint.clone(),
                source,
            })?;
        let resp = check_status(&endpoint, resp)?;
        let body: Value = resp.json().await.map_err(|e| BackendError::Decode {
            endpoint: endpoint.clone(),
            message: e.to_string(),
        })?;
        snapshot_from_value(subject, body).map_err(|e| BackendError::Decode {
            endpoint,
            message: e.to_string(),
        })
    }
}

struct SseReader<S> {
    bytes: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<StatusUpdate>,
    failed: bool,
}

/// Turn a raw byte stream into decoded status updates.
///
/// Undecodable frames are logged and skipped. A transport error is yielded once
/// and ends the stream.
fn sse_updates<S, B, E>(bytes: S, kind: AnalysisKind) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let reader = SseReader {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        failed: false,
    };

    futures::stream::unfold(reader, move |mut reader| async move {
        loop {
            if let Some(update) = reader.pending.pop_front() {
                return Some((Ok(update), reader));
            }
            if reader.failed {
                return None;
            }
            match reader.bytes.next().await {
                Some(Ok(chunk)) => {
                    for data in reader.decoder.push(chunk.as_ref()) {
                        match parse_status_update(&data, kind) {
                            Ok(update) => reader.pending.push_back(update),
                            Err(e) => warn!(error = %e, data = %data, "Skipping undecodable event"),
                        }
                    }
                }
                Some(Err(e)) => {
                    reader.failed = true;
                    return Some((Err(BackendError::Transport(e.to_string())), reader));
                }
                None => return None,
            }
        }
    })
    .boxed()
}

/// Event body as sent by the DevPulse API.
///
/// Accepts an explicit `result`/`resultPayload` object as well as the flat
/// completion fields the API fans out (`ai_summary`, `release_risk_score`, ...).
#[derive(Debug, Deserialize)]
struct WireUpdate {
    status: String,
    #[serde(default, alias = "resultPayload", alias = "result_payload")]
    result: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, alias = "aiSummary")]
    ai_summary: Option<String>,
    #[serde(default, alias = "aiDecision")]
    ai_decision: Option<String>,
    #[serde(default, alias = "releaseRiskScore")]
    release_risk_score: Option<i64>,
    #[serde(default, alias = "releaseChangelog")]
    release_changelog: Option<String>,
    #[serde(default, alias = "releaseRiskAnalysis")]
    release_risk_analysis: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Decode one `data:` payload for a stream watching `kind`.
pub(crate) fn parse_status_update(
    data: &str,
    kind: AnalysisKind,
) -> Result<StatusUpdate, serde_json::Error> {
    let wire: WireUpdate = serde_json::from_str(data)?;

    let result = match wire.result {
        Some(result) => Some(result),
        None => flat_result(
            kind,
            non_empty(wire.ai_summary),
            non_empty(wire.ai_decision),
            wire.release_risk_score,
            non_empty(wire.release_changelog),
            non_empty(wire.release_risk_analysis),
        ),
    };

    Ok(StatusUpdate {
        status: wire.status,
        result,
        message: non_empty(wire.message).or(non_empty(wire.error)),
    })
}

fn flat_result(
    kind: AnalysisKind,
    summary: Option<String>,
    decision: Option<String>,
    risk_score: Option<i64>,
    changelog: Option<String>,
    raw_analysis: Option<String>,
) -> Option<Value> {
    match kind {
        AnalysisKind::RepositoryAnalysis => summary.map(|summary| json!({ "summary": summary })),
        AnalysisKind::PullRequestAnalysis => {
            summary.map(|summary| json!({ "summary": summary, "decision": decision }))
        }
        AnalysisKind::ReleaseRiskAnalysis => {
            if risk_score.is_none() && raw_analysis.is_none() {
                return None;
            }
            let report =
                ReleaseRiskReport::from_raw_analysis(risk_score, changelog, raw_analysis.as_deref());
            serde_json::to_value(report).ok()
        }
    }
}

/// Resource body of `GET /v1/repos/{id}` and `GET /v1/repos/{id}/prs/{n}`.
#[derive(Debug, Default, Deserialize)]
struct ResourceWire {
    #[serde(default, alias = "aiSummary")]
    ai_summary: Option<String>,
    #[serde(default, alias = "aiDecision")]
    ai_decision: Option<String>,
    #[serde(default, alias = "releaseRiskScore")]
    release_risk_score: Option<i64>,
    #[serde(default, alias = "releaseChangelog")]
    release_changelog: Option<String>,
    #[serde(default, alias = "releaseRiskAnalysis")]
    release_risk_analysis: Option<String>,
    #[serde(default, alias = "analysisRevision")]
    analysis_revision: Option<Value>,
    #[serde(default, alias = "analyzedAt")]
    analyzed_at: Option<Value>,
}

fn revision_string(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn snapshot_from_value(
    subject: &SubjectId,
    body: Value,
) -> Result<ResourceSnapshot, serde_json::Error> {
    // Some endpoints wrap the resource in `{ "data": {...} }`.
    let body = match body {
        Value::Object(mut map) if map.get("data").is_some_and(Value::is_object) => {
            map.remove("data").unwrap_or_default()
        }
        other => other,
    };
    let wire: ResourceWire = serde_json::from_value(body)?;

    let summary = non_empty(wire.ai_summary);
    let mut snapshot = ResourceSnapshot {
        revision: revision_string(wire.analysis_revision).or(revision_string(wire.analyzed_at)),
        ..Default::default()
    };

    match subject {
        SubjectId::Repository { .. } => {
            snapshot.repository_summary = summary.map(|summary| RepositorySummary { summary });
            let raw = non_empty(wire.release_risk_analysis);
            if wire.release_risk_score.is_some() || raw.is_some() {
                snapshot.release_risk = Some(ReleaseRiskReport::from_raw_analysis(
                    wire.release_risk_score,
                    non_empty(wire.release_changelog),
                    raw.as_deref(),
                ));
            }
        }
        SubjectId::PullRequest { .. } => {
            snapshot.pull_request_review = summary.map(|summary| PullRequestReview {
                summary,
                decision: non_empty(wire.ai_decision),
            });
        }
    }

    Ok(snapshot)
}
