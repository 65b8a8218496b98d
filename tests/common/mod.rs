//! In-process stand-in for the DevPulse API, served by axum on 127.0.0.1:0.

#![allow(dead_code)]

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use futures::StreamExt;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// How the fake API answers.
#[derive(Clone)]
pub struct Script {
    pub trigger_status: StatusCode,
    pub stream_status: StatusCode,
    /// Sent after the initial `{"status":"connected"}` frame.
    pub events: Vec<Value>,
    /// Keep the stream open after the scripted events instead of closing it.
    pub hold_open: bool,
    pub resource: Value,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            trigger_status: StatusCode::ACCEPTED,
            stream_status: StatusCode::OK,
            events: Vec::new(),
            hold_open: true,
            resource: json!({}),
        }
    }
}

/// A request the fake API received on a trigger endpoint.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub path: String,
    pub body: Option<Value>,
    pub cookie: Option<String>,
}

pub struct ServerState {
    script: Script,
    pub triggers: Mutex<Vec<Trigger>>,
    pub streams_opened: AtomicUsize,
    pub fetches: AtomicUsize,
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
    pub handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Base URL including the `/api` prefix.
    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn triggers(&self) -> Vec<Trigger> {
        self.state.triggers.lock().unwrap().clone()
    }

    pub fn streams_opened(&self) -> usize {
        self.state.streams_opened.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.state.fetches.load(Ordering::SeqCst)
    }
}

async fn trigger(
    State(state): State<Arc<ServerState>>,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    state.triggers.lock().unwrap().push(Trigger {
        path: uri.path().to_string(),
        body: serde_json::from_str(&body).ok(),
        cookie: headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    });
    state.script.trigger_status
}

async fn stream(State(state): State<Arc<ServerState>>) -> Response {
    state.streams_opened.fetch_add(1, Ordering::SeqCst);
    if state.script.stream_status != StatusCode::OK {
        return state.script.stream_status.into_response();
    }

    let mut frames = vec![json!({"status": "connected"})];
    frames.extend(state.script.events.iter().cloned());
    let events = futures::stream::iter(
        frames
            .into_iter()
            .map(|frame| Ok::<_, Infallible>(Event::default().data(frame.to_string()))),
    );

    if state.script.hold_open {
        Sse::new(events.chain(futures::stream::pending())).into_response()
    } else {
        Sse::new(events).into_response()
    }
}

async fn resource(State(state): State<Arc<ServerState>>) -> Json<Value> {
    state.fetches.fetch_add(1, Ordering::SeqCst);
    Json(state.script.resource.clone())
}

/// Start the fake API on a random port. The server runs until `handle` is aborted
/// or the runtime shuts down.
pub async fn start_test_server(script: Script) -> TestServer {
    let state = Arc::new(ServerState {
        script,
        triggers: Mutex::new(Vec::new()),
        streams_opened: AtomicUsize::new(0),
        fetches: AtomicUsize::new(0),
    });

    let app = Router::new()
        .route("/api/v1/repos/{id}/analyze", post(trigger))
        .route("/api/v1/repos/{id}/prs/{number}/analyze", post(trigger))
        .route("/api/v1/repos/{id}/release", post(trigger))
        .route("/api/v1/repos/{id}/analyze/stream", get(stream))
        .route("/api/v1/repos/{id}/prs/{number}/analyze/stream", get(stream))
        .route("/api/v1/repos/{id}", get(resource))
        .route("/api/v1/repos/{id}/prs/{number}", get(resource))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        addr,
        state,
        handle,
    }
}

/// Start the fake API on its own runtime, for tests that block on a child process.
pub fn start_blocking(script: Script) -> (tokio::runtime::Runtime, TestServer) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = runtime.block_on(start_test_server(script));
    (runtime, server)
}
