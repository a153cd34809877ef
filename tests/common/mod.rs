//! In-process fake of the collector backend.

#![allow(dead_code)]

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const GOOD_CODE: &str = "123456";
pub const JWT: &str = "jwt-abc";

#[derive(Default)]
pub struct FakeCollector {
    /// Ingest calls answered 503 before succeeding
    pub fail_ingest: AtomicUsize,
    pub ingested: Mutex<Vec<Value>>,
    pub sessions_started: AtomicUsize,
    pub api_keys: Mutex<Vec<Option<String>>>,
}

impl FakeCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_ingest(failures: usize) -> Arc<Self> {
        let collector = Self::default();
        collector.fail_ingest.store(failures, Ordering::SeqCst);
        Arc::new(collector)
    }

    pub fn ingested(&self) -> Vec<Value> {
        self.ingested.lock().unwrap().clone()
    }

    fn record_api_key(&self, headers: &HeaderMap) {
        let key = headers
            .get("apikey")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.api_keys.lock().unwrap().push(key);
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {JWT}"))
}

fn unauthorized() -> (StatusCode, Json<Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "message": "Unauthorized", "code": "invalid_token" })),
    )
}

async fn verify_code(
    State(state): State<Arc<FakeCollector>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.record_api_key(&headers);
    if body["code"] == GOOD_CODE && body["device_type"] == "watch" {
        (
            StatusCode::OK,
            Json(json!({ "success": true, "user_id": "user-1", "jwt": JWT })),
        )
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "Invalid or expired code" })),
        )
    }
}

async fn start_session(
    State(state): State<Arc<FakeCollector>>,
    headers: HeaderMap,
    Json(_body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return unauthorized();
    }
    let n = state.sessions_started.fetch_add(1, Ordering::SeqCst) + 1;
    (
        StatusCode::OK,
        Json(json!({
            "session_id": format!("sess-{n}"),
            "started_at": "2024-01-22T10:00:00Z",
            "message": "Session started"
        })),
    )
}

async fn ingest(
    State(state): State<Arc<FakeCollector>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return unauthorized();
    }
    let failing = state
        .fail_ingest
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "message": "try again later" })),
        );
    }

    let mut ingested = state.ingested.lock().unwrap();
    ingested.push(body);
    let sample_id = format!("sample-{}", ingested.len());
    (
        StatusCode::OK,
        Json(json!({ "success": true, "sample_id": sample_id })),
    )
}

/// Serve the fake on an ephemeral port; returns the functions base URL.
pub async fn spawn_collector(state: Arc<FakeCollector>) -> String {
    let app = Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/functions/v1/verify_code", post(verify_code))
        .route("/functions/v1/start_session", post(start_session))
        .route("/functions/v1/sensor_sample_ingest", post(ingest))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}/functions/v1")
}
