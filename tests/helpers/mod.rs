//! In-process mock of the remote videos API.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

pub const API_KEY: &str = "sk-test";
pub const MP4_BYTES: &[u8] = b"\x00\x00\x00\x18ftypmp42-mock-video";
/// 2026-03-01T12:00:00Z, the creation time of videos added with `insert`.
pub const BASE_TS: i64 = 1_772_366_400;

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub auth: Option<String>,
}

#[derive(Default)]
pub struct MockState {
    pub videos: Vec<Value>,
    /// Statuses reported by successive `GET /videos/{id}` calls.
    pub scripts: HashMap<String, VecDeque<&'static str>>,
    /// Forced error responses, served before anything else.
    pub failures: VecDeque<(StatusCode, Option<u64>)>,
    pub requests: Vec<Recorded>,
    pub created: u32,
}

type Shared = Arc<Mutex<MockState>>;

pub struct MockRemote {
    pub addr: SocketAddr,
    pub state: Shared,
    _handle: tokio::task::JoinHandle<()>,
}

impl MockRemote {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(MockState::default()));
        let app = Router::new()
            .route("/v1/videos", get(list_videos).post(create_video))
            .route("/v1/videos/{id}", get(get_video).delete(delete_video))
            .route("/v1/videos/{id}/content", get(video_content))
            .layer(middleware::from_fn_with_state(state.clone(), gatekeeper))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            addr,
            state,
            _handle: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    pub fn insert(&self, id: &str, status: &str, minute_offset: i64) {
        let video = video_object(id, status, BASE_TS + minute_offset * 60, "a mock prompt");
        self.state.lock().unwrap().videos.push(video);
    }

    pub fn script(&self, id: &str, statuses: &[&'static str]) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(id.to_string(), statuses.iter().copied().collect());
    }

    pub fn fail_next(&self, status: StatusCode, retry_after: Option<u64>) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push_back((status, retry_after));
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn count(&self, method: &str, path_prefix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path.starts_with(path_prefix))
            .count()
    }

    pub fn has_video(&self, id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .videos
            .iter()
            .any(|v| v["id"] == id)
    }
}

fn video_object(id: &str, status: &str, created_at: i64, prompt: &str) -> Value {
    json!({
        "id": id,
        "object": "video",
        "status": status,
        "created_at": created_at,
        "model": "sora-2",
        "prompt": prompt,
        "seconds": "8",
        "size": "1280x720",
        "progress": if status == "completed" { 100 } else { 0 },
    })
}

fn error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({ "error": { "message": message, "type": "invalid_request_error" } })),
    )
        .into_response()
}

/// Records every request, enforces bearer auth and serves forced failures.
async fn gatekeeper(State(state): State<Shared>, request: Request, next: Next) -> Response {
    let auth = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let forced = {
        let mut state = state.lock().unwrap();
        state.requests.push(Recorded {
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
            query: request.uri().query().map(str::to_string),
            auth: auth.clone(),
        });
        state.failures.pop_front()
    };

    if auth.as_deref() != Some(&format!("Bearer {API_KEY}")) {
        return error(StatusCode::UNAUTHORIZED, "Incorrect API key provided");
    }
    if let Some((status, retry_after)) = forced {
        let mut response = error(status, "forced failure");
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, secs.to_string().parse().unwrap());
        }
        return response;
    }
    next.run(request).await
}

async fn create_video(State(state): State<Shared>, mut multipart: Multipart) -> Response {
    let mut fields = HashMap::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        if name == "input_reference" {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let _ = field.bytes().await;
            fields.insert(name, file_name);
        } else {
            fields.insert(name, field.text().await.unwrap_or_default());
        }
    }
    let Some(prompt) = fields.get("prompt") else {
        return error(StatusCode::BAD_REQUEST, "prompt is required");
    };

    let mut state = state.lock().unwrap();
    state.created += 1;
    let id = format!("video_mock_{}", state.created);
    // real time: the front-end checks the 1h download window against its clock
    let created_at = chrono::Utc::now().timestamp();
    let mut video = video_object(&id, "queued", created_at, prompt);
    for key in ["model", "seconds", "size"] {
        if let Some(value) = fields.get(key) {
            video[key] = json!(value);
        }
    }
    state.videos.push(video.clone());
    Json(video).into_response()
}

async fn get_video(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut state = state.lock().unwrap();
    let next = state.scripts.get_mut(&id).and_then(VecDeque::pop_front);
    let Some(video) = state.videos.iter_mut().find(|v| v["id"] == id.as_str()) else {
        return error(StatusCode::NOT_FOUND, "video not found");
    };
    if let Some(status) = next {
        video["status"] = json!(status);
        video["progress"] = match status {
            "completed" => json!(100),
            "in_progress" => json!(50),
            _ => json!(0),
        };
    }
    Json(video.clone()).into_response()
}

async fn list_videos(
    State(state): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let state = state.lock().unwrap();
    let limit: usize = params.get("limit").and_then(|l| l.parse().ok()).unwrap_or(20);

    let mut ordered: Vec<(usize, &Value)> = state
        .videos
        .iter()
        .enumerate()
        .filter(|(_, v)| params.get("status").map_or(true, |s| v["status"] == s.as_str()))
        .collect();
    ordered.sort_by(|(ia, a), (ib, b)| {
        b["created_at"]
            .as_i64()
            .cmp(&a["created_at"].as_i64())
            .then(ib.cmp(ia))
    });

    let start = match params.get("after") {
        Some(after) => ordered
            .iter()
            .position(|(_, v)| v["id"] == after.as_str())
            .map_or(ordered.len(), |p| p + 1),
        None => 0,
    };
    let data: Vec<Value> = ordered
        .iter()
        .skip(start)
        .take(limit)
        .map(|(_, v)| (*v).clone())
        .collect();
    let has_more = start + data.len() < ordered.len();
    Json(json!({ "object": "list", "data": data, "has_more": has_more })).into_response()
}

async fn delete_video(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut state = state.lock().unwrap();
    let before = state.videos.len();
    state.videos.retain(|v| v["id"] != id.as_str());
    if state.videos.len() == before {
        return error(StatusCode::NOT_FOUND, "video not found");
    }
    Json(json!({ "id": id, "object": "video.deleted", "deleted": true })).into_response()
}

async fn video_content(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let state = state.lock().unwrap();
    match state.videos.iter().find(|v| v["id"] == id.as_str()) {
        None => error(StatusCode::NOT_FOUND, "video not found"),
        Some(v) if v["status"] != "completed" => error(StatusCode::CONFLICT, "video not ready"),
        Some(_) => ([(header::CONTENT_TYPE, "video/mp4")], MP4_BYTES).into_response(),
    }
}
