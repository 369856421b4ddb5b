pub mod health;
pub mod jobs;
pub mod metrics;
pub mod videos;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::limit::RequestBodyLimitLayer;

use crate::app_state::{AppState, SessionBusy};
use crate::services::videos::{ApiError, ErrorKind};

pub static SESSION_HEADER: HeaderName = HeaderName::from_static("x-session-id");

/// Prompt, settings and a reference image of up to 10 MB.
const MAX_UPLOAD_BYTES: usize = 12 * 1024 * 1024;

/// Health plus the session-scoped JSON API. `/metrics` is mounted separately
/// because it carries its own state.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/v1/videos", post(videos::create))
        .route("/api/v1/videos/cancel", post(videos::cancel))
        .route("/api/v1/progress", get(videos::progress))
        .route("/api/v1/jobs", get(jobs::list))
        .route("/api/v1/jobs/more", post(jobs::load_more))
        .route("/api/v1/jobs/delete/cancel", post(jobs::cancel_delete))
        .route(
            "/api/v1/jobs/{id}",
            get(jobs::open).delete(jobs::confirm_delete),
        )
        .route("/api/v1/jobs/{id}/resume", post(jobs::resume))
        .route("/api/v1/jobs/{id}/content", get(jobs::content))
        .route("/api/v1/jobs/{id}/metadata", get(jobs::metadata))
        .route("/api/v1/jobs/{id}/delete", post(jobs::request_delete))
        .route("/api/v1/session/recent", get(jobs::recent))
        .layer(middleware::from_fn_with_state(state.clone(), with_session))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES));

    Router::new()
        .route("/health", get(health::health_check))
        .merge(api)
        .with_state(state)
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Busy(#[from] SessionBusy),

    #[error("{0}")]
    BadRequest(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl AppError {
    fn status_and_kind(&self) -> (StatusCode, String) {
        match self {
            Self::Api(e) => {
                let status = match e.kind() {
                    ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorKind::Auth => StatusCode::UNAUTHORIZED,
                    ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                    ErrorKind::Transient | ErrorKind::UnexpectedResponse => StatusCode::BAD_GATEWAY,
                    ErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ErrorKind::Expired => StatusCode::GONE,
                    ErrorKind::NotReady => StatusCode::CONFLICT,
                    ErrorKind::Config => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, e.kind().to_string())
            }
            Self::Busy(_) => (StatusCode::CONFLICT, "busy".to_string()),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request".to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }
        let body = ErrorBody {
            error: kind,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Resolve the caller's session from `x-session-id`, make it available to
/// handlers as an extension and echo its id on the response.
pub async fn with_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let requested = request
        .headers()
        .get(&SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let session = state.sessions.resolve(requested.as_deref());
    let id = session.id;
    request.extensions_mut().insert(session);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        response.headers_mut().insert(SESSION_HEADER.clone(), value);
    }
    response
}
