use axum::extract::{Multipart, State};
use axum::{Extension, Json};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;

use crate::app_state::{AppState, SessionHandle};
use crate::flows::create::{create_video, CreateOutcome};
use crate::models::request::{CreateVideoRequest, ReferenceImage, Resolution, VideoModel};
use crate::services::poller::ProgressUpdate;
use crate::routes::AppError;
use crate::services::videos::ApiError;

/// Build a create request from the form fields `prompt`, `model`, `seconds`,
/// `size` and the optional `input_reference` file.
async fn read_form(mut multipart: Multipart) -> Result<CreateVideoRequest, AppError> {
    let mut request = CreateVideoRequest::new("");

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "input_reference" => {
                let file_name = field.file_name().unwrap_or("reference").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                if !bytes.is_empty() {
                    request.reference_image = Some(ReferenceImage {
                        file_name,
                        bytes: bytes.to_vec(),
                    });
                }
            }
            "prompt" | "model" | "seconds" | "size" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                apply_text_field(&mut request, &name, text.trim())?;
            }
            other => tracing::debug!(field = %other, "Ignoring unknown form field"),
        }
    }

    Ok(request)
}

fn apply_text_field(
    request: &mut CreateVideoRequest,
    name: &str,
    value: &str,
) -> Result<(), ApiError> {
    match name {
        "prompt" => request.prompt = value.to_string(),
        "model" => {
            request.model = VideoModel::from_str(value)
                .map_err(|_| ApiError::Validation(format!("unknown model '{value}'")))?
        }
        "seconds" => {
            request.seconds = value
                .parse()
                .map_err(|_| ApiError::Validation(format!("seconds must be a number, got '{value}'")))?
        }
        "size" => {
            request.resolution = Resolution::from_str(value)
                .map_err(|_| ApiError::Validation(format!("unsupported size '{value}'")))?
        }
        _ => {}
    }
    Ok(())
}

/// POST /api/v1/videos: submit a prompt and poll the job until it settles.
pub async fn create(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<SessionHandle>>,
    multipart: Multipart,
) -> Result<Json<CreateOutcome>, AppError> {
    let request = read_form(multipart).await?;
    let backend = state.backend()?;
    let mut guard = session.try_lock()?;

    let cancel = session.begin_watch();
    let mut observer = session.observer();
    let result = create_video(backend, &mut guard.store, &request, &mut observer, &cancel).await;
    session.end_watch();

    Ok(Json(result?))
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// POST /api/v1/videos/cancel: stop watching the job in flight. The remote
/// job keeps running.
pub async fn cancel(Extension(session): Extension<Arc<SessionHandle>>) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: session.cancel_watch(),
    })
}

/// GET /api/v1/progress: latest progress of the session's poll.
pub async fn progress(
    Extension(session): Extension<Arc<SessionHandle>>,
) -> Json<Option<ProgressUpdate>> {
    Json(session.progress())
}
