use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::app_state::{AppState, SessionHandle, SessionState};
use crate::models::job::{JobRecord, JobStatus};
use crate::routes::AppError;
use crate::services::poller::PollOutcome;
use crate::session::{DateRange, ListFilter, StatusFilter};

/// One row of the jobs table.
#[derive(Serialize)]
pub struct JobRow {
    pub id: String,
    pub status: JobStatus,
    pub badge: &'static str,
    pub created_at: DateTime<Utc>,
    pub seconds: u32,
    pub size: String,
    pub model: String,
    pub progress: String,
    pub summary: String,
}

impl From<&JobRecord> for JobRow {
    fn from(job: &JobRecord) -> Self {
        Self {
            id: job.id.clone(),
            status: job.status,
            badge: job.status.badge(),
            created_at: job.created_at,
            seconds: job.duration,
            size: job.resolution.clone(),
            model: job.model.clone(),
            progress: job.progress_label(),
            summary: job.summary(),
        }
    }
}

#[derive(Serialize)]
pub struct JobsView {
    pub filter: ListFilter,
    pub has_more: bool,
    pub selected: Option<String>,
    pub pending_delete: Option<String>,
    pub jobs: Vec<JobRow>,
}

impl JobsView {
    fn of(state: &SessionState) -> Self {
        let dashboard = &state.dashboard;
        Self {
            filter: *dashboard.filter(),
            has_more: dashboard.has_more(),
            selected: dashboard.selected().map(str::to_string),
            pending_delete: dashboard.pending_delete().map(str::to_string),
            jobs: dashboard
                .visible(&state.store)
                .into_iter()
                .map(JobRow::from)
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    #[serde(default)]
    pub status: StatusFilter,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    #[serde(default)]
    pub refresh: bool,
}

/// GET /api/v1/jobs: filtered listing; fetches the first page when the
/// filter changed, nothing was loaded yet, or `refresh=true`.
pub async fn list(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<SessionHandle>>,
    Query(query): Query<JobsQuery>,
) -> Result<Json<JobsView>, AppError> {
    let backend = state.backend()?;
    let mut guard = session.try_lock()?;
    let SessionState { store, dashboard } = &mut *guard;

    dashboard.set_filter(ListFilter {
        status: query.status,
        dates: DateRange {
            start: query.start,
            end: query.end,
        },
    });
    if query.refresh {
        dashboard.refresh(backend, store).await?;
    } else {
        dashboard.ensure_loaded(backend, store).await?;
    }

    Ok(Json(JobsView::of(&guard)))
}

/// POST /api/v1/jobs/more: next page for the current filter.
pub async fn load_more(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<SessionHandle>>,
) -> Result<Json<JobsView>, AppError> {
    let backend = state.backend()?;
    let mut guard = session.try_lock()?;
    let SessionState { store, dashboard } = &mut *guard;
    dashboard.load_more(backend, store).await?;
    Ok(Json(JobsView::of(&guard)))
}

/// GET /api/v1/jobs/{id}: select a job and refresh its details.
pub async fn open(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<SessionHandle>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobRecord>, AppError> {
    let backend = state.backend()?;
    let mut guard = session.try_lock()?;
    let SessionState { store, dashboard } = &mut *guard;
    Ok(Json(dashboard.open(backend, store, &job_id).await?))
}

/// POST /api/v1/jobs/{id}/resume: poll an existing job again.
pub async fn resume(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<SessionHandle>>,
    Path(job_id): Path<String>,
) -> Result<Json<PollOutcome>, AppError> {
    let backend = state.backend()?;
    let mut guard = session.try_lock()?;
    let SessionState { store, dashboard } = &mut *guard;

    let cancel = session.begin_watch();
    let mut observer = session.observer();
    let outcome = dashboard
        .resume(backend, store, &job_id, &mut observer, &cancel)
        .await;
    session.end_watch();
    Ok(Json(outcome))
}

/// GET /api/v1/jobs/{id}/content: the rendered MP4, streamed through.
pub async fn content(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<SessionHandle>>,
    Path(job_id): Path<String>,
) -> Result<Response, AppError> {
    let backend = state.backend()?;
    let mut guard = session.try_lock()?;
    let SessionState { store, dashboard } = &mut *guard;
    let stream = dashboard.download(backend, store, &job_id).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{job_id}.mp4\""),
            ),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// GET /api/v1/jobs/{id}/metadata: the cached record as a JSON download.
pub async fn metadata(
    Extension(session): Extension<Arc<SessionHandle>>,
    Path(job_id): Path<String>,
) -> Result<Response, AppError> {
    let guard = session.try_lock()?;
    let value = guard.dashboard.metadata(&guard.store, &job_id)?;

    Ok((
        [(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{job_id}.json\""),
        )],
        Json(value),
    )
        .into_response())
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub job_id: String,
    pub deleted: bool,
    pub message: String,
}

/// POST /api/v1/jobs/{id}/delete: ask for confirmation before deleting.
pub async fn request_delete(
    Extension(session): Extension<Arc<SessionHandle>>,
    Path(job_id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let mut guard = session.try_lock()?;
    guard.dashboard.request_delete(&job_id);
    Ok(Json(DeleteResponse {
        job_id,
        deleted: false,
        message: "This will permanently delete the video. Confirm with DELETE.".to_string(),
    }))
}

/// DELETE /api/v1/jobs/{id}: confirmed delete, remote and local.
pub async fn confirm_delete(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<SessionHandle>>,
    Path(job_id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let backend = state.backend()?;
    let mut guard = session.try_lock()?;
    let SessionState { store, dashboard } = &mut *guard;
    dashboard.confirm_delete(backend, store, &job_id).await?;
    Ok(Json(DeleteResponse {
        job_id,
        deleted: true,
        message: "Video deleted.".to_string(),
    }))
}

/// POST /api/v1/jobs/delete/cancel: drop the pending delete.
pub async fn cancel_delete(
    Extension(session): Extension<Arc<SessionHandle>>,
) -> Result<Json<JobsView>, AppError> {
    let mut guard = session.try_lock()?;
    guard.dashboard.cancel_delete();
    Ok(Json(JobsView::of(&guard)))
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_recent")]
    pub limit: usize,
}

fn default_recent() -> usize {
    8
}

/// GET /api/v1/session/recent: jobs this session touched most recently.
pub async fn recent(
    Extension(session): Extension<Arc<SessionHandle>>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<JobRow>>, AppError> {
    let guard = session.try_lock()?;
    let rows = guard
        .store
        .recent(query.limit.min(50))
        .into_iter()
        .map(JobRow::from)
        .collect();
    Ok(Json(rows))
}
