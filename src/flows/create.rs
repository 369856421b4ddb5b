use garde::Validate;
use serde::Serialize;

use crate::flows::{open_media, Backend};
use crate::models::job::JobRecord;
use crate::models::request::CreateVideoRequest;
use crate::services::poller::{CancelToken, PollObserver, PollOutcome};
use crate::services::retry::{rate_limited_only, with_retry};
use crate::services::videos::{ApiError, ByteStream};
use crate::session::SessionStore;

/// Result of one create action: the job as first accepted and how watching
/// it ended.
#[derive(Debug, Clone, Serialize)]
pub struct CreateOutcome {
    pub submitted: JobRecord,
    pub outcome: PollOutcome,
}

/// Validate `request`, submit it and poll the new job to a terminal state.
///
/// An invalid request fails with [`ApiError::Validation`] without touching
/// the API. Submission is retried only when rate limited, so a lost
/// response never creates a second job.
pub async fn create_video(
    backend: &Backend,
    store: &mut SessionStore,
    request: &CreateVideoRequest,
    observer: &mut dyn PollObserver,
    cancel: &CancelToken,
) -> Result<CreateOutcome, ApiError> {
    let submitted = submit(backend, store, request).await?;
    let outcome = backend
        .poller()
        .run(backend.api.as_ref(), &submitted.id, store, observer, cancel)
        .await;
    Ok(CreateOutcome { submitted, outcome })
}

/// Validate and submit without polling; the job is cached in `store`.
pub async fn submit(
    backend: &Backend,
    store: &mut SessionStore,
    request: &CreateVideoRequest,
) -> Result<JobRecord, ApiError> {
    request.validate()?;

    let api = backend.api.as_ref();
    let submitted = with_retry(
        &backend.retry,
        backend.sleeper.as_ref(),
        rate_limited_only,
        || api.submit(request),
    )
    .await?;

    metrics::counter!("video_jobs_submitted_total").increment(1);
    tracing::info!(
        job_id = %submitted.id,
        model = %request.model,
        seconds = request.seconds,
        size = %request.resolution,
        "Video job accepted"
    );
    store.upsert(submitted.clone());
    Ok(submitted)
}

/// Rendered media for a job that completed through [`create_video`].
pub async fn fetch_media(
    backend: &Backend,
    store: &mut SessionStore,
    outcome: &CreateOutcome,
) -> Result<ByteStream, ApiError> {
    open_media(backend, store, outcome.outcome.job_id()).await
}
