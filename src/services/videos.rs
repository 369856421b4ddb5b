//! Contract for the hosted videos API.
//!
//! [`VideoApi`] is the seam between the flows and the network: the
//! production implementation lives in [`crate::services::openai`], tests
//! substitute an in-memory fake.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumString};

use crate::config::ConfigError;
use crate::models::job::{JobRecord, JobStatus};
use crate::models::request::CreateVideoRequest;

/// Rendered media, delivered chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes, ApiError>>;

#[async_trait]
pub trait VideoApi: Send + Sync {
    /// Create a generation job. Fails with [`ApiError::Validation`] before any
    /// network I/O when the request is invalid.
    async fn submit(&self, request: &CreateVideoRequest) -> Result<JobRecord, ApiError>;

    /// Fetch the current snapshot of one job.
    async fn get_status(&self, job_id: &str) -> Result<JobRecord, ApiError>;

    /// Fetch one page of jobs.
    async fn list_jobs(&self, query: &ListQuery) -> Result<JobPage, ApiError>;

    /// Stream the rendered MP4 of a finished job.
    async fn download(&self, job_id: &str) -> Result<ByteStream, ApiError>;

    /// Delete a job remotely. [`ApiError::NotFound`] if it was already gone.
    async fn delete(&self, job_id: &str) -> Result<(), ApiError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, EnumString, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Parameters for one page of `list_jobs`.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    /// Opaque continuation cursor: the last id of the previous page.
    pub after: Option<String>,
    pub limit: u32,
    pub order: SortOrder,
    /// Optional server-side status filter.
    pub status: Option<JobStatus>,
}

impl ListQuery {
    pub fn first_page(limit: u32) -> Self {
        Self {
            after: None,
            limit: limit.clamp(1, 100),
            order: SortOrder::Desc,
            status: None,
        }
    }

    pub fn with_status(mut self, status: Option<JobStatus>) -> Self {
        self.status = status;
        self
    }

    pub fn after(mut self, cursor: Option<String>) -> Self {
        self.after = cursor;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobPage {
    pub jobs: Vec<JobRecord>,
    /// Cursor for the following page, `None` on the last one.
    pub next_cursor: Option<String>,
}

/// Walk every page starting at `query`, one round trip per page.
///
/// The stream is lazy (nothing is fetched until polled), finite (it stops
/// after a page without a cursor or without jobs) and restartable: calling
/// this again with the same query starts over.
pub fn job_stream<'a>(
    api: &'a dyn VideoApi,
    query: ListQuery,
) -> impl Stream<Item = Result<JobRecord, ApiError>> + Send + 'a {
    stream::try_unfold(Some(query), move |next| async move {
        let Some(query) = next else {
            return Ok::<_, ApiError>(None);
        };
        let page = api.list_jobs(&query).await?;
        let following = match page.next_cursor {
            Some(cursor) if !page.jobs.is_empty() => Some(query.after(Some(cursor))),
            _ => None,
        };
        let items = stream::iter(page.jobs.into_iter().map(Ok::<_, ApiError>));
        Ok(Some((items, following)))
    })
    .try_flatten()
}

/// Check the download preconditions for `job` at instant `now`.
pub fn ensure_downloadable(job: &JobRecord, now: DateTime<Utc>) -> Result<(), ApiError> {
    if job.status != JobStatus::Succeeded {
        return Err(ApiError::NotReady {
            job_id: job.id.clone(),
            status: job.status,
        });
    }
    if job.is_download_expired(now) {
        return Err(ApiError::Expired {
            job_id: job.id.clone(),
            expired_at: job.download_expires_at(),
        });
    }
    Ok(())
}

/// Stable, serializable classification of an [`ApiError`].
#[derive(Debug, Clone, Copy, Serialize, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Auth,
    RateLimited,
    Transient,
    NotFound,
    Expired,
    NotReady,
    Config,
    UnexpectedResponse,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited by the videos API: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("Videos API temporarily unavailable: {0}")]
    Transient(String),

    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Job {0} not found")]
    NotFound(String),

    #[error("Download window for job {job_id} closed at {expired_at}")]
    Expired {
        job_id: String,
        expired_at: DateTime<Utc>,
    },

    #[error("Job {job_id} is {status}; media is available once it has succeeded")]
    NotReady { job_id: String, status: JobStatus },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Unexpected response from videos API: {0}")]
    UnexpectedResponse(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Auth(_) => ErrorKind::Auth,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Transient(_) | Self::Network(_) => ErrorKind::Transient,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Expired { .. } => ErrorKind::Expired,
            Self::NotReady { .. } => ErrorKind::NotReady,
            Self::Config(_) => ErrorKind::Config,
            Self::UnexpectedResponse(_) => ErrorKind::UnexpectedResponse,
        }
    }

    /// Whether retrying the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transient | ErrorKind::RateLimited
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<garde::Report> for ApiError {
    fn from(report: garde::Report) -> Self {
        Self::Validation(report.to_string())
    }
}
