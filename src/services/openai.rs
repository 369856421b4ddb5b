use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::{StreamExt, TryStreamExt};
use garde::Validate;
use reqwest::{multipart, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::config::AppConfig;
use crate::models::job::{extract_asset_url, progress_percent, JobError, JobRecord, JobStatus};
use crate::models::request::CreateVideoRequest;
use crate::services::videos::{ApiError, ByteStream, JobPage, ListQuery, VideoApi};

/// Client for the OpenAI videos API (`/v1/videos`).
pub struct OpenAiVideosClient {
    http: Client,
    base_url: String,
    api_key: String,
}

/// Video object as returned by the API. Only the fields the app reads are
/// typed; the whole object is kept as metadata.
#[derive(Deserialize)]
struct RemoteVideo {
    id: String,
    status: JobStatus,
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    seconds: Option<Seconds>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    error: Option<JobError>,
}

/// `seconds` arrives as `"8"` from the API and as `8` from some proxies.
#[derive(Deserialize)]
#[serde(untagged)]
enum Seconds {
    Number(u32),
    Text(String),
}

impl Seconds {
    fn value(&self) -> u32 {
        match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse().unwrap_or(0),
        }
    }
}

#[derive(Deserialize)]
struct RemotePage {
    #[serde(default)]
    data: Vec<serde_json::Value>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl OpenAiVideosClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(crate::config::ConfigError::MissingApiKey.into());
        }
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("prompt-to-video/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ApiError> {
        Self::new(config.api_key()?, config.base_url(), config.request_timeout())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `videos/{id}` plus an optional suffix. Ids are opaque but never carry
    /// path syntax; anything outside `[A-Za-z0-9_-]` is refused before a
    /// request is built.
    fn video_url(&self, job_id: &str, suffix: &str) -> Result<String, ApiError> {
        let valid = !job_id.is_empty()
            && job_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(ApiError::Validation(format!("invalid job id '{job_id}'")));
        }
        Ok(self.url(&format!("videos/{job_id}{suffix}")))
    }

    async fn send(&self, request: RequestBuilder, subject: &str) -> Result<Response, ApiError> {
        let response = request.bearer_auth(&self.api_key).send().await?;
        check_status(response, subject).await
    }

    async fn read_video(&self, response: Response) -> Result<JobRecord, ApiError> {
        let raw: serde_json::Value = response.json().await?;
        self.to_record(raw)
    }

    /// Convert a raw video object into a [`JobRecord`], enforcing that
    /// result fields exist only for succeeded jobs.
    fn to_record(&self, raw: serde_json::Value) -> Result<JobRecord, ApiError> {
        let video: RemoteVideo = serde_json::from_value(raw.clone())
            .map_err(|e| ApiError::UnexpectedResponse(format!("malformed video object: {e}")))?;

        let created_at = video
            .created_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(Utc::now);
        let content_url = self
            .video_url(&video.id, "/content")
            .map_err(|_| ApiError::UnexpectedResponse(format!("malformed video id '{}'", video.id)))?;
        let succeeded = video.status == JobStatus::Succeeded;
        let result_url = succeeded.then(|| extract_asset_url(&raw).unwrap_or(content_url));
        let error = match video.status {
            JobStatus::Failed => video.error.or_else(|| {
                Some(JobError {
                    code: None,
                    message: "generation failed without details".to_string(),
                })
            }),
            _ => None,
        };

        Ok(JobRecord {
            progress: progress_percent(&raw, video.status),
            id: video.id,
            status: video.status,
            created_at,
            prompt: video.prompt.unwrap_or_default(),
            model: video.model.unwrap_or_default(),
            duration: video.seconds.as_ref().map(Seconds::value).unwrap_or(0),
            resolution: video.size.unwrap_or_default(),
            reference_image: None,
            error,
            result_url,
            metadata: succeeded.then_some(raw),
        })
    }
}

/// Map a non-success response onto the error taxonomy.
async fn check_status(response: Response, subject: &str) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|envelope| envelope.error.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("{status}: {}", body.trim()));

    Err(match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ApiError::Validation(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Auth(message),
        StatusCode::NOT_FOUND => ApiError::NotFound(subject.to_string()),
        StatusCode::GONE => ApiError::Expired {
            job_id: subject.to_string(),
            expired_at: Utc::now(),
        },
        StatusCode::CONFLICT => ApiError::NotReady {
            job_id: subject.to_string(),
            status: JobStatus::Running,
        },
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited {
            retry_after,
            message,
        },
        StatusCode::REQUEST_TIMEOUT => ApiError::Transient(message),
        s if s.is_server_error() => ApiError::Transient(message),
        _ => ApiError::UnexpectedResponse(message),
    })
}

#[async_trait]
impl VideoApi for OpenAiVideosClient {
    async fn submit(&self, request: &CreateVideoRequest) -> Result<JobRecord, ApiError> {
        request.validate()?;

        let mut form = multipart::Form::new()
            .text("prompt", request.trimmed_prompt().to_string())
            .text("model", request.model.to_string())
            .text("seconds", request.seconds.to_string())
            .text("size", request.resolution.to_string());

        if let Some(image) = &request.reference_image {
            let part = multipart::Part::bytes(image.bytes.clone())
                .file_name(image.file_name.clone())
                .mime_str(image.mime_type())?;
            form = form.part("input_reference", part);
        }

        let response = self
            .send(self.http.post(self.url("videos")).multipart(form), "new video")
            .await?;
        let mut record = self.read_video(response).await?;

        if record.prompt.is_empty() {
            record.prompt = request.trimmed_prompt().to_string();
        }
        record.reference_image = request
            .reference_image
            .as_ref()
            .map(|image| image.file_name.clone());

        tracing::info!(job_id = %record.id, model = %record.model, "Video job submitted");
        Ok(record)
    }

    async fn get_status(&self, job_id: &str) -> Result<JobRecord, ApiError> {
        let response = self
            .send(self.http.get(self.video_url(job_id, "")?), job_id)
            .await?;
        self.read_video(response).await
    }

    async fn list_jobs(&self, query: &ListQuery) -> Result<JobPage, ApiError> {
        let mut params = vec![
            ("limit", query.limit.to_string()),
            ("order", query.order.to_string()),
        ];
        if let Some(after) = &query.after {
            params.push(("after", after.clone()));
        }
        if let Some(status) = query.status {
            params.push(("status", remote_status_name(status).to_string()));
        }

        let response = self
            .send(self.http.get(self.url("videos")).query(&params), "video list")
            .await?;
        let page: RemotePage = response.json().await?;

        let jobs = page
            .data
            .into_iter()
            .map(|raw| self.to_record(raw))
            .collect::<Result<Vec<_>, _>>()?;
        let next_cursor = if page.has_more {
            jobs.last().map(|job| job.id.clone())
        } else {
            None
        };

        tracing::debug!(count = jobs.len(), has_more = page.has_more, "Fetched video page");
        Ok(JobPage { jobs, next_cursor })
    }

    async fn download(&self, job_id: &str) -> Result<ByteStream, ApiError> {
        let response = self
            .send(self.http.get(self.video_url(job_id, "/content")?), job_id)
            .await?;
        Ok(response.bytes_stream().map_err(ApiError::from).boxed())
    }

    async fn delete(&self, job_id: &str) -> Result<(), ApiError> {
        self.send(self.http.delete(self.video_url(job_id, "")?), job_id)
            .await?;
        tracing::info!(job_id = %job_id, "Video job deleted");
        Ok(())
    }
}

/// Status spelling the list endpoint filters on.
fn remote_status_name(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "queued",
        JobStatus::Running => "in_progress",
        JobStatus::Succeeded => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
    }
}
