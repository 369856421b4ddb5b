//! In-memory `VideoApi` used by unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::models::job::{JobRecord, JobStatus};
use crate::models::request::CreateVideoRequest;
use crate::services::poller::CancelToken;
use crate::services::videos::{ApiError, ByteStream, JobPage, ListQuery, VideoApi};

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// A record created `minute_offset` minutes after [`base_time`].
pub fn job(id: &str, status: JobStatus, minute_offset: i64) -> JobRecord {
    let succeeded = status == JobStatus::Succeeded;
    JobRecord {
        id: id.to_string(),
        status,
        created_at: base_time() + Duration::minutes(minute_offset),
        prompt: format!("prompt for {id}"),
        model: "sora-2".to_string(),
        duration: 8,
        resolution: "1280x720".to_string(),
        reference_image: None,
        progress: if succeeded { 100 } else { 0 },
        error: None,
        result_url: succeeded.then(|| format!("https://cdn.test/{id}.mp4")),
        metadata: succeeded.then(|| serde_json::json!({ "id": id, "status": "completed" })),
    }
}

/// Canned response for one call.
#[derive(Debug, Clone, PartialEq)]
pub enum Scripted {
    Status(JobStatus, u8),
    Transient,
    NotFound,
    RateLimited,
    Auth,
}

impl Scripted {
    fn into_error(self, job_id: &str) -> ApiError {
        match self {
            Self::NotFound => ApiError::NotFound(job_id.to_string()),
            Self::RateLimited => ApiError::RateLimited {
                retry_after: None,
                message: "slow down".to_string(),
            },
            Self::Auth => ApiError::Auth("invalid api key".to_string()),
            Self::Transient | Self::Status(..) => ApiError::Transient("502 Bad Gateway".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Calls {
    pub submit: u32,
    pub get_status: u32,
    pub list: u32,
    pub download: u32,
    pub delete: u32,
}

#[derive(Default)]
struct FakeState {
    jobs: Vec<JobRecord>,
    scripts: HashMap<String, VecDeque<Scripted>>,
    submit_failures: VecDeque<Scripted>,
    delete_failures: VecDeque<Scripted>,
    calls: Calls,
    cancel_after: Option<(u32, CancelToken)>,
}

/// Remote job table kept in memory.
///
/// Scripted status responses are served before falling back to the stored
/// record and never mutate it, so tests can check that the remote side was
/// left alone.
#[derive(Default)]
pub struct FakeVideoApi {
    state: Mutex<FakeState>,
}

impl FakeVideoApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn insert(&self, record: JobRecord) {
        let mut state = self.state();
        state.jobs.retain(|j| j.id != record.id);
        state.jobs.push(record);
    }

    pub fn remote(&self, id: &str) -> Option<JobRecord> {
        self.state().jobs.iter().find(|j| j.id == id).cloned()
    }

    pub fn script(&self, id: &str, responses: Vec<Scripted>) {
        self.state()
            .scripts
            .insert(id.to_string(), responses.into_iter().collect());
    }

    pub fn fail_submits(&self, failures: Vec<Scripted>) {
        self.state().submit_failures = failures.into_iter().collect();
    }

    pub fn fail_deletes(&self, failures: Vec<Scripted>) {
        self.state().delete_failures = failures.into_iter().collect();
    }

    /// Fire `token` once `n` status queries have been answered.
    pub fn cancel_after_status_calls(&self, n: u32, token: CancelToken) {
        self.state().cancel_after = Some((n, token));
    }

    pub fn calls(&self) -> Calls {
        self.state().calls.clone()
    }
}

fn snapshot(mut record: JobRecord, status: JobStatus, progress: u8) -> JobRecord {
    let succeeded = status == JobStatus::Succeeded;
    record.status = status;
    record.progress = progress;
    record.result_url = succeeded.then(|| format!("https://cdn.test/{}.mp4", record.id));
    record.metadata = succeeded.then(|| serde_json::json!({ "id": record.id }));
    record
}

#[async_trait]
impl VideoApi for FakeVideoApi {
    async fn submit(&self, request: &CreateVideoRequest) -> Result<JobRecord, ApiError> {
        let mut state = self.state();
        state.calls.submit += 1;
        if let Some(failure) = state.submit_failures.pop_front() {
            return Err(failure.into_error("new video"));
        }

        let n = state.jobs.len() as i64;
        let mut record = job(&format!("video_new_{}", state.calls.submit), JobStatus::Queued, n);
        record.prompt = request.trimmed_prompt().to_string();
        record.model = request.model.to_string();
        record.duration = request.seconds;
        record.resolution = request.resolution.to_string();
        record.reference_image = request
            .reference_image
            .as_ref()
            .map(|image| image.file_name.clone());
        state.jobs.push(record.clone());
        Ok(record)
    }

    async fn get_status(&self, job_id: &str) -> Result<JobRecord, ApiError> {
        let mut state = self.state();
        state.calls.get_status += 1;
        let answered = state.calls.get_status;
        if let Some((n, token)) = &state.cancel_after {
            if answered >= *n {
                token.cancel();
            }
        }

        let stored = state.jobs.iter().find(|j| j.id == job_id).cloned();
        let scripted = state.scripts.get_mut(job_id).and_then(VecDeque::pop_front);
        match (scripted, stored) {
            (Some(Scripted::Status(status, progress)), Some(record)) => {
                Ok(snapshot(record, status, progress))
            }
            (Some(Scripted::Status(..)), None) | (None, None) => {
                Err(ApiError::NotFound(job_id.to_string()))
            }
            (Some(failure), _) => Err(failure.into_error(job_id)),
            (None, Some(record)) => Ok(record),
        }
    }

    async fn list_jobs(&self, query: &ListQuery) -> Result<JobPage, ApiError> {
        let mut state = self.state();
        state.calls.list += 1;

        let mut ordered: Vec<(usize, &JobRecord)> = state
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| query.status.map_or(true, |s| j.status == s))
            .collect();
        ordered.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));

        let start = match &query.after {
            Some(cursor) => ordered
                .iter()
                .position(|(_, j)| &j.id == cursor)
                .map_or(ordered.len(), |p| p + 1),
            None => 0,
        };
        let jobs: Vec<JobRecord> = ordered
            .iter()
            .skip(start)
            .take(query.limit as usize)
            .map(|(_, j)| (*j).clone())
            .collect();
        let has_more = start + jobs.len() < ordered.len();
        let next_cursor = if has_more {
            jobs.last().map(|j| j.id.clone())
        } else {
            None
        };
        Ok(JobPage { jobs, next_cursor })
    }

    async fn download(&self, job_id: &str) -> Result<ByteStream, ApiError> {
        let mut state = self.state();
        state.calls.download += 1;
        let record = state
            .jobs
            .iter()
            .find(|j| j.id == job_id)
            .ok_or_else(|| ApiError::NotFound(job_id.to_string()))?;
        if record.status != JobStatus::Succeeded {
            return Err(ApiError::NotReady {
                job_id: job_id.to_string(),
                status: record.status,
            });
        }
        let chunks = vec![
            Ok(Bytes::from_static(b"\x00\x00\x00\x18ftypmp42")),
            Ok(Bytes::from(job_id.to_string())),
        ];
        Ok(stream::iter(chunks).boxed())
    }

    async fn delete(&self, job_id: &str) -> Result<(), ApiError> {
        let mut state = self.state();
        state.calls.delete += 1;
        if let Some(failure) = state.delete_failures.pop_front() {
            return Err(failure.into_error(job_id));
        }
        let before = state.jobs.len();
        state.jobs.retain(|j| j.id != job_id);
        if state.jobs.len() == before {
            return Err(ApiError::NotFound(job_id.to_string()));
        }
        Ok(())
    }
}
