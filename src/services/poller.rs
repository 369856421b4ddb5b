//! Drives one job from submission to a terminal state.
//!
//! ```text
//! Idle ──start──▶ Polling ──succeeded──▶ Completed
//!                    │ ├────failed─────▶ Failed
//!                    │ ├──cancel/remote─▶ Cancelled
//!                    │ └──budget spent──▶ TimedOut
//! ```
//!
//! A [`Poller`] is consumed by [`Poller::run`], so a terminal state can never
//! be left. Resuming a job means building a fresh poller for the same id.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tokio::sync::watch;

use crate::models::job::{JobRecord, JobStatus};
use crate::services::clock::{elapsed_between, Clock, Sleeper};
use crate::services::retry::RetryPolicy;
use crate::services::videos::{ApiError, ErrorKind, VideoApi};
use crate::session::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollConfig {
    /// First delay between status queries.
    pub interval: Duration,
    /// Ceiling the interval backs off to while nothing changes.
    pub max_interval: Duration,
    /// Local wall-clock budget; exceeding it yields `TimedOut`.
    pub timeout: Duration,
    /// Consecutive retryable failures tolerated per poll.
    pub max_status_retries: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(900),
            max_status_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PollState {
    Idle,
    Polling,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Idle | Self::Polling)
    }
}

/// Snapshot emitted after every accepted status response.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressUpdate {
    pub job_id: String,
    pub status: JobStatus,
    pub percent: u8,
    pub label: String,
    pub elapsed_ms: u64,
    /// Status queries issued so far, including failed ones.
    pub attempt: u32,
}

/// Callbacks fired by the poller; rendering is the observer's business.
pub trait PollObserver: Send {
    fn on_progress(&mut self, update: &ProgressUpdate);

    fn on_transition(&mut self, _job_id: &str, _from: PollState, _to: PollState) {}
}

/// Observer that discards everything.
pub struct NoopObserver;

impl PollObserver for NoopObserver {
    fn on_progress(&mut self, _update: &ProgressUpdate) {}
}

/// Cooperative cancellation flag shared between a poll and whoever may stop
/// it. Cancelling never touches the remote job.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelOrigin {
    /// The user stopped watching; the remote job keeps running.
    Caller,
    /// The remote service reports the job as cancelled.
    Remote,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum FailureCause {
    /// The job itself failed remotely.
    Remote {
        code: Option<String>,
        message: String,
    },
    /// Status queries kept failing; the job may still be fine.
    Network { attempts: u32, message: String },
    /// A non-retryable API error (auth, not found, malformed response).
    Api { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PollOutcome {
    Completed {
        job: JobRecord,
        elapsed_ms: u64,
    },
    Failed {
        job_id: String,
        cause: FailureCause,
        last: Option<JobRecord>,
    },
    TimedOut {
        job_id: String,
        elapsed_ms: u64,
        last: Option<JobRecord>,
    },
    Cancelled {
        job_id: String,
        origin: CancelOrigin,
        last: Option<JobRecord>,
    },
}

impl PollOutcome {
    pub fn state(&self) -> PollState {
        match self {
            Self::Completed { .. } => PollState::Completed,
            Self::Failed { .. } => PollState::Failed,
            Self::TimedOut { .. } => PollState::TimedOut,
            Self::Cancelled { .. } => PollState::Cancelled,
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            Self::Completed { job, .. } => &job.id,
            Self::Failed { job_id, .. }
            | Self::TimedOut { job_id, .. }
            | Self::Cancelled { job_id, .. } => job_id,
        }
    }

    /// The most recent record seen, if any.
    pub fn job(&self) -> Option<&JobRecord> {
        match self {
            Self::Completed { job, .. } => Some(job),
            Self::Failed { last, .. } | Self::TimedOut { last, .. } | Self::Cancelled { last, .. } => {
                last.as_ref()
            }
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Self::Completed { job, .. } => format!("Job {} is ready", job.id),
            Self::Failed { job_id, cause, .. } => match cause {
                FailureCause::Remote { message, .. } => format!("Job {job_id} failed: {message}"),
                FailureCause::Network { attempts, message } => format!(
                    "Lost contact with job {job_id} after {attempts} attempts: {message}"
                ),
                FailureCause::Api { message, .. } => format!("Job {job_id}: {message}"),
            },
            Self::TimedOut { job_id, elapsed_ms, .. } => format!(
                "Stopped watching job {job_id} after {}s; it may still finish",
                elapsed_ms / 1000
            ),
            Self::Cancelled { job_id, origin, .. } => match origin {
                CancelOrigin::Caller => format!("Stopped watching job {job_id}"),
                CancelOrigin::Remote => format!("Job {job_id} was cancelled"),
            },
        }
    }
}

pub struct Poller {
    config: PollConfig,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    state: PollState,
}

impl Poller {
    pub fn new(
        config: PollConfig,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            config,
            retry,
            clock,
            sleeper,
            state: PollState::Idle,
        }
    }

    fn transition(&mut self, job_id: &str, to: PollState, observer: &mut dyn PollObserver) {
        let from = self.state;
        debug_assert!(!from.is_terminal(), "poller left terminal state {from}");
        self.state = to;
        tracing::debug!(job_id = %job_id, from = %from, to = %to, "Poll state change");
        observer.on_transition(job_id, from, to);
    }

    fn elapsed(&self, started: DateTime<Utc>) -> Duration {
        elapsed_between(started, self.clock.now())
    }

    /// Wait for `delay` unless cancelled first.
    async fn pause(&self, delay: Duration, cancel: &CancelToken) {
        tokio::select! {
            _ = self.sleeper.sleep(delay) => {}
            _ = cancel.cancelled() => {}
        }
    }

    /// Poll `job_id` until it reaches a terminal state, the budget runs out,
    /// or `cancel` fires. Every snapshot is merged into `store`.
    pub async fn run(
        mut self,
        api: &dyn VideoApi,
        job_id: &str,
        store: &mut SessionStore,
        observer: &mut dyn PollObserver,
        cancel: &CancelToken,
    ) -> PollOutcome {
        let started = self.clock.now();
        self.transition(job_id, PollState::Polling, observer);

        let mut interval = self.config.interval;
        let mut attempt: u32 = 0;
        let mut failures: u32 = 0;
        let mut last_seen: Option<(JobStatus, u8)> = None;

        let outcome = loop {
            if cancel.is_cancelled() {
                break PollOutcome::Cancelled {
                    job_id: job_id.to_string(),
                    origin: CancelOrigin::Caller,
                    last: store.get(job_id).cloned(),
                };
            }

            attempt += 1;
            let snapshot = match api.get_status(job_id).await {
                Ok(snapshot) => {
                    failures = 0;
                    snapshot
                }
                Err(e) if e.is_retryable() && failures < self.config.max_status_retries => {
                    failures += 1;
                    let delay = self.retry.delay_for(failures, &e);
                    tracing::warn!(
                        job_id = %job_id,
                        error = %e,
                        failures = failures,
                        "Status query failed, retrying"
                    );
                    if let Some(timed_out) = self.check_budget(job_id, started, store) {
                        break timed_out;
                    }
                    let remaining = self.config.timeout.saturating_sub(self.elapsed(started));
                    self.pause(delay.min(remaining), cancel).await;
                    continue;
                }
                Err(e) => break self.failure(job_id, e, failures + 1, store),
            };

            let accepted = store
                .get(job_id)
                .map_or(true, |cached| cached.accepts(&snapshot));
            let job = match store.upsert(snapshot) {
                Some(job) => job.clone(),
                // Evicted immediately only with a zero-capacity store.
                None => break PollOutcome::Failed {
                    job_id: job_id.to_string(),
                    cause: FailureCause::Api {
                        kind: ErrorKind::UnexpectedResponse,
                        message: "session store cannot hold the job".to_string(),
                    },
                    last: None,
                },
            };

            let elapsed = self.elapsed(started);
            let changed = last_seen != Some((job.status, job.progress));
            last_seen = Some((job.status, job.progress));
            // a stale snapshot leaves the record as it was and stays silent
            if accepted {
                observer.on_progress(&ProgressUpdate {
                    job_id: job.id.clone(),
                    status: job.status,
                    percent: job.progress,
                    label: job.progress_label(),
                    elapsed_ms: elapsed.as_millis() as u64,
                    attempt,
                });
            }

            match job.status {
                JobStatus::Succeeded => {
                    break PollOutcome::Completed {
                        job,
                        elapsed_ms: elapsed.as_millis() as u64,
                    }
                }
                JobStatus::Failed => {
                    let (code, message) = job
                        .error
                        .as_ref()
                        .map(|e| (e.code.clone(), e.message.clone()))
                        .unwrap_or((None, "generation failed".to_string()));
                    break PollOutcome::Failed {
                        job_id: job_id.to_string(),
                        cause: FailureCause::Remote { code, message },
                        last: Some(job),
                    };
                }
                JobStatus::Cancelled => {
                    break PollOutcome::Cancelled {
                        job_id: job_id.to_string(),
                        origin: CancelOrigin::Remote,
                        last: Some(job),
                    }
                }
                JobStatus::Queued | JobStatus::Running => {}
            }

            if let Some(timed_out) = self.check_budget(job_id, started, store) {
                break timed_out;
            }

            interval = if changed {
                self.config.interval
            } else {
                interval.mul_f64(1.5).min(self.config.max_interval)
            };
            let remaining = self.config.timeout.saturating_sub(elapsed);
            self.pause(interval.min(remaining), cancel).await;
        };

        self.transition(job_id, outcome.state(), observer);
        record_outcome(&outcome);
        outcome
    }

    fn check_budget(
        &self,
        job_id: &str,
        started: DateTime<Utc>,
        store: &SessionStore,
    ) -> Option<PollOutcome> {
        let elapsed = self.elapsed(started);
        (elapsed >= self.config.timeout).then(|| PollOutcome::TimedOut {
            job_id: job_id.to_string(),
            elapsed_ms: elapsed.as_millis() as u64,
            last: store.get(job_id).cloned(),
        })
    }

    fn failure(
        &self,
        job_id: &str,
        error: ApiError,
        attempts: u32,
        store: &mut SessionStore,
    ) -> PollOutcome {
        if matches!(error, ApiError::NotFound(_)) {
            store.remove(job_id);
        }
        let cause = if error.is_retryable() {
            FailureCause::Network {
                attempts,
                message: error.to_string(),
            }
        } else {
            FailureCause::Api {
                kind: error.kind(),
                message: error.to_string(),
            }
        };
        PollOutcome::Failed {
            job_id: job_id.to_string(),
            cause,
            last: store.get(job_id).cloned(),
        }
    }
}

fn record_outcome(outcome: &PollOutcome) {
    match outcome {
        PollOutcome::Completed { job, elapsed_ms } => {
            metrics::counter!("video_jobs_completed_total").increment(1);
            metrics::histogram!("video_render_seconds").record(*elapsed_ms as f64 / 1000.0);
            tracing::info!(job_id = %job.id, elapsed_ms = elapsed_ms, "Video job completed");
        }
        PollOutcome::Failed { job_id, cause, .. } => {
            metrics::counter!("video_jobs_failed_total").increment(1);
            tracing::warn!(job_id = %job_id, cause = ?cause, "Video job failed");
        }
        PollOutcome::TimedOut { job_id, elapsed_ms, .. } => {
            metrics::counter!("video_poll_timeouts_total").increment(1);
            tracing::warn!(job_id = %job_id, elapsed_ms = elapsed_ms, "Polling timed out");
        }
        PollOutcome::Cancelled { job_id, origin, .. } => {
            metrics::counter!("video_poll_cancelled_total").increment(1);
            tracing::info!(job_id = %job_id, origin = ?origin, "Polling cancelled");
        }
    }
}
