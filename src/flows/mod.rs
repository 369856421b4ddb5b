//! User-facing actions composed from the API client, the poller and the
//! session store.

pub mod create;
pub mod dashboard;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::clock::{Clock, Sleeper, SystemClock, TokioSleeper};
use crate::services::poller::{PollConfig, Poller};
use crate::services::retry::RetryPolicy;
use crate::services::videos::{ensure_downloadable, ApiError, ByteStream, VideoApi};
use crate::session::SessionStore;

/// Everything a flow needs to talk to the outside world.
#[derive(Clone)]
pub struct Backend {
    pub api: Arc<dyn VideoApi>,
    pub clock: Arc<dyn Clock>,
    pub sleeper: Arc<dyn Sleeper>,
    pub retry: RetryPolicy,
    pub poll: PollConfig,
    pub page_size: u32,
}

impl Backend {
    pub fn new(api: Arc<dyn VideoApi>) -> Self {
        Self {
            api,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            retry: RetryPolicy::default(),
            poll: PollConfig::default(),
            page_size: 50,
        }
    }

    pub fn from_config(api: Arc<dyn VideoApi>, config: &AppConfig) -> Self {
        Self {
            retry: config.retry_policy(),
            poll: config.poll_config(),
            page_size: config.jobs_page_size.clamp(1, 100),
            ..Self::new(api)
        }
    }

    pub fn with_time(mut self, clock: Arc<dyn Clock>, sleeper: Arc<dyn Sleeper>) -> Self {
        self.clock = clock;
        self.sleeper = sleeper;
        self
    }

    pub fn poller(&self) -> Poller {
        Poller::new(
            self.poll,
            self.retry,
            self.clock.clone(),
            self.sleeper.clone(),
        )
    }
}

/// Open the rendered MP4 of `job_id`.
///
/// A cached terminal record is checked against the download window and
/// readiness first, so an expired or failed job costs no round trip. Jobs
/// this session has not seen, or last saw in flight, are fetched once to
/// learn their state.
pub async fn open_media(
    backend: &Backend,
    store: &mut SessionStore,
    job_id: &str,
) -> Result<ByteStream, ApiError> {
    let cached = store.get(job_id).filter(|r| r.status.is_terminal()).cloned();
    let record = match cached {
        Some(record) => record,
        None => {
            let fetched = match backend.api.get_status(job_id).await {
                Ok(fetched) => fetched,
                Err(ApiError::NotFound(id)) => {
                    store.remove(&id);
                    return Err(ApiError::NotFound(id));
                }
                Err(e) => return Err(e),
            };
            store
                .upsert(fetched.clone())
                .cloned()
                .unwrap_or(fetched)
        }
    };
    ensure_downloadable(&record, backend.clock.now())?;

    match backend.api.download(job_id).await {
        Err(ApiError::NotFound(id)) => {
            store.remove(&id);
            Err(ApiError::NotFound(id))
        }
        other => other,
    }
}
