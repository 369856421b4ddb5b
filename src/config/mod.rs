use serde::Deserialize;
use std::time::Duration;

use crate::services::poller::PollConfig;
use crate::services::retry::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Videos API credential. Required for every network operation.
    #[serde(default)]
    pub openai_api_key: Option<String>,

    /// Optional base URL override (e.g. a proxy or a local mock).
    #[serde(default)]
    pub openai_base_url: Option<String>,

    /// HTTP front-end bind address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Initial delay between status queries.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Upper bound for the poll interval while a job makes no progress.
    #[serde(default = "default_poll_max_interval_secs")]
    pub poll_max_interval_secs: u64,

    /// Local wall-clock budget for one poll before it reports a timeout.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// Consecutive failed status queries tolerated before giving up.
    #[serde(default = "default_poll_max_retries")]
    pub poll_max_retries: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Job records kept per session before the oldest entries are evicted.
    #[serde(default = "default_session_cache_capacity")]
    pub session_cache_capacity: usize,

    #[serde(default = "default_jobs_page_size")]
    pub jobs_page_size: u32,

    #[serde(default = "default_session_idle_ttl_secs")]
    pub session_idle_ttl_secs: u64,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8501".to_string()
}

fn default_poll_interval_secs() -> u64 {
    3
}

fn default_poll_max_interval_secs() -> u64 {
    5
}

fn default_poll_timeout_secs() -> u64 {
    900
}

fn default_poll_max_retries() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_session_cache_capacity() -> usize {
    200
}

fn default_jobs_page_size() -> u32 {
    50
}

fn default_session_idle_ttl_secs() -> u64 {
    3600
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// The API credential, if one is configured and non-blank.
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.openai_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    pub fn base_url(&self) -> &str {
        self.openai_base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn session_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.session_idle_ttl_secs.max(60))
    }

    /// Poll policy with the interval clamped to 1..=60 seconds.
    pub fn poll_config(&self) -> PollConfig {
        let interval = self.poll_interval_secs.clamp(1, 60);
        let max_interval = self.poll_max_interval_secs.clamp(interval, 60);
        PollConfig {
            interval: Duration::from_secs(interval),
            max_interval: Duration::from_secs(max_interval),
            timeout: Duration::from_secs(self.poll_timeout_secs.max(interval)),
            max_status_retries: self.poll_max_retries,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.poll_max_retries,
            ..RetryPolicy::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY is not set; add it to the environment or a .env file")]
    MissingApiKey,
}
