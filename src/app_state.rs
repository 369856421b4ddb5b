use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{watch, MutexGuard, TryLockError};
use uuid::Uuid;

use crate::config::{AppConfig, ConfigError};
use crate::flows::dashboard::Dashboard;
use crate::flows::Backend;
use crate::services::poller::{CancelToken, PollObserver, PollState, ProgressUpdate};
use crate::services::videos::ApiError;
use crate::session::SessionStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// `None` when no API key is configured; every remote action then fails
    /// with a configuration error.
    pub backend: Option<Backend>,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(config: AppConfig, backend: Option<Backend>) -> Self {
        let sessions = SessionRegistry::new(config.session_cache_capacity);
        Self {
            config: Arc::new(config),
            backend,
            sessions: Arc::new(sessions),
        }
    }

    pub fn backend(&self) -> Result<&Backend, ApiError> {
        self.backend
            .as_ref()
            .ok_or(ApiError::Config(ConfigError::MissingApiKey))
    }
}

/// Mutable state of one browser session.
pub struct SessionState {
    pub store: SessionStore,
    pub dashboard: Dashboard,
}

/// Returned when a session already has an action in flight.
#[derive(Debug, thiserror::Error)]
#[error("another action is still running for this session")]
pub struct SessionBusy;

impl From<TryLockError> for SessionBusy {
    fn from(_: TryLockError) -> Self {
        SessionBusy
    }
}

/// One session: its state behind an async lock, plus the progress feed and
/// cancel slot, which stay reachable while an action holds the lock.
pub struct SessionHandle {
    pub id: Uuid,
    state: tokio::sync::Mutex<SessionState>,
    progress: watch::Sender<Option<ProgressUpdate>>,
    cancel: Mutex<Option<CancelToken>>,
    last_seen: Mutex<Instant>,
}

impl SessionHandle {
    fn new(id: Uuid, capacity: usize) -> Self {
        let (progress, _rx) = watch::channel(None);
        Self {
            id,
            state: tokio::sync::Mutex::new(SessionState {
                store: SessionStore::new(capacity),
                dashboard: Dashboard::new(),
            }),
            progress,
            cancel: Mutex::new(None),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// Exclusive access for one action; a second concurrent action is refused.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, SessionState>, SessionBusy> {
        Ok(self.state.try_lock()?)
    }

    pub fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    /// Latest progress of the poll in flight, if any.
    pub fn progress(&self) -> Option<ProgressUpdate> {
        self.progress.borrow().clone()
    }

    /// Start watching a job: installs a fresh cancel token and clears the
    /// previous progress.
    pub fn begin_watch(&self) -> CancelToken {
        let token = CancelToken::new();
        *self.cancel.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
        self.progress.send_replace(None);
        token
    }

    pub fn end_watch(&self) {
        self.cancel.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    /// Stop the poll in flight. Returns `false` when nothing was running.
    pub fn cancel_watch(&self) -> bool {
        match self.cancel.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Observer that publishes updates to [`SessionHandle::progress`].
    pub fn observer(&self) -> ProgressRelay<'_> {
        ProgressRelay {
            session: self.id,
            tx: &self.progress,
        }
    }
}

pub struct ProgressRelay<'a> {
    session: Uuid,
    tx: &'a watch::Sender<Option<ProgressUpdate>>,
}

impl PollObserver for ProgressRelay<'_> {
    fn on_progress(&mut self, update: &ProgressUpdate) {
        self.tx.send_replace(Some(update.clone()));
    }

    fn on_transition(&mut self, job_id: &str, from: PollState, to: PollState) {
        tracing::debug!(
            session = %self.session,
            job_id = %job_id,
            from = %from,
            to = %to,
            "Session poll transition"
        );
    }
}

/// All live sessions, keyed by the id echoed in `x-session-id`.
pub struct SessionRegistry {
    capacity: usize,
    sessions: Mutex<HashMap<Uuid, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Look up `id`, or start a new session when it is missing, malformed
    /// or unknown.
    pub fn resolve(&self, id: Option<&str>) -> Arc<SessionHandle> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let known = id
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
            .and_then(|id| sessions.get(&id).cloned());

        let handle = match known {
            Some(handle) => handle,
            None => {
                let id = Uuid::new_v4();
                let handle = Arc::new(SessionHandle::new(id, self.capacity));
                sessions.insert(id, handle.clone());
                metrics::gauge!("video_sessions_active").set(sessions.len() as f64);
                tracing::info!(session = %id, "Session started");
                handle
            }
        };
        handle.touch();
        handle
    }

    /// Drop sessions idle for longer than `ttl`. Their cached records go with
    /// them; remote jobs are untouched.
    pub fn purge_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|id, handle| {
            let keep = handle.idle_for() < ttl;
            if !keep {
                tracing::info!(session = %id, "Session expired");
            }
            keep
        });
        metrics::gauge!("video_sessions_active").set(sessions.len() as f64);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobStatus;

    #[test]
    fn test_resolve_reuses_known_sessions() {
        let registry = SessionRegistry::new(10);
        let first = registry.resolve(None);
        let again = registry.resolve(Some(&first.id.to_string()));
        assert_eq!(first.id, again.id);

        let fresh = registry.resolve(Some("not-a-uuid"));
        assert_ne!(fresh.id, first.id);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_purge_idle() {
        let registry = SessionRegistry::new(10);
        registry.resolve(None);
        assert_eq!(registry.purge_idle(Duration::from_secs(60)), 0);
        assert_eq!(registry.purge_idle(Duration::ZERO), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_second_action_is_busy() {
        let registry = SessionRegistry::new(10);
        let session = registry.resolve(None);
        let _guard = session.try_lock().unwrap();
        assert!(session.try_lock().is_err());
        // progress and cancel stay reachable
        assert!(session.progress().is_none());
        assert!(!session.cancel_watch());
    }

    #[test]
    fn test_watch_lifecycle() {
        let registry = SessionRegistry::new(10);
        let session = registry.resolve(None);
        let token = session.begin_watch();

        session.observer().on_progress(&ProgressUpdate {
            job_id: "video_1".to_string(),
            status: JobStatus::Running,
            percent: 40,
            label: "Rendering 40%".to_string(),
            elapsed_ms: 3000,
            attempt: 2,
        });
        assert_eq!(session.progress().unwrap().percent, 40);

        assert!(session.cancel_watch());
        assert!(token.is_cancelled());
        session.end_watch();
        assert!(!session.cancel_watch());
    }
}
