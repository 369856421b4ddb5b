//! Jobs dashboard: browse, filter and manage the jobs of one session.

use serde::Serialize;

use crate::flows::{open_media, Backend};
use crate::models::job::JobRecord;
use crate::services::poller::{CancelToken, PollObserver, PollOutcome};
use crate::services::retry::{retryable, with_retry};
use crate::services::videos::{ApiError, ByteStream, ListQuery};
use crate::session::{ListFilter, SessionStore};

/// Paging, selection and pending-delete state of the dashboard.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Dashboard {
    filter: ListFilter,
    loaded_filter: Option<ListFilter>,
    cursor: Option<String>,
    has_more: bool,
    selected: Option<String>,
    pending_delete: Option<String>,
}

impl Dashboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(&self) -> &ListFilter {
        &self.filter
    }

    pub fn set_filter(&mut self, filter: ListFilter) {
        self.filter = filter;
    }

    /// True before the first load and whenever the filter changed since.
    pub fn needs_refresh(&self) -> bool {
        self.loaded_filter.as_ref() != Some(&self.filter)
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn pending_delete(&self) -> Option<&str> {
        self.pending_delete.as_deref()
    }

    /// Records matching the current filter, newest first.
    pub fn visible<'s>(&self, store: &'s SessionStore) -> Vec<&'s JobRecord> {
        store.list(&self.filter)
    }

    /// Fetch the first page for the current filter, dropping the cursor.
    pub async fn refresh(
        &mut self,
        backend: &Backend,
        store: &mut SessionStore,
    ) -> Result<usize, ApiError> {
        let query = ListQuery::first_page(backend.page_size)
            .with_status(self.filter.status.remote_status());
        self.fetch(backend, store, query).await
    }

    /// Fetch the next page. Without a cursor this is a no-op.
    pub async fn load_more(
        &mut self,
        backend: &Backend,
        store: &mut SessionStore,
    ) -> Result<usize, ApiError> {
        let Some(cursor) = self.cursor.clone().filter(|_| self.has_more) else {
            return Ok(0);
        };
        let query = ListQuery::first_page(backend.page_size)
            .with_status(self.filter.status.remote_status())
            .after(Some(cursor));
        self.fetch(backend, store, query).await
    }

    /// Refresh only when [`Dashboard::needs_refresh`] says so.
    pub async fn ensure_loaded(
        &mut self,
        backend: &Backend,
        store: &mut SessionStore,
    ) -> Result<usize, ApiError> {
        if self.needs_refresh() {
            return self.refresh(backend, store).await;
        }
        Ok(0)
    }

    async fn fetch(
        &mut self,
        backend: &Backend,
        store: &mut SessionStore,
        query: ListQuery,
    ) -> Result<usize, ApiError> {
        let api = backend.api.as_ref();
        let page = with_retry(&backend.retry, backend.sleeper.as_ref(), retryable, || {
            api.list_jobs(&query)
        })
        .await?;

        let count = page.jobs.len();
        for job in page.jobs {
            store.upsert(job);
        }
        self.has_more = page.next_cursor.is_some() && count > 0;
        self.cursor = page.next_cursor;
        self.loaded_filter = Some(self.filter);
        tracing::debug!(count = count, has_more = self.has_more, "Loaded jobs page");
        Ok(count)
    }

    /// Select `job_id` and refresh its record from the API.
    pub async fn open(
        &mut self,
        backend: &Backend,
        store: &mut SessionStore,
        job_id: &str,
    ) -> Result<JobRecord, ApiError> {
        let api = backend.api.as_ref();
        let fetched = with_retry(&backend.retry, backend.sleeper.as_ref(), retryable, || {
            api.get_status(job_id)
        })
        .await;

        match fetched {
            Ok(record) => {
                self.selected = Some(job_id.to_string());
                Ok(store.upsert(record.clone()).cloned().unwrap_or(record))
            }
            Err(ApiError::NotFound(id)) => {
                self.forget(store, &id);
                Err(ApiError::NotFound(id))
            }
            Err(e) => Err(e),
        }
    }

    /// Select `job_id` and poll it again until it settles.
    pub async fn resume(
        &mut self,
        backend: &Backend,
        store: &mut SessionStore,
        job_id: &str,
        observer: &mut dyn PollObserver,
        cancel: &CancelToken,
    ) -> PollOutcome {
        self.selected = Some(job_id.to_string());
        backend
            .poller()
            .run(backend.api.as_ref(), job_id, store, observer, cancel)
            .await
    }

    pub async fn download(
        &mut self,
        backend: &Backend,
        store: &mut SessionStore,
        job_id: &str,
    ) -> Result<ByteStream, ApiError> {
        self.selected = Some(job_id.to_string());
        open_media(backend, store, job_id).await
    }

    /// The cached record as JSON, for the metadata download.
    pub fn metadata(&self, store: &SessionStore, job_id: &str) -> Result<serde_json::Value, ApiError> {
        let record = store
            .get(job_id)
            .ok_or_else(|| ApiError::NotFound(job_id.to_string()))?;
        serde_json::to_value(record).map_err(|e| ApiError::UnexpectedResponse(e.to_string()))
    }

    /// First step of a delete: remember which job awaits confirmation.
    pub fn request_delete(&mut self, job_id: &str) {
        self.selected = Some(job_id.to_string());
        self.pending_delete = Some(job_id.to_string());
    }

    pub fn cancel_delete(&mut self) {
        self.pending_delete = None;
    }

    /// Second step of a delete. The job must be the one awaiting
    /// confirmation; a job already gone remotely counts as deleted.
    pub async fn confirm_delete(
        &mut self,
        backend: &Backend,
        store: &mut SessionStore,
        job_id: &str,
    ) -> Result<(), ApiError> {
        if self.pending_delete.as_deref() != Some(job_id) {
            return Err(ApiError::Validation(format!(
                "delete of job {job_id} was not requested"
            )));
        }
        self.pending_delete = None;

        match backend.api.delete(job_id).await {
            Ok(()) => {}
            Err(ApiError::NotFound(_)) => {
                tracing::info!(job_id = %job_id, "Job already gone remotely");
            }
            Err(e) => return Err(e),
        }
        self.forget(store, job_id);
        Ok(())
    }

    fn forget(&mut self, store: &mut SessionStore, job_id: &str) {
        store.remove(job_id);
        if self.selected.as_deref() == Some(job_id) {
            self.selected = None;
        }
        if self.pending_delete.as_deref() == Some(job_id) {
            self.pending_delete = None;
        }
    }
}
