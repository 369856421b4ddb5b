//! Per-session cache of job records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::job::{JobRecord, JobStatus};

/// Status filter offered by the dashboard.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, Display, EnumString, PartialEq, Eq, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum StatusFilter {
    #[default]
    All,
    /// Queued or running.
    #[strum(to_string = "in_progress", serialize = "in-progress")]
    InProgress,
    #[strum(to_string = "succeeded", serialize = "completed")]
    #[serde(alias = "completed")]
    Succeeded,
    Failed,
    Cancelled,
}

impl StatusFilter {
    pub fn matches(&self, status: JobStatus) -> bool {
        match self {
            Self::All => true,
            Self::InProgress => status.is_active(),
            Self::Succeeded => status == JobStatus::Succeeded,
            Self::Failed => status == JobStatus::Failed,
            Self::Cancelled => status == JobStatus::Cancelled,
        }
    }

    /// Narrowest status the remote list endpoint can filter on.
    pub fn remote_status(&self) -> Option<JobStatus> {
        match self {
            Self::All => None,
            Self::InProgress => Some(JobStatus::Running),
            Self::Succeeded => Some(JobStatus::Succeeded),
            Self::Failed => Some(JobStatus::Failed),
            Self::Cancelled => Some(JobStatus::Cancelled),
        }
    }
}

/// Inclusive range over UTC creation dates. Open on either side when unset.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let day = at.date_naive();
        self.start.map_or(true, |start| day >= start) && self.end.map_or(true, |end| day <= end)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListFilter {
    pub status: StatusFilter,
    pub dates: DateRange,
}

impl ListFilter {
    pub fn matches(&self, record: &JobRecord) -> bool {
        self.status.matches(record.status) && self.dates.contains(record.created_at)
    }
}

/// Bounded, insertion-ordered cache of the jobs one session has seen.
///
/// Lives in memory only and is dropped with the session; remote jobs are
/// unaffected by eviction.
#[derive(Debug, Clone)]
pub struct SessionStore {
    capacity: usize,
    records: Vec<JobRecord>,
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Vec::new(),
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    /// Insert a new record or merge a newer snapshot into the cached one.
    ///
    /// Returns the cached record after the operation, or `None` if it was
    /// evicted straight away.
    pub fn upsert(&mut self, record: JobRecord) -> Option<&JobRecord> {
        if let Some(pos) = self.position(&record.id) {
            let cached = &mut self.records[pos];
            let incoming = record.status;
            if !cached.merge(record) {
                tracing::debug!(
                    job_id = %cached.id,
                    cached = %cached.status,
                    incoming = %incoming,
                    "Ignored stale job snapshot"
                );
            }
            return self.records.get(pos);
        }

        let id = record.id.clone();
        self.records.push(record);
        while self.records.len() > self.capacity {
            let evicted = self.records.remove(0);
            tracing::debug!(job_id = %evicted.id, "Evicted job from session cache");
        }
        self.get(&id)
    }

    pub fn get(&self, id: &str) -> Option<&JobRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn remove(&mut self, id: &str) -> Option<JobRecord> {
        self.position(id).map(|pos| self.records.remove(pos))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Matching records, newest first. Ties on `created_at` put the most
    /// recently inserted record first.
    pub fn list(&self, filter: &ListFilter) -> Vec<&JobRecord> {
        let mut matching: Vec<(usize, &JobRecord)> = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| filter.matches(r))
            .collect();
        matching.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));
        matching.into_iter().map(|(_, r)| r).collect()
    }

    /// The `n` most recently inserted records.
    pub fn recent(&self, n: usize) -> Vec<&JobRecord> {
        self.records.iter().rev().take(n).collect()
    }
}
