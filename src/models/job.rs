use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How long a rendered asset stays fetchable after the job was created.
pub fn download_window() -> Duration {
    Duration::hours(1)
}

/// Status of a video generation job.
///
/// The remote service uses a handful of spellings for the same state; they
/// are all accepted on the wire and folded into these five.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, EnumString, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum JobStatus {
    #[strum(to_string = "queued", serialize = "pending")]
    #[serde(alias = "pending")]
    Queued,
    #[strum(to_string = "running", serialize = "in_progress", serialize = "processing")]
    #[serde(alias = "in_progress", alias = "processing")]
    Running,
    #[strum(to_string = "succeeded", serialize = "completed", serialize = "complete")]
    #[serde(alias = "completed", alias = "complete")]
    Succeeded,
    Failed,
    #[strum(to_string = "cancelled", serialize = "canceled")]
    #[serde(alias = "canceled")]
    Cancelled,
}

impl JobStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Succeeded | Self::Failed | Self::Cancelled => 2,
        }
    }

    /// Whether moving from `self` to `next` respects the forward-only
    /// lifecycle. Staying put is allowed; leaving a terminal state is not.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        if *self == next {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn badge(&self) -> &'static str {
        match self {
            Self::Queued => "🟡 Queued",
            Self::Running => "🟡 In progress",
            Self::Succeeded => "✅ Succeeded",
            Self::Failed => "🔴 Failed",
            Self::Cancelled => "⚪️ Cancelled",
        }
    }
}

/// Failure detail reported by the remote service for a `failed` job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// One generation request and, once finished, its result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub prompt: String,
    pub model: String,
    /// Clip length in seconds.
    pub duration: u32,
    /// `WIDTHxHEIGHT`.
    pub resolution: String,
    pub reference_image: Option<String>,
    pub progress: u8,
    pub error: Option<JobError>,
    pub result_url: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl JobRecord {
    pub fn download_expires_at(&self) -> DateTime<Utc> {
        self.created_at + download_window()
    }

    pub fn is_download_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.download_expires_at()
    }

    /// Whether `newer` may replace this snapshot: the status never moves
    /// backwards and progress never drops within the same status.
    pub fn accepts(&self, newer: &JobRecord) -> bool {
        self.status.can_advance_to(newer.status)
            && !(self.status == newer.status && newer.progress < self.progress)
    }

    /// Fold a newer snapshot of the same job into this one.
    ///
    /// Creation parameters (`created_at`, prompt, model, duration,
    /// resolution, reference image) are fixed when the job is submitted, so
    /// the cached values win. Returns `false` and leaves the record untouched
    /// when the snapshot is stale.
    pub fn merge(&mut self, newer: JobRecord) -> bool {
        if !self.accepts(&newer) {
            return false;
        }

        let keep = |cached: &mut String, incoming: String| {
            if cached.is_empty() {
                incoming
            } else {
                std::mem::take(cached)
            }
        };
        let prompt = keep(&mut self.prompt, newer.prompt);
        let model = keep(&mut self.model, newer.model);
        let resolution = keep(&mut self.resolution, newer.resolution);
        let duration = if self.duration > 0 {
            self.duration
        } else {
            newer.duration
        };

        *self = JobRecord {
            created_at: self.created_at,
            prompt,
            model,
            duration,
            resolution,
            reference_image: self.reference_image.take().or(newer.reference_image),
            ..newer
        };
        true
    }

    /// Human label for the current progress, as shown next to a progress bar.
    pub fn progress_label(&self) -> String {
        match self.status {
            JobStatus::Succeeded => "Ready".to_string(),
            JobStatus::Failed => "Failed".to_string(),
            JobStatus::Cancelled => "Cancelled".to_string(),
            JobStatus::Queued if self.progress == 0 => "Queued…".to_string(),
            _ if self.progress >= 99 => "Finalizing".to_string(),
            _ => format!("Rendering {}%", self.progress),
        }
    }

    /// Short one-line description: `id • size • 8s • prompt…`.
    pub fn summary(&self) -> String {
        let mut bits = vec![self.id.clone()];
        if !self.resolution.is_empty() {
            bits.push(self.resolution.clone());
        }
        if self.duration > 0 {
            bits.push(format!("{}s", self.duration));
        }
        let snippet = prompt_snippet(&self.prompt);
        if !snippet.is_empty() {
            bits.push(snippet);
        }
        bits.join(" • ")
    }
}

/// Collapse whitespace and cap a prompt at 80 characters.
pub fn prompt_snippet(prompt: &str) -> String {
    let collapsed = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > 80 {
        let head: String = collapsed.chars().take(77).collect();
        format!("{head}…")
    } else {
        collapsed
    }
}

/// Normalize remote progress to 0..=100.
///
/// Prefers the integer `progress` field, then `percent_complete`, then falls
/// back to the status.
pub fn progress_percent(raw: &serde_json::Value, status: JobStatus) -> u8 {
    let numeric = |value: Option<&serde_json::Value>| -> Option<u8> {
        let value = value?;
        let n = match value {
            serde_json::Value::Number(n) => n.as_f64()?,
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        Some(n.clamp(0.0, 100.0) as u8)
    };

    numeric(raw.get("progress"))
        .or_else(|| numeric(raw.get("percent_complete")))
        .unwrap_or(match status {
            JobStatus::Succeeded => 100,
            _ => 0,
        })
}

/// Pull a playable asset URL out of the shapes the remote object has used.
pub fn extract_asset_url(raw: &serde_json::Value) -> Option<String> {
    let candidates = [
        raw.pointer("/assets/0/url"),
        raw.pointer("/output/0/url"),
        raw.get("download_url"),
        raw.pointer("/assets/video/url"),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str())
        .find(|url| url.starts_with("http"))
        .map(str::to_string)
}
