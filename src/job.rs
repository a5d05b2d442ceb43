use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::settings::Format;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
    fn millis(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hands out ids derived from the creation time in milliseconds. Two jobs
/// created within the same millisecond still get distinct, increasing ids.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: u64,
}

impl IdGenerator {
    /// Seeds the generator past every numeric id already in use
    pub fn after<'a>(existing: impl IntoIterator<Item = &'a JobId>) -> Self {
        let last = existing
            .into_iter()
            .filter_map(JobId::millis)
            .max()
            .unwrap_or(0);
        Self { last }
    }
    pub fn next(&mut self, now: DateTime<Utc>) -> JobId {
        let millis = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        self.last = millis.max(self.last + 1);
        JobId(self.last.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Downloading,
    Converting,
    Complete,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
    /// Whether a job in this status may move to `next`
    pub fn can_become(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Downloading | Error | Cancelled) => true,
            (Downloading, Converting | Complete | Error | Cancelled) => true,
            (Converting, Complete | Error | Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::Converting => "converting",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl std::fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job cannot go from {} to {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// One download, either in flight or in the history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub url: String,
    pub title: String,
    pub thumbnail: Option<String>,
    pub platform: String,
    pub format: Format,
    pub status: JobStatus,
    pub progress: f64,
    pub file_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl JobRecord {
    pub fn new(
        id: JobId,
        url: String,
        title: Option<String>,
        thumbnail: Option<String>,
        format: Format,
        created_at: DateTime<Utc>,
    ) -> Self {
        let platform = crate::platform::detect(&url).to_string();
        Self {
            id,
            url,
            title: title.filter(|t| !t.trim().is_empty()).unwrap_or_else(|| "Unknown".into()),
            thumbnail,
            platform,
            format,
            status: JobStatus::Pending,
            progress: 0.0,
            file_path: None,
            created_at,
            error: None,
        }
    }

    pub fn transition(&mut self, next: JobStatus) -> Result<(), IllegalTransition> {
        if !self.status.can_become(next) {
            return Err(IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next == JobStatus::Converting || next == JobStatus::Complete {
            self.progress = 100.0;
        }
        Ok(())
    }

    /// Records a new percentage. Values are clamped to [0, 100] and never go
    /// backwards while the status stays the same.
    pub fn advance_progress(&mut self, value: f64) {
        if value.is_nan() || self.status.is_terminal() {
            return;
        }
        self.progress = self.progress.max(value.clamp(0.0, 100.0));
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), IllegalTransition> {
        self.transition(JobStatus::Error)?;
        self.error = Some(message.into());
        Ok(())
    }
}
