//! # Ingestion jobs
//!
//! A [`Job`] tracks one ingestion attempt (one batch, or one file, from one source). Its
//! lifecycle is a small state machine:
//!
//! ```text
//!             ┌──────────► succeeded
//!  running ───┼──────────► partial
//!             └──────────► failed
//! ```
//!
//! A job is created `running` with zeroed stats and an empty error sample. It is then updated
//! once to a terminal status, which stamps `finished_at`. Persistence lives behind
//! [`JobRegistry`](crate::storage::JobRegistry).
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{ErrorIndex, ERROR_SAMPLE_CAP};
use crate::normalize::NormalizationResult;

/// Free-form descriptive parameters of a job (vendor, file name, record count, ...).
pub type JobParams = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Succeeded,
    Partial,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }

    /// Terminal status for a normalized batch: `succeeded` without rejects, `partial`
    /// otherwise (a fully rejected batch included).
    pub fn from_result(result: &NormalizationResult) -> JobStatus {
        if result.rejected == 0 {
            JobStatus::Succeeded
        } else {
            JobStatus::Partial
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "partial" => Ok(JobStatus::Partial),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Where a batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobSource {
    Webhook,
    File,
    Queue,
}

impl JobSource {
    pub fn as_str(self) -> &'static str {
        match self {
            JobSource::Webhook => "webhook",
            JobSource::File => "file",
            JobSource::Queue => "queue",
        }
    }
}

impl fmt::Display for JobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webhook" => Ok(JobSource::Webhook),
            "file" => Ok(JobSource::File),
            "queue" | "kafka" | "mqtt" => Ok(JobSource::Queue),
            other => Err(format!("unknown job source: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub read: usize,
    pub accepted: usize,
    pub rejected: usize,
}

impl From<&NormalizationResult> for JobStats {
    fn from(result: &NormalizationResult) -> Self {
        JobStats {
            read: result.read(),
            accepted: result.accepted,
            rejected: result.rejected,
        }
    }
}

impl std::ops::AddAssign for JobStats {
    fn add_assign(&mut self, rhs: JobStats) {
        self.read += rhs.read;
        self.accepted += rhs.accepted;
        self.rejected += rhs.rejected;
    }
}

/// Job document, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub ingest_id: String,
    pub source: JobSource,
    #[serde(default)]
    pub params: JobParams,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: JobStats,
    #[serde(default)]
    pub error_sample: ErrorIndex,
}

impl Job {
    /// A freshly started job: `running`, zero stats, empty sample.
    pub fn start(ingest_id: impl Into<String>, source: JobSource, params: JobParams) -> Self {
        Job {
            ingest_id: ingest_id.into(),
            source,
            params,
            status: JobStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            stats: JobStats::default(),
            error_sample: ErrorIndex::new(),
        }
    }

    /// Apply a status update in place.
    ///
    /// `stats` and `error_sample` overwrite the stored values when given and leave them
    /// untouched otherwise. The sample is capped to its first [`ERROR_SAMPLE_CAP`] entries.
    /// `finished_at` is stamped for terminal statuses and cleared for `running`.
    pub fn apply_update(
        &mut self,
        status: JobStatus,
        stats: Option<JobStats>,
        error_sample: Option<&ErrorIndex>,
    ) {
        self.status = status;
        self.finished_at = status.is_terminal().then(Utc::now);
        if let Some(stats) = stats {
            self.stats = stats;
        }
        if let Some(errors) = error_sample {
            self.error_sample = cap_error_sample(errors);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// First [`ERROR_SAMPLE_CAP`] entries of an error index, by ascending batch index.
pub fn cap_error_sample(errors: &ErrorIndex) -> ErrorIndex {
    errors
        .iter()
        .take(ERROR_SAMPLE_CAP)
        .map(|(idx, msg)| (*idx, msg.clone()))
        .collect()
}
