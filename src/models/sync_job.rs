//! Sync job records
//!
//! A `SyncJob` captures one execution attempt for one provider. Jobs live in
//! the scheduler's bounded in-memory history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AdapterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// What started a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Timer,
    Manual,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::Timer => "timer",
            SyncTrigger::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobErrorKind {
    /// The provider was not connected when the job started.
    NotConnected,
    Unauthorized,
    RateLimited {
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },
    Timeout,
    Transient,
    Permanent,
    Malformed,
    /// Persisting a pulled record failed.
    Repository,
}

/// Structured error attached to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    #[serde(flatten)]
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new<S: Into<String>>(kind: JobErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_connected(provider_id: &str) -> Self {
        Self::new(
            JobErrorKind::NotConnected,
            format!("provider '{provider_id}' is not connected"),
        )
    }
}

impl From<&AdapterError> for JobError {
    fn from(error: &AdapterError) -> Self {
        let kind = match error {
            AdapterError::Timeout { .. } => JobErrorKind::Timeout,
            AdapterError::Auth { .. } => JobErrorKind::Unauthorized,
            AdapterError::RateLimited {
                retry_after_secs, ..
            } => JobErrorKind::RateLimited {
                retry_after_secs: *retry_after_secs,
            },
            AdapterError::Transient { .. } => JobErrorKind::Transient,
            AdapterError::Permanent { .. } => JobErrorKind::Permanent,
            AdapterError::Malformed { .. } => JobErrorKind::Malformed,
        };
        Self::new(kind, error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub job_id: Uuid,
    pub provider_id: String,
    pub trigger: SyncTrigger,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub records_processed: u32,
    pub records_added: u32,
    pub records_updated: u32,
    pub errors: Vec<JobError>,
}

impl SyncJob {
    pub fn pending(provider_id: impl Into<String>, trigger: SyncTrigger, now: DateTime<Utc>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            provider_id: provider_id.into(),
            trigger,
            start_time: now,
            end_time: None,
            status: JobStatus::Pending,
            records_processed: 0,
            records_added: 0,
            records_updated: 0,
            errors: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `pending -> running`. Returns false if the job already moved on.
    pub fn mark_running(&mut self) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        self.status = JobStatus::Running;
        true
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Completed;
        self.end_time = Some(now);
        true
    }

    pub fn fail(&mut self, error: JobError, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Failed;
        self.end_time = Some(now);
        self.errors.push(error);
        true
    }

    /// False for jobs rejected before contacting the provider.
    pub fn did_run(&self) -> bool {
        !self
            .errors
            .iter()
            .any(|err| err.kind == JobErrorKind::NotConnected)
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}
