//! State types for tracking sync progress
//!
//! These types are serialized to JSON and persisted between runs. The
//! persisted shape is a map from stream name to a map from partition key to
//! one watermark:
//!
//! ```json
//! {
//!   "issues": { "acme/api": { "type": "cutoff", "cutoff": "2024-05-01T00:00:00Z" } },
//!   "events": { "cal-1": { "type": "change_token", "token": "CPjB..." } }
//! }
//! ```

use crate::jobs::{AsyncJob, JobState, JobWindow};
use crate::types::{PartitionKey, Timestamp};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Watermark
// ============================================================================

/// Persisted synchronization position of one stream within one partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Watermark {
    /// Records at or before `cutoff` are already synchronized
    Cutoff { cutoff: Timestamp },
    /// Continuation token for a change feed
    ChangeToken { token: String },
    /// In-flight or most recent export job
    PendingJob(PendingJob),
}

impl Watermark {
    /// Create a cutoff watermark
    pub fn cutoff(cutoff: Timestamp) -> Self {
        Self::Cutoff { cutoff }
    }

    /// Create a change token watermark
    pub fn change_token(token: impl Into<String>) -> Self {
        Self::ChangeToken {
            token: token.into(),
        }
    }

    /// Get the cutoff, if this is a cutoff watermark
    pub fn as_cutoff(&self) -> Option<Timestamp> {
        match self {
            Self::Cutoff { cutoff } => Some(*cutoff),
            _ => None,
        }
    }

    /// Get the change token, if this is a token watermark
    pub fn as_change_token(&self) -> Option<&str> {
        match self {
            Self::ChangeToken { token } => Some(token),
            _ => None,
        }
    }

    /// Get the pending job, if this is a job watermark
    pub fn as_pending_job(&self) -> Option<&PendingJob> {
        match self {
            Self::PendingJob(job) => Some(job),
            _ => None,
        }
    }
}

/// Merge an observed effective time into a cutoff
///
/// `max(current, observed)`; ties keep the existing value. A non-cutoff
/// watermark is replaced.
pub fn merge_cutoff(current: Option<&Watermark>, observed: Timestamp) -> Watermark {
    match current {
        Some(Watermark::Cutoff { cutoff }) if *cutoff >= observed => Watermark::cutoff(*cutoff),
        _ => Watermark::cutoff(observed),
    }
}

/// Merge a job descriptor into the current watermark
///
/// While a different job is still active and not stale, the merge is a
/// no-op and the existing job is kept. Updates to the same job id always
/// apply.
pub fn merge_job(
    current: Option<&Watermark>,
    job: PendingJob,
    now: Timestamp,
    stale_after: Duration,
) -> Watermark {
    if let Some(Watermark::PendingJob(existing)) = current {
        if existing.job_id != job.job_id
            && existing.is_active()
            && !existing.is_stale(now, stale_after)
        {
            return Watermark::PendingJob(existing.clone());
        }
    }
    Watermark::PendingJob(job)
}

// ============================================================================
// Pending Job
// ============================================================================

/// Audit record of a job that failed and was replaced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub job_id: String,
    #[serde(flatten)]
    pub window: JobWindow,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

/// Persisted descriptor of an export job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingJob {
    /// Upstream job id
    pub job_id: String,
    /// Exported window
    #[serde(flatten)]
    pub window: JobWindow,
    /// Last observed state
    pub state: JobState,
    /// Failure reason reported by the upstream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    /// When the job was created; staleness is measured from here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    /// The failed job this one replaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<JobFailure>,
}

impl PendingJob {
    /// Describe a freshly created job
    pub fn created(job: &AsyncJob, created_at: Timestamp) -> Self {
        Self {
            job_id: job.id.clone(),
            window: job.window,
            state: job.state,
            error_reason: job.error_reason.clone(),
            created_at: Some(created_at),
            last_failure: None,
        }
    }

    /// Attach the audit record of the job being replaced
    #[must_use]
    pub fn replacing(mut self, failed: &PendingJob) -> Self {
        if failed.state == JobState::Failed {
            self.last_failure = Some(JobFailure {
                job_id: failed.job_id.clone(),
                window: failed.window,
                error_reason: failed.error_reason.clone(),
            });
        } else {
            self.last_failure = failed.last_failure.clone();
        }
        self
    }

    /// Apply a poll result for the same job
    #[must_use]
    pub fn observe(mut self, job: &AsyncJob) -> Self {
        self.state = job.state;
        self.error_reason = job.error_reason.clone();
        self
    }

    /// Check if the job still occupies the active slot
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Check if an active job has been pending longer than `stale_after`
    ///
    /// Jobs without a creation time are aged from their window end.
    pub fn is_stale(&self, now: Timestamp, stale_after: Duration) -> bool {
        let since = self.created_at.unwrap_or(self.window.end);
        self.is_active() && now - since > stale_after
    }

    /// View as an upstream job
    pub fn as_job(&self) -> AsyncJob {
        AsyncJob {
            id: self.job_id.clone(),
            window: self.window,
            state: self.state,
            error_reason: self.error_reason.clone(),
        }
    }
}

// ============================================================================
// Sync State
// ============================================================================

/// Complete persisted sync state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncState {
    /// Per-stream state
    pub streams: BTreeMap<String, StreamState>,
}

impl SyncState {
    /// Create a new empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get state for a stream
    pub fn get_stream(&self, stream: &str) -> Option<&StreamState> {
        self.streams.get(stream)
    }

    /// Get mutable state for a stream, creating if needed
    pub fn get_stream_mut(&mut self, stream: &str) -> &mut StreamState {
        self.streams.entry(stream.to_string()).or_default()
    }

    /// Get the watermark of one partition
    pub fn get(&self, stream: &str, partition: &PartitionKey) -> Option<&Watermark> {
        self.streams.get(stream)?.partitions.get(partition)
    }

    /// Replace the watermark of one partition
    pub fn set(&mut self, stream: &str, partition: &PartitionKey, watermark: Watermark) {
        self.get_stream_mut(stream)
            .partitions
            .insert(partition.clone(), watermark);
    }

    /// Drop the watermark of one partition
    pub fn remove(&mut self, stream: &str, partition: &PartitionKey) -> Option<Watermark> {
        let stream_state = self.streams.get_mut(stream)?;
        let removed = stream_state.partitions.remove(partition);
        if stream_state.partitions.is_empty() {
            self.streams.remove(stream);
        }
        removed
    }

    /// Check if no watermark is stored
    pub fn is_empty(&self) -> bool {
        self.streams.values().all(|s| s.partitions.is_empty())
    }
}

/// State for a single stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamState {
    /// Per-partition watermarks
    pub partitions: BTreeMap<PartitionKey, Watermark>,
}
