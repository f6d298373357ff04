//! Engine types
//!
//! Messages emitted during a sync and the run report.

use crate::jobs::{AsyncJob, JobState};
use crate::state::{SyncState, Watermark};
use crate::types::{ChangeRecord, PartitionKey};
use serde::Serialize;

/// A message emitted during sync
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// One change record
    Record {
        stream: String,
        partition: PartitionKey,
        record: ChangeRecord,
    },
    /// Watermark of one stream/partition after its run
    State {
        stream: String,
        partition: PartitionKey,
        /// `None` when the watermark was discarded
        watermark: Option<Watermark>,
    },
    /// Observed export job status
    JobStatus {
        stream: String,
        partition: PartitionKey,
        job: AsyncJob,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous: Option<JobState>,
    },
    /// Log message
    Log { level: LogLevel, message: String },
}

/// Log level for engine messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// General information
    Info,
    /// Warning
    Warn,
    /// Error (non-fatal)
    Error,
}

impl Message {
    /// Create a record message
    pub fn record(stream: impl Into<String>, partition: &PartitionKey, record: ChangeRecord) -> Self {
        Self::Record {
            stream: stream.into(),
            partition: partition.clone(),
            record,
        }
    }

    /// Create a state message
    pub fn state(stream: impl Into<String>, partition: &PartitionKey, watermark: Option<Watermark>) -> Self {
        Self::State {
            stream: stream.into(),
            partition: partition.clone(),
            watermark,
        }
    }

    /// Create a job status message
    pub fn job_status(
        stream: impl Into<String>,
        partition: &PartitionKey,
        job: AsyncJob,
        previous: Option<JobState>,
    ) -> Self {
        Self::JobStatus {
            stream: stream.into(),
            partition: partition.clone(),
            job,
            previous,
        }
    }

    /// Create a log message
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log {
            level,
            message: message.into(),
        }
    }

    /// Create an info log
    pub fn info(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Info, message)
    }

    /// Create a warning log
    pub fn warn(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Warn, message)
    }

    /// Create an error log
    pub fn error(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Error, message)
    }

    /// Check if this is a record message
    pub fn is_record(&self) -> bool {
        matches!(self, Self::Record { .. })
    }

    /// Check if this is a state message
    pub fn is_state(&self) -> bool {
        matches!(self, Self::State { .. })
    }

    /// Check if this is a job status message
    pub fn is_job_status(&self) -> bool {
        matches!(self, Self::JobStatus { .. })
    }

    /// Check if this is a log message
    pub fn is_log(&self) -> bool {
        matches!(self, Self::Log { .. })
    }
}

/// Statistics from a sync operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Records emitted
    pub records_synced: usize,
    /// Pages and change batches fetched
    pub pages_fetched: usize,
    /// Stream partitions that finished
    pub partitions_synced: usize,
    /// Stream partitions skipped for lack of permission
    pub partitions_skipped: usize,
    /// Stream partitions that failed
    pub partitions_failed: usize,
    /// Export jobs created
    pub jobs_created: usize,
    /// Export job status polls
    pub jobs_polled: usize,
    /// Expired change tokens replaced by a full fetch
    pub token_fallbacks: usize,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl SyncStats {
    /// Create new stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Add records
    pub fn add_records(&mut self, count: usize) {
        self.records_synced += count;
    }

    /// Add a page
    pub fn add_page(&mut self) {
        self.pages_fetched += 1;
    }

    /// Fold the counters of one stream partition into the totals
    pub fn absorb(&mut self, other: &SyncStats) {
        self.records_synced += other.records_synced;
        self.pages_fetched += other.pages_fetched;
        self.partitions_synced += other.partitions_synced;
        self.partitions_skipped += other.partitions_skipped;
        self.partitions_failed += other.partitions_failed;
        self.jobs_created += other.jobs_created;
        self.jobs_polled += other.jobs_polled;
        self.token_fallbacks += other.token_fallbacks;
    }

    /// Set duration
    pub fn set_duration(&mut self, ms: u64) {
        self.duration_ms = ms;
    }
}

/// How one stream of one partition ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PartitionOutcome {
    /// Completed; watermark merged
    Synced { strategy: String, records: usize },
    /// Skipped without touching the watermark
    Skipped { reason: String },
    /// Failed; watermark left as last persisted
    Failed { error: String },
}

/// Result of one stream of one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionReport {
    pub stream: String,
    pub partition: PartitionKey,
    #[serde(flatten)]
    pub outcome: PartitionOutcome,
}

/// Result of a whole run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub stats: SyncStats,
    pub partitions: Vec<PartitionReport>,
    /// State after the run
    pub state: SyncState,
}

impl SyncReport {
    /// Reports that did not finish
    pub fn failures(&self) -> impl Iterator<Item = &PartitionReport> {
        self.partitions
            .iter()
            .filter(|r| matches!(r.outcome, PartitionOutcome::Failed { .. }))
    }

    /// Check if every stream partition finished or was skipped
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Look up the report of one stream partition
    pub fn get(&self, stream: &str, partition: &str) -> Option<&PartitionOutcome> {
        self.partitions
            .iter()
            .find(|r| r.stream == stream && r.partition.as_str() == partition)
            .map(|r| &r.outcome)
    }
}
