//! Export job types
//!
//! An export job is a server-side, time-windowed extraction that must be
//! polled to completion.

use crate::types::Timestamp;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an export job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted by the upstream, not started
    Created,
    /// Running
    Processing,
    /// Results are ready
    Completed,
    /// Terminated without results
    Failed,
}

impl JobState {
    /// Check if the job still occupies the active slot
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Created | Self::Processing)
    }

    /// Check if job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check whether `next` is a legal successor of this state
    ///
    /// `processing` loops on itself; terminal states never move.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        match (self, next) {
            (a, b) if *a == b => true,
            (Self::Created, _) => true,
            (Self::Processing, Self::Completed | Self::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Half-open time window `[start, end)` covered by one export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl JobWindow {
    /// Create a window
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Window starting at `start`, at most `max_window` long, never past `now`
    pub fn capped(start: Timestamp, max_window: Duration, now: Timestamp) -> Self {
        let end = start
            .checked_add_signed(max_window)
            .map_or(now, |end| std::cmp::min(end, now));
        Self { start, end }
    }

    /// Length of the window
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Check if the window covers no time
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl fmt::Display for JobWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// An export job as reported by the upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncJob {
    /// Upstream job id
    pub id: String,
    /// Window the job exports
    #[serde(flatten)]
    pub window: JobWindow,
    /// Current state
    pub state: JobState,
    /// Failure reason reported by the upstream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl AsyncJob {
    /// Create a job in the `created` state
    pub fn new(id: impl Into<String>, window: JobWindow) -> Self {
        Self {
            id: id.into(),
            window,
            state: JobState::Created,
            error_reason: None,
        }
    }

    /// Set the state
    #[must_use]
    pub fn with_state(mut self, state: JobState) -> Self {
        self.state = state;
        self
    }

    /// Mark as failed with a reason
    #[must_use]
    pub fn failed(mut self, reason: impl Into<String>) -> Self {
        self.state = JobState::Failed;
        self.error_reason = Some(reason.into());
        self
    }
}

/// Why a new export job is being created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobReason {
    /// First job for this partition, reaching back over the lookback
    Initial,
    /// Next window after a completed job
    Incremental,
    /// Replacement for a failed job
    Retry,
    /// Replacement for a pending job that went stale
    Restart,
}

impl fmt::Display for JobReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initial => "initial",
            Self::Incremental => "incremental",
            Self::Retry => "retry",
            Self::Restart => "restart",
        };
        f.write_str(s)
    }
}
