//! Fetch strategy selector
//!
//! A pure function of the stored watermark, the requested sync mode, the
//! kind of stream, the current time and the export-job settings. The engine
//! executes whatever strategy comes out.

use crate::config::ExportJobConfig;
use crate::jobs::{JobReason, JobState, JobWindow};
use crate::source::StreamKind;
use crate::state::{PendingJob, Watermark};
use crate::types::{SyncMode, Timestamp};
use std::fmt;

/// What to do for one stream of one partition in this run
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    /// Fetch everything from the first page
    FullFetch,
    /// Fetch records newer than `cutoff`
    IncrementalFetch { cutoff: Timestamp },
    /// Continue a change feed
    DeltaFetch { token: String },
    /// Poll the job held in the watermark
    PollJob(PendingJob),
    /// Start a new export job
    CreateJob {
        window: JobWindow,
        reason: JobReason,
        /// Job being replaced, kept for its failure audit
        replaces: Option<PendingJob>,
    },
    /// Nothing to do in this run
    Throttled { reason: ThrottleReason },
}

/// Why a run yields nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleReason {
    /// The last completed window ended less than `min_gap` ago
    MinGap,
    /// The next window would be empty
    CaughtUp,
}

impl fmt::Display for ThrottleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MinGap => f.write_str("minimum gap since last export not reached"),
            Self::CaughtUp => f.write_str("export windows caught up with now"),
        }
    }
}

impl Strategy {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::FullFetch => "full_fetch",
            Self::IncrementalFetch { .. } => "incremental_fetch",
            Self::DeltaFetch { .. } => "delta_fetch",
            Self::PollJob(_) => "poll_job",
            Self::CreateJob { .. } => "create_job",
            Self::Throttled { .. } => "throttled",
        }
    }
}

/// Choose the strategy for one stream of one partition
pub fn select(
    watermark: Option<&Watermark>,
    mode: SyncMode,
    kind: StreamKind,
    now: Timestamp,
    jobs: &ExportJobConfig,
) -> Strategy {
    match kind {
        StreamKind::ExportJob => select_job(watermark.and_then(Watermark::as_pending_job), now, jobs),
        StreamKind::Paginated | StreamKind::Delta => match (watermark, mode) {
            (Some(Watermark::Cutoff { cutoff }), SyncMode::Incremental) => {
                Strategy::IncrementalFetch { cutoff: *cutoff }
            }
            (Some(Watermark::ChangeToken { token }), SyncMode::Incremental)
                if kind == StreamKind::Delta =>
            {
                Strategy::DeltaFetch {
                    token: token.clone(),
                }
            }
            _ => Strategy::FullFetch,
        },
    }
}

/// Choose the next step of an export-job stream
pub fn select_job(pending: Option<&PendingJob>, now: Timestamp, jobs: &ExportJobConfig) -> Strategy {
    let Some(job) = pending else {
        return create_or_throttle(
            JobWindow::capped(
                now.checked_sub_signed(jobs.lookback).unwrap_or(Timestamp::MIN_UTC),
                jobs.max_window,
                now,
            ),
            JobReason::Initial,
            None,
        );
    };

    match job.state {
        JobState::Created | JobState::Processing if job.is_stale(now, jobs.stale_after) => {
            create_or_throttle(
                JobWindow::capped(job.window.start, jobs.max_window, now),
                JobReason::Restart,
                Some(job.clone()),
            )
        }
        JobState::Created | JobState::Processing => Strategy::PollJob(job.clone()),
        JobState::Failed => create_or_throttle(
            JobWindow::capped(job.window.start, jobs.max_window, now),
            JobReason::Retry,
            Some(job.clone()),
        ),
        JobState::Completed => {
            if now - job.window.end < jobs.min_gap {
                return Strategy::Throttled {
                    reason: ThrottleReason::MinGap,
                };
            }
            create_or_throttle(
                JobWindow::capped(job.window.end, jobs.max_window, now),
                JobReason::Incremental,
                Some(job.clone()),
            )
        }
    }
}

fn create_or_throttle(window: JobWindow, reason: JobReason, replaces: Option<PendingJob>) -> Strategy {
    if window.is_empty() {
        return Strategy::Throttled {
            reason: ThrottleReason::CaughtUp,
        };
    }
    Strategy::CreateJob {
        window,
        reason,
        replaces,
    }
}
