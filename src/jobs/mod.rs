//! Async export job module
//!
//! # Overview
//!
//! - `AsyncJob` / `JobState` - Upstream job and its lifecycle
//!   (`created -> processing -> completed | failed`)
//! - `JobWindow` - Exported time window, capped at the maximum export window
//! - `AsyncJobPoller` - Create, poll and download jobs of one partition

mod poller;
mod types;

pub use poller::{AsyncJobPoller, JobEvent, PollOutcome};
pub use types::{AsyncJob, JobReason, JobState, JobWindow};
