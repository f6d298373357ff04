//! State management module
//!
//! Watermarks record how far each (stream, partition) pair has been
//! synchronized. They are persisted between runs to enable incremental
//! syncs.
//!
//! # Overview
//!
//! The state module provides:
//! - `Watermark` - Cutoff, change token or pending export job
//! - `merge_cutoff` / `merge_job` - Pure merge rules
//! - `WatermarkStore` - File-based persistence with atomic writes

mod store;
mod types;

pub use store::WatermarkStore;
pub use types::{
    merge_cutoff, merge_job, JobFailure, PendingJob, StreamState, SyncState, Watermark,
};
