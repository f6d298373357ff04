//! Fetch strategy module
//!
//! Maps a partition's stored watermark and the requested sync mode onto one
//! of: full fetch, incremental fetch, change-feed fetch, job poll, job
//! creation, or nothing this run.

mod selector;

pub use selector::{select, select_job, Strategy, ThrottleReason};
