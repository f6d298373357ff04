//! Delta reconciler module
//!
//! Consumes change feeds (upserts and tombstones plus a continuation token)
//! and hands the caller a token to persist after each change.

mod reconciler;

pub use reconciler::{DeltaBatch, DeltaItem, DeltaReconciler};
