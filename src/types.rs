//! Common types used throughout Solidafy Sync
//!
//! This module contains the shared data model: partition keys,
//! change records, pages, sync modes and the clock used for every
//! time-dependent decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Type Aliases
// ============================================================================

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

/// Timestamp type used for cutoffs and job windows
pub type Timestamp = DateTime<Utc>;

// ============================================================================
// Partition Keys
// ============================================================================

/// Opaque identifier of an independently synchronized unit of work
/// (e.g. "org/repo", a project slug, a calendar id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Create a new partition key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the key as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PartitionKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// Sync Mode
// ============================================================================

/// Synchronization mode requested for a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Fetch everything, ignoring (but keeping) stored cutoffs
    FullRefresh,
    /// Resume from the stored watermark
    #[default]
    Incremental,
}

/// What a single page request asks the upstream for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Everything
    Full,
    /// Records changed after the given cutoff
    Since(Timestamp),
}

/// Ordering of records as returned by an upstream feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrder {
    /// Oldest first
    Ascending,
    /// Newest first; enables early stop on incremental runs
    Descending,
    /// No ordering guarantee
    #[default]
    Unordered,
}

// ============================================================================
// Change Records
// ============================================================================

/// Kind of change carried by a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Upsert,
    Delete,
}

/// A single change emitted to the record sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Upstream entity identifier
    pub entity_id: String,
    /// Upsert or tombstone
    pub change_type: ChangeType,
    /// Time the change became effective, when the upstream reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_time: Option<Timestamp>,
    /// Full entity payload; always `None` for deletes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<JsonValue>,
}

impl ChangeRecord {
    /// Create an upsert record
    pub fn upsert(
        entity_id: impl Into<String>,
        effective_time: Option<Timestamp>,
        payload: JsonValue,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            change_type: ChangeType::Upsert,
            effective_time,
            payload: Some(payload),
        }
    }

    /// Create a tombstone
    pub fn delete(entity_id: impl Into<String>, effective_time: Option<Timestamp>) -> Self {
        Self {
            entity_id: entity_id.into(),
            change_type: ChangeType::Delete,
            effective_time,
            payload: None,
        }
    }

    /// Check if this record is a tombstone
    pub fn is_delete(&self) -> bool {
        self.change_type == ChangeType::Delete
    }
}

/// The unit produced by one fetch call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Records on this page
    pub items: Vec<ChangeRecord>,
    /// Cursor for the next page; `None` on the last page
    pub next_cursor: Option<String>,
    /// Change-feed token handed out by the terminal page of a full fetch
    pub sync_token: Option<String>,
}

impl Page {
    /// Create a page
    pub fn new(items: Vec<ChangeRecord>, next_cursor: Option<String>) -> Self {
        Self {
            items,
            next_cursor,
            sync_token: None,
        }
    }

    /// Create a terminal page
    pub fn last(items: Vec<ChangeRecord>) -> Self {
        Self::new(items, None)
    }

    /// Attach a sync token
    #[must_use]
    pub fn with_sync_token(mut self, token: impl Into<String>) -> Self {
        self.sync_token = Some(token.into());
        self
    }

    /// Check if another page follows
    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }
}

// ============================================================================
// Backoff Type
// ============================================================================

/// Type of backoff for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    /// Constant delay between retries
    Constant,
    /// Linear increase in delay
    Linear,
    /// Exponential increase in delay
    #[default]
    Exponential,
}

// ============================================================================
// Clock
// ============================================================================

/// Source of "now" for window arithmetic and staleness checks
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    /// Wall clock
    #[default]
    System,
    /// Frozen instant
    Fixed(Timestamp),
}

impl Clock {
    /// Current time according to this clock
    pub fn now(&self) -> Timestamp {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(t) => *t,
        }
    }
}
