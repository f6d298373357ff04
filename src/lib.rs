// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::ref_option)]
#![allow(clippy::unused_self)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::match_wildcard_for_single_variants)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # Solidafy Sync
//!
//! Per-partition incremental synchronization for API connectors.
//!
//! Every (stream, partition) pair carries its own watermark: a timestamp
//! cutoff, an opaque change token, or a pending export job. On each run the
//! engine picks a fetch strategy from that watermark, fetches only what
//! changed, and advances the watermark once the data has been emitted.
//!
//! ## Features
//!
//! - **Paginated Fetch**: Cursor pagination with early stop on descending streams
//! - **Change Feeds**: Sync tokens, tombstones, and expiry fallback
//! - **Export Jobs**: Create, poll, and download asynchronous report jobs
//! - **Retry**: Rate-limit aware backoff with separate budgets
//! - **Durable State**: Atomic JSON state file with monotonic cutoffs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use solidafy_sync::engine::{JsonLinesSink, SyncEngine};
//! use solidafy_sync::source::{load_source, HttpSource};
//! use solidafy_sync::state::WatermarkStore;
//! use solidafy_sync::{Result, SyncSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let settings = SyncSettings::new();
//!     let source = HttpSource::new(load_source("github.yaml")?, &settings)?;
//!     let streams = source.streams(None)?;
//!
//!     let engine = SyncEngine::new(settings, WatermarkStore::from_file("state.json")?);
//!     let sink = JsonLinesSink::new(std::io::stdout());
//!     let report = engine.run(source.partitions().as_ref(), &streams, &sink).await?;
//!     println!("{} records", report.stats.records_synced);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          SyncEngine                             │
//! │  partitions × streams → select(watermark) → Strategy → execute  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//! ┌──────────┬───────────┬───────┴───────┬───────────┬─────────────┐
//! │ Strategy │ Paginate  │    Delta      │   Jobs    │    State    │
//! ├──────────┼───────────┼───────────────┼───────────┼─────────────┤
//! │ Full     │ Cursor    │ Sync token    │ Create    │ Cutoff      │
//! │ Since    │ Stop pred │ Tombstones    │ Poll      │ Token       │
//! │ Delta    │ Retry     │ Expiry        │ Download  │ Pending job │
//! │ Job      │           │               │           │             │
//! └──────────┴───────────┴───────────────┴───────────┴─────────────┘
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// Common types and type aliases
pub mod types;

/// Sync settings
pub mod config;

/// HTTP client with retry and rate limiting
pub mod http;

/// Cursor pagination
pub mod pagination;

/// Watermarks and the state store
pub mod state;

/// Strategy selection
pub mod strategy;

/// Change-feed reconciliation
pub mod delta;

/// Asynchronous export jobs
pub mod jobs;

/// Partition enumeration
pub mod partition;

/// Source collaborators and YAML source definitions
pub mod source;

/// Sync engine
pub mod engine;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::SyncSettings;
pub use error::{Error, Result};
pub use types::*;

// Re-export commonly used types
pub use engine::{SyncEngine, SyncReport};
pub use source::{load_source, load_source_from_str, HttpSource, SourceDefinition};
pub use state::WatermarkStore;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
