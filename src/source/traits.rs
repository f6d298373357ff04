//! Collaborator traits
//!
//! The sync core never talks to an upstream directly. Each stream is backed
//! by one of these traits; a partition key scopes every call.

use crate::error::Result;
use crate::jobs::{AsyncJob, JobWindow};
use crate::types::{ChangeRecord, FetchMode, Page, PartitionKey, RecordOrder};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// One page-by-page listing endpoint
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch one page; `cursor` is `None` for the first page
    async fn fetch_page(
        &self,
        partition: &PartitionKey,
        cursor: Option<&str>,
        mode: &FetchMode,
    ) -> Result<Page>;

    /// Order in which records are returned by effective time
    fn order(&self) -> RecordOrder {
        RecordOrder::Unordered
    }
}

/// One batch of a change feed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaPage {
    /// Upserts and tombstones
    pub changes: Vec<ChangeRecord>,
    /// Token to continue from after this batch
    pub next_token: Option<String>,
    /// Whether another batch follows immediately
    pub has_more: bool,
}

impl DeltaPage {
    /// Final batch carrying the token for the next run
    pub fn last(changes: Vec<ChangeRecord>, next_token: impl Into<String>) -> Self {
        Self {
            changes,
            next_token: Some(next_token.into()),
            has_more: false,
        }
    }

    /// Intermediate batch
    pub fn more(changes: Vec<ChangeRecord>, next_token: impl Into<String>) -> Self {
        Self {
            changes,
            next_token: Some(next_token.into()),
            has_more: true,
        }
    }
}

/// A change feed with a full listing to seed it
#[async_trait]
pub trait DeltaSource: Send + Sync {
    /// Fetch one page of the full listing
    ///
    /// The last page carries the token that seeds the change feed in
    /// [`Page::sync_token`].
    async fn fetch_snapshot(&self, partition: &PartitionKey, cursor: Option<&str>) -> Result<Page>;

    /// Fetch changes since `token`
    ///
    /// An invalidated token is reported as a token-expired error.
    async fn fetch_delta(&self, partition: &PartitionKey, token: &str) -> Result<DeltaPage>;
}

/// Server-side export jobs
#[async_trait]
pub trait ExportJobSource: Send + Sync {
    /// Start an export of `window`
    async fn create_export_job(&self, partition: &PartitionKey, window: JobWindow)
        -> Result<AsyncJob>;

    /// Read the current status of a job
    async fn get_export_job(&self, partition: &PartitionKey, job_id: &str) -> Result<AsyncJob>;

    /// Fetch one page of a completed job's results
    async fn fetch_job_results(
        &self,
        partition: &PartitionKey,
        job: &AsyncJob,
        cursor: Option<&str>,
    ) -> Result<Page>;
}

/// How a stream is fetched
#[derive(Clone)]
pub enum StreamSource {
    /// Full or timestamp-incremental listing
    Paginated(Arc<dyn PageSource>),
    /// Change feed
    Delta(Arc<dyn DeltaSource>),
    /// Export jobs
    ExportJob(Arc<dyn ExportJobSource>),
}

/// Discriminator of [`StreamSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Paginated,
    Delta,
    ExportJob,
}

impl StreamSource {
    /// Kind of this source
    pub fn kind(&self) -> StreamKind {
        match self {
            Self::Paginated(_) => StreamKind::Paginated,
            Self::Delta(_) => StreamKind::Delta,
            Self::ExportJob(_) => StreamKind::ExportJob,
        }
    }
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamSource::{:?}", self.kind())
    }
}

/// A named stream; the name discriminates watermarks within a partition
#[derive(Debug, Clone)]
pub struct SyncStream {
    pub name: String,
    pub source: StreamSource,
}

impl SyncStream {
    /// Create a paginated stream
    pub fn paginated(name: impl Into<String>, source: Arc<dyn PageSource>) -> Self {
        Self {
            name: name.into(),
            source: StreamSource::Paginated(source),
        }
    }

    /// Create a change-feed stream
    pub fn delta(name: impl Into<String>, source: Arc<dyn DeltaSource>) -> Self {
        Self {
            name: name.into(),
            source: StreamSource::Delta(source),
        }
    }

    /// Create an export-job stream
    pub fn export_job(name: impl Into<String>, source: Arc<dyn ExportJobSource>) -> Self {
        Self {
            name: name.into(),
            source: StreamSource::ExportJob(source),
        }
    }

    /// Kind of the backing source
    pub fn kind(&self) -> StreamKind {
        self.source.kind()
    }
}
