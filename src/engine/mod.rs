//! Execution engine module
//!
//! Runs every stream of every partition through the fetch strategy chosen
//! for its watermark.
//!
//! # Overview
//!
//! - `SyncEngine` - enumerates partitions and processes them concurrently
//! - `RecordSink` - receives records, job statuses, watermarks and logs
//! - `SyncReport` - per stream partition outcome plus run statistics
//!
//! Streams of one partition run one after another; partitions run
//! concurrently up to `settings.concurrency`. A failing stream partition
//! never affects its siblings unless `fail_fast` is set.

mod sink;
mod stream;
mod types;

pub use sink::{CollectingSink, JsonLinesSink, RecordSink};
pub use types::{LogLevel, Message, PartitionOutcome, PartitionReport, SyncReport, SyncStats};

use crate::config::SyncSettings;
use crate::error::{Error, ErrorKind, Result};
use crate::http::RetryPolicy;
use crate::partition::PartitionEnumerator;
use crate::source::SyncStream;
use crate::state::WatermarkStore;
use crate::types::{Clock, PartitionKey};
use futures::StreamExt;
use std::collections::HashSet;
use std::time::Instant;
use stream::StreamRun;
use tracing::{error, info, warn};

/// Sync engine for orchestrating incremental extraction
pub struct SyncEngine {
    /// Run settings
    settings: SyncSettings,
    /// Retry ladder shared by every collaborator call
    policy: RetryPolicy,
    /// Watermark store
    store: WatermarkStore,
    /// Source of "now"
    clock: Clock,
}

impl SyncEngine {
    /// Create a new sync engine
    pub fn new(settings: SyncSettings, store: WatermarkStore) -> Self {
        Self {
            policy: settings.retry.policy(),
            settings,
            store,
            clock: Clock::System,
        }
    }

    /// Use a fixed clock
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the retry policy derived from the settings
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Get the watermark store
    pub fn store(&self) -> &WatermarkStore {
        &self.store
    }

    /// Get the settings
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Sync every stream of every partition
    ///
    /// Configuration errors abort before partitions are enumerated. Errors
    /// of one stream partition are recorded in the report, unless
    /// `fail_fast` is set, in which case the first one is returned.
    pub async fn run(
        &self,
        enumerator: &dyn PartitionEnumerator,
        streams: &[SyncStream],
        sink: &dyn RecordSink,
    ) -> Result<SyncReport> {
        let start = Instant::now();
        self.settings.validate()?;
        validate_streams(streams)?;

        let partitions = enumerator.partitions().await?;
        info!(
            partitions = partitions.len(),
            streams = streams.len(),
            mode = ?self.settings.mode,
            "starting sync"
        );
        sink.emit(Message::info(format!(
            "Syncing {} streams across {} partitions",
            streams.len(),
            partitions.len()
        )))
        .await?;

        let mut runs = futures::stream::iter(partitions)
            .map(|partition| self.sync_partition(partition, streams, sink))
            .buffer_unordered(self.settings.concurrency);

        let mut report = SyncReport::default();
        while let Some(result) = runs.next().await {
            for (stats, partition_report) in result? {
                report.stats.absorb(&stats);
                report.partitions.push(partition_report);
            }
        }
        drop(runs);

        self.store.checkpoint().await?;
        report.state = self.store.snapshot().await;

        #[allow(clippy::cast_possible_truncation)]
        report.stats.set_duration(start.elapsed().as_millis() as u64);

        info!(
            records = report.stats.records_synced,
            synced = report.stats.partitions_synced,
            skipped = report.stats.partitions_skipped,
            failed = report.stats.partitions_failed,
            duration_ms = report.stats.duration_ms,
            "sync finished"
        );
        Ok(report)
    }

    /// Sync every stream of one partition
    async fn sync_partition(
        &self,
        partition: PartitionKey,
        streams: &[SyncStream],
        sink: &dyn RecordSink,
    ) -> Result<Vec<(SyncStats, PartitionReport)>> {
        let mut reports = Vec::with_capacity(streams.len());

        for stream in streams {
            let mut run = StreamRun::new(self, &stream.name, &partition, sink);
            let result = run.execute(&stream.source).await;
            let mut stats = run.into_stats();

            let outcome = match result {
                Ok(strategy) => {
                    stats.partitions_synced += 1;
                    PartitionOutcome::Synced {
                        strategy: strategy.to_string(),
                        records: stats.records_synced,
                    }
                }
                Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                    warn!(stream = %stream.name, partition = %partition, error = %e, "skipping partition");
                    sink.emit(Message::warn(format!(
                        "Skipping {} of {partition}: {e}",
                        stream.name
                    )))
                    .await?;
                    stats.partitions_skipped += 1;
                    PartitionOutcome::Skipped {
                        reason: e.to_string(),
                    }
                }
                Err(e) => {
                    error!(stream = %stream.name, partition = %partition, error = %e, "partition failed");
                    if self.settings.fail_fast {
                        return Err(e);
                    }
                    sink.emit(Message::error(format!(
                        "Error in {} of {partition}: {e}",
                        stream.name
                    )))
                    .await?;
                    stats.partitions_failed += 1;
                    PartitionOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };

            reports.push((
                stats,
                PartitionReport {
                    stream: stream.name.clone(),
                    partition: partition.clone(),
                    outcome,
                },
            ));
        }

        Ok(reports)
    }
}

fn validate_streams(streams: &[SyncStream]) -> Result<()> {
    let mut seen = HashSet::new();
    for stream in streams {
        if stream.name.is_empty() {
            return Err(Error::config("Stream name cannot be empty"));
        }
        if !seen.insert(stream.name.as_str()) {
            return Err(Error::config(format!(
                "Duplicate stream name '{}'",
                stream.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
