//! One stream of one partition
//!
//! Selects the strategy for the stored watermark and executes it. Cutoffs
//! are merged once the fetch completes; change tokens are persisted after
//! every record; job descriptors after every observation.

use super::sink::RecordSink;
use super::types::{Message, SyncStats};
use super::SyncEngine;
use crate::delta::DeltaReconciler;
use crate::error::{Error, ErrorKind, Result};
use crate::jobs::{AsyncJobPoller, JobEvent, JobReason, JobState};
use crate::pagination::PaginatedFetcher;
use crate::source::{DeltaSource, ExportJobSource, PageSource, StreamSource};
use crate::state::{PendingJob, Watermark};
use crate::strategy::{select, select_job, Strategy};
use crate::types::{ChangeRecord, FetchMode, PartitionKey, RecordOrder, Timestamp};
use tracing::{debug, info, warn};

pub(super) struct StreamRun<'a> {
    engine: &'a SyncEngine,
    stream: &'a str,
    partition: &'a PartitionKey,
    sink: &'a dyn RecordSink,
    stats: SyncStats,
}

impl<'a> StreamRun<'a> {
    pub(super) fn new(
        engine: &'a SyncEngine,
        stream: &'a str,
        partition: &'a PartitionKey,
        sink: &'a dyn RecordSink,
    ) -> Self {
        Self {
            engine,
            stream,
            partition,
            sink,
            stats: SyncStats::new(),
        }
    }

    pub(super) fn into_stats(self) -> SyncStats {
        self.stats
    }

    /// Run the selected strategy; returns its name
    pub(super) async fn execute(&mut self, source: &StreamSource) -> Result<&'static str> {
        let engine = self.engine;
        let watermark = engine.store.get(self.stream, self.partition).await;
        let strategy = select(
            watermark.as_ref(),
            engine.settings.mode,
            source.kind(),
            engine.clock.now(),
            &engine.settings.export_jobs,
        );
        let name = strategy.name();
        info!(stream = %self.stream, partition = %self.partition, strategy = name, "syncing partition");

        match (source, strategy) {
            (StreamSource::Paginated(src), Strategy::FullFetch) => {
                self.fetch_pages(src.as_ref(), FetchMode::Full).await?;
            }
            (StreamSource::Paginated(src), Strategy::IncrementalFetch { cutoff }) => {
                self.fetch_pages(src.as_ref(), FetchMode::Since(cutoff)).await?;
            }
            (StreamSource::Delta(src), Strategy::FullFetch) => {
                self.snapshot(src.as_ref(), None).await?;
            }
            (StreamSource::Delta(src), Strategy::IncrementalFetch { cutoff }) => {
                self.snapshot(src.as_ref(), Some(cutoff)).await?;
            }
            (StreamSource::Delta(src), Strategy::DeltaFetch { token }) => {
                self.delta(src.as_ref(), token).await?;
            }
            (StreamSource::ExportJob(src), strategy) => {
                self.export(src.as_ref(), strategy).await?;
            }
            (source, strategy) => {
                return Err(Error::state(format!(
                    "strategy {} does not apply to {:?} streams",
                    strategy.name(),
                    source.kind()
                )));
            }
        }

        info!(
            stream = %self.stream,
            partition = %self.partition,
            records = self.stats.records_synced,
            pages = self.stats.pages_fetched,
            "partition synced"
        );
        Ok(name)
    }

    // ========================================================================
    // Paginated
    // ========================================================================

    async fn fetch_pages(&mut self, source: &dyn PageSource, mode: FetchMode) -> Result<()> {
        let engine = self.engine;
        let partition = self.partition;
        let order = source.order();
        let cutoff = match mode {
            FetchMode::Since(cutoff) => Some(cutoff),
            FetchMode::Full => None,
        };

        let fetch = move |cursor: Option<String>| async move {
            source.fetch_page(partition, cursor.as_deref(), &mode).await
        };
        let mut fetcher = PaginatedFetcher::new(fetch, engine.policy.clone());
        if let (Some(cutoff), RecordOrder::Descending) = (cutoff, order) {
            fetcher = fetcher.with_stop_predicate(Box::new(move |r: &ChangeRecord| {
                r.effective_time.is_some_and(|t| t <= cutoff)
            }));
        }
        let checkpoint = engine.settings.checkpoint_per_page && order == RecordOrder::Ascending;

        let mut newest: Option<Timestamp> = None;
        while let Some(page) = fetcher.next_page().await? {
            self.stats.add_page();
            newest = newest.max(self.emit_page(page.items, cutoff).await?);

            if checkpoint {
                if let Some(t) = newest {
                    engine.store.merge_cutoff(self.stream, partition, t).await?;
                }
            }
        }

        match newest {
            Some(t) => {
                let merged = engine.store.merge_cutoff(self.stream, partition, t).await?;
                self.emit_state(Some(merged)).await
            }
            None => {
                debug!(stream = %self.stream, partition = %partition, "no new records, watermark unchanged");
                Ok(())
            }
        }
    }

    /// Emit records newer than `cutoff`; returns the newest effective time
    ///
    /// Records without an effective time are always emitted.
    async fn emit_page(
        &mut self,
        records: Vec<ChangeRecord>,
        cutoff: Option<Timestamp>,
    ) -> Result<Option<Timestamp>> {
        let mut newest = None;
        for record in records {
            if let (Some(cutoff), Some(t)) = (cutoff, record.effective_time) {
                if t <= cutoff {
                    continue;
                }
            }
            newest = newest.max(record.effective_time);
            self.emit_record(record).await?;
        }
        Ok(newest)
    }

    // ========================================================================
    // Delta
    // ========================================================================

    /// Full listing of a change-feed stream
    ///
    /// The terminal page's sync token becomes the watermark. Without one the
    /// newest effective time is kept as a cutoff, and a stale token is
    /// dropped.
    async fn snapshot(&mut self, source: &dyn DeltaSource, cutoff: Option<Timestamp>) -> Result<()> {
        let engine = self.engine;
        let partition = self.partition;

        let fetch = move |cursor: Option<String>| async move {
            source.fetch_snapshot(partition, cursor.as_deref()).await
        };
        let mut fetcher = PaginatedFetcher::new(fetch, engine.policy.clone())
            .with_operation("fetch_snapshot");

        let mut newest: Option<Timestamp> = None;
        let mut sync_token = None;
        while let Some(page) = fetcher.next_page().await? {
            self.stats.add_page();
            if page.sync_token.is_some() {
                sync_token = page.sync_token;
            }
            newest = newest.max(self.emit_page(page.items, cutoff).await?);
        }

        let watermark = match (sync_token, newest) {
            (Some(token), _) => {
                let watermark = Watermark::change_token(token);
                engine.store.set(self.stream, partition, watermark.clone()).await?;
                Some(watermark)
            }
            (None, Some(t)) => Some(engine.store.merge_cutoff(self.stream, partition, t).await?),
            (None, None) => {
                let current = engine.store.get(self.stream, partition).await;
                if current.as_ref().and_then(Watermark::as_change_token).is_some() {
                    warn!(stream = %self.stream, partition = %partition, "full fetch returned no sync token, dropping stored token");
                    engine.store.remove(self.stream, partition).await?;
                    None
                } else {
                    return Ok(());
                }
            }
        };
        self.emit_state(watermark).await
    }

    async fn delta(&mut self, source: &dyn DeltaSource, token: String) -> Result<()> {
        let engine = self.engine;
        let partition = self.partition;
        let mut reconciler = DeltaReconciler::new(source, partition, &engine.policy, token);

        loop {
            let batch = match reconciler.next_batch().await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(e) if e.kind() == ErrorKind::TokenExpired => {
                    warn!(stream = %self.stream, partition = %partition, "change token expired, falling back to full fetch");
                    self.sink
                        .emit(Message::warn(format!(
                            "Change token for {} of {partition} expired; running a full fetch",
                            self.stream
                        )))
                        .await?;
                    self.stats.token_fallbacks += 1;
                    return self.snapshot(source, None).await;
                }
                Err(e) => return Err(e),
            };
            self.stats.add_page();

            if batch.items.is_empty() {
                engine
                    .store
                    .set(self.stream, partition, Watermark::change_token(batch.token))
                    .await?;
                continue;
            }
            for item in batch.items {
                self.emit_record(item.record).await?;
                engine
                    .store
                    .set(self.stream, partition, Watermark::change_token(item.next_token))
                    .await?;
            }
        }

        self.emit_state(Some(Watermark::change_token(reconciler.token())))
            .await
    }

    // ========================================================================
    // Export Jobs
    // ========================================================================

    async fn export(&mut self, source: &dyn ExportJobSource, strategy: Strategy) -> Result<()> {
        let engine = self.engine;
        let jobs = &engine.settings.export_jobs;
        let poller = AsyncJobPoller::new(source, self.partition, &engine.policy, jobs);
        let mut strategy = strategy;

        loop {
            match strategy {
                Strategy::Throttled { reason } => {
                    info!(stream = %self.stream, partition = %self.partition, %reason, "no export this run");
                    return self
                        .sink
                        .emit(Message::info(format!(
                            "No export for {} of {}: {reason}",
                            self.stream, self.partition
                        )))
                        .await;
                }
                Strategy::CreateJob {
                    window,
                    reason,
                    replaces,
                } => {
                    if reason == JobReason::Restart {
                        warn!(stream = %self.stream, partition = %self.partition, "pending export job went stale, starting a new one");
                    }
                    let event = poller.create(window).await?;
                    self.stats.jobs_created += 1;

                    let mut pending = PendingJob::created(&event.job, engine.clock.now());
                    if let Some(ref old) = replaces {
                        pending = pending.replacing(old);
                    }
                    self.emit_job(&event).await?;
                    let merged = engine
                        .store
                        .merge_job(self.stream, self.partition, pending, engine.clock.now(), jobs.stale_after)
                        .await?;
                    return self.emit_state(Some(merged)).await;
                }
                Strategy::PollJob(pending) => {
                    let outcome = poller.poll(&pending.as_job()).await?;
                    self.stats.jobs_polled += outcome.events.len();
                    for event in &outcome.events {
                        self.emit_job(event).await?;
                    }

                    let observed = pending.observe(&outcome.job);
                    if outcome.job.state != JobState::Completed {
                        let merged = engine
                            .store
                            .merge_job(self.stream, self.partition, observed, engine.clock.now(), jobs.stale_after)
                            .await?;
                        return self.emit_state(Some(merged)).await;
                    }

                    // results first, so a failed download is polled again next run
                    let mut fetcher = poller.results(&outcome.job);
                    while let Some(page) = fetcher.next_page().await? {
                        self.stats.add_page();
                        self.emit_page(page.items, None).await?;
                    }
                    let merged = engine
                        .store
                        .merge_job(self.stream, self.partition, observed.clone(), engine.clock.now(), jobs.stale_after)
                        .await?;
                    self.emit_state(Some(merged)).await?;

                    strategy = select_job(Some(&observed), engine.clock.now(), jobs);
                }
                other => {
                    return Err(Error::state(format!(
                        "strategy {} does not apply to export streams",
                        other.name()
                    )));
                }
            }
        }
    }

    // ========================================================================
    // Output
    // ========================================================================

    async fn emit_record(&mut self, record: ChangeRecord) -> Result<()> {
        self.stats.add_records(1);
        self.sink
            .emit(Message::record(self.stream, self.partition, record))
            .await
    }

    async fn emit_state(&self, watermark: Option<Watermark>) -> Result<()> {
        self.sink
            .emit(Message::state(self.stream, self.partition, watermark))
            .await
    }

    async fn emit_job(&self, event: &JobEvent) -> Result<()> {
        self.sink
            .emit(Message::job_status(
                self.stream,
                self.partition,
                event.job.clone(),
                event.previous,
            ))
            .await
    }
}
