//! Tests for engine module

use super::*;
use crate::config::{ExportJobConfig, SyncSettings};
use crate::error::{Error, ErrorKind, Result};
use crate::http::RetryPolicy;
use crate::jobs::{AsyncJob, JobState, JobWindow};
use crate::partition::{ListEnumerator, PartitionEnumerator};
use crate::source::{DeltaPage, DeltaSource, ExportJobSource, PageSource, SyncStream};
use crate::state::{JobFailure, PendingJob, Watermark, WatermarkStore};
use crate::types::{
    BackoffType, ChangeRecord, Clock, FetchMode, Page, PartitionKey, RecordOrder, SyncMode,
    Timestamp,
};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Fixtures
// ============================================================================

fn now() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

fn at(day: u32) -> Timestamp {
    Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
}

fn key(k: &str) -> PartitionKey {
    PartitionKey::new(k)
}

fn rec(id: &str, time: Timestamp) -> ChangeRecord {
    ChangeRecord::upsert(id, Some(time), json!({"id": id}))
}

fn ids(records: &[ChangeRecord]) -> Vec<String> {
    records.iter().map(|r| r.entity_id.clone()).collect()
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(2).with_backoff(
        BackoffType::Constant,
        std::time::Duration::ZERO,
        std::time::Duration::ZERO,
    )
}

fn job_settings() -> ExportJobConfig {
    ExportJobConfig::default()
        .with_max_window(Duration::days(30))
        .with_min_gap(Duration::hours(24))
        .with_stale_after(Duration::days(7))
        .with_lookback(Duration::days(30))
        .with_polling(1, Duration::zero())
}

fn engine(settings: SyncSettings) -> SyncEngine {
    SyncEngine::new(settings.with_export_jobs(job_settings()), WatermarkStore::in_memory())
        .with_clock(Clock::Fixed(now()))
        .with_policy(fast_policy())
}

/// Listing endpoint serving the same pages to every partition
struct FakePages {
    pages: Vec<Vec<ChangeRecord>>,
    order: RecordOrder,
    denied: Vec<&'static str>,
    malformed: Vec<&'static str>,
    fail_at_page: Option<usize>,
    calls: Mutex<Vec<(PartitionKey, Option<String>, FetchMode)>>,
}

impl FakePages {
    fn new(pages: Vec<Vec<ChangeRecord>>) -> Self {
        Self {
            pages,
            order: RecordOrder::Unordered,
            denied: Vec::new(),
            malformed: Vec::new(),
            fail_at_page: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn ordered(mut self, order: RecordOrder) -> Self {
        self.order = order;
        self
    }

    fn calls(&self) -> Vec<(PartitionKey, Option<String>, FetchMode)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSource for FakePages {
    async fn fetch_page(
        &self,
        partition: &PartitionKey,
        cursor: Option<&str>,
        mode: &FetchMode,
    ) -> Result<Page> {
        self.calls
            .lock()
            .unwrap()
            .push((partition.clone(), cursor.map(ToString::to_string), *mode));

        if self.denied.contains(&partition.as_str()) {
            return Err(Error::permission_denied(partition.as_str(), "Resource not accessible"));
        }
        if self.malformed.contains(&partition.as_str()) {
            return Err(Error::malformed("items is not an array"));
        }

        let index = cursor.map_or(0, |c| c.parse::<usize>().unwrap());
        if self.fail_at_page == Some(index) {
            return Err(Error::malformed("truncated body"));
        }
        let next = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
        Ok(Page::new(self.pages[index].clone(), next))
    }

    fn order(&self) -> RecordOrder {
        self.order
    }
}

/// Change feed replaying scripted batches
struct FakeFeed {
    snapshot: Vec<ChangeRecord>,
    snapshot_token: Option<String>,
    batches: Mutex<VecDeque<Result<DeltaPage>>>,
    snapshots: AtomicUsize,
    tokens: Mutex<Vec<String>>,
}

impl FakeFeed {
    fn new(snapshot: Vec<ChangeRecord>, snapshot_token: Option<&str>) -> Self {
        Self {
            snapshot,
            snapshot_token: snapshot_token.map(ToString::to_string),
            batches: Mutex::new(VecDeque::new()),
            snapshots: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
        }
    }

    fn with_batch(self, batch: Result<DeltaPage>) -> Self {
        self.batches.lock().unwrap().push_back(batch);
        self
    }

    fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeltaSource for FakeFeed {
    async fn fetch_snapshot(&self, _partition: &PartitionKey, _cursor: Option<&str>) -> Result<Page> {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        let page = Page::last(self.snapshot.clone());
        Ok(match self.snapshot_token {
            Some(ref token) => page.with_sync_token(token),
            None => page,
        })
    }

    async fn fetch_delta(&self, _partition: &PartitionKey, token: &str) -> Result<DeltaPage> {
        self.tokens.lock().unwrap().push(token.to_string());
        self.batches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(DeltaPage::last(Vec::new(), token)))
    }
}

/// Export API replaying scripted job states
struct FakeExports {
    states: Mutex<VecDeque<(JobState, Option<String>)>>,
    created: Mutex<Vec<JobWindow>>,
    polled: AtomicUsize,
    results: Vec<ChangeRecord>,
}

impl FakeExports {
    fn new(states: &[(JobState, Option<&str>)]) -> Self {
        Self {
            states: Mutex::new(
                states
                    .iter()
                    .map(|(s, r)| (*s, r.map(ToString::to_string)))
                    .collect(),
            ),
            created: Mutex::new(Vec::new()),
            polled: AtomicUsize::new(0),
            results: vec![rec("row-1", at(20)), rec("row-2", at(21))],
        }
    }

    fn created(&self) -> Vec<JobWindow> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExportJobSource for FakeExports {
    async fn create_export_job(&self, _partition: &PartitionKey, window: JobWindow) -> Result<AsyncJob> {
        let mut created = self.created.lock().unwrap();
        created.push(window);
        Ok(AsyncJob::new(format!("job-{}", created.len()), window))
    }

    async fn get_export_job(&self, _partition: &PartitionKey, job_id: &str) -> Result<AsyncJob> {
        self.polled.fetch_add(1, Ordering::SeqCst);
        let (state, reason) = self
            .states
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::malformed("no more scripted states"))?;
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        let mut job = AsyncJob::new(job_id, JobWindow::new(epoch, epoch)).with_state(state);
        job.error_reason = reason;
        Ok(job)
    }

    async fn fetch_job_results(
        &self,
        _partition: &PartitionKey,
        _job: &AsyncJob,
        _cursor: Option<&str>,
    ) -> Result<Page> {
        Ok(Page::last(self.results.clone()))
    }
}

/// Sink that refuses the n-th record
struct FailingSink {
    fail_on: usize,
    seen: AtomicUsize,
    inner: CollectingSink,
}

impl FailingSink {
    fn new(fail_on: usize) -> Self {
        Self {
            fail_on,
            seen: AtomicUsize::new(0),
            inner: CollectingSink::new(),
        }
    }
}

#[async_trait]
impl RecordSink for FailingSink {
    async fn emit(&self, message: Message) -> Result<()> {
        if message.is_record() && self.seen.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            return Err(Error::Other("downstream closed".to_string()));
        }
        self.inner.emit(message).await
    }
}

/// Enumerator counting its calls
struct CountingEnumerator {
    calls: AtomicUsize,
}

#[async_trait]
impl PartitionEnumerator for CountingEnumerator {
    async fn partitions(&self) -> Result<Vec<PartitionKey>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![key("P")])
    }
}

fn pending(state: JobState, window: JobWindow, created_at: Timestamp) -> PendingJob {
    PendingJob {
        job_id: "old-job".to_string(),
        window,
        state,
        error_reason: None,
        created_at: Some(created_at),
        last_failure: None,
    }
}

fn synced(strategy: &str, records: usize) -> PartitionOutcome {
    PartitionOutcome::Synced {
        strategy: strategy.to_string(),
        records,
    }
}

// ============================================================================
// Paginated Streams
// ============================================================================

#[tokio::test]
async fn test_first_run_full_fetch_sets_cutoff_to_newest() {
    let pages = Arc::new(FakePages::new(vec![vec![
        rec("a", at(1)),
        rec("b", at(2)),
        rec("c", at(3)),
    ]]));
    let streams = vec![SyncStream::paginated("issues", pages.clone())];
    let engine = engine(SyncSettings::new());
    let sink = CollectingSink::new();

    let report = engine
        .run(&ListEnumerator::new(["P"]), &streams, &sink)
        .await
        .unwrap();

    assert_eq!(ids(&sink.records().await), vec!["a", "b", "c"]);
    assert_eq!(pages.calls()[0].2, FetchMode::Full);
    assert_eq!(
        engine.store().get("issues", &key("P")).await,
        Some(Watermark::cutoff(at(3)))
    );
    assert_eq!(report.get("issues", "P"), Some(&synced("full_fetch", 3)));
    assert_eq!(
        report.state.get("issues", &key("P")),
        Some(&Watermark::cutoff(at(3)))
    );
    assert!(sink.messages().await.iter().any(Message::is_state));
}

#[tokio::test]
async fn test_incremental_resync_is_idempotent() {
    let pages = Arc::new(FakePages::new(vec![vec![rec("a", at(1)), rec("b", at(3))]]));
    let streams = vec![SyncStream::paginated("issues", pages.clone())];
    let engine = engine(SyncSettings::new());
    engine
        .store()
        .set("issues", &key("P"), Watermark::cutoff(at(3)))
        .await
        .unwrap();

    for _ in 0..2 {
        let sink = CollectingSink::new();
        let report = engine
            .run(&ListEnumerator::new(["P"]), &streams, &sink)
            .await
            .unwrap();

        assert!(sink.records().await.is_empty());
        assert_eq!(report.get("issues", "P"), Some(&synced("incremental_fetch", 0)));
        assert_eq!(
            engine.store().get("issues", &key("P")).await,
            Some(Watermark::cutoff(at(3)))
        );
    }

    let calls = pages.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|(_, _, mode)| *mode == FetchMode::Since(at(3))));
}

#[tokio::test]
async fn test_incremental_fetch_advances_cutoff() {
    let pages = Arc::new(FakePages::new(vec![
        vec![rec("old", at(1)), rec("new", at(4))],
        vec![rec("newer", at(6))],
    ]));
    let streams = vec![SyncStream::paginated("issues", pages.clone())];
    let engine = engine(SyncSettings::new());
    engine
        .store()
        .set("issues", &key("P"), Watermark::cutoff(at(2)))
        .await
        .unwrap();
    let sink = CollectingSink::new();

    engine
        .run(&ListEnumerator::new(["P"]), &streams, &sink)
        .await
        .unwrap();

    assert_eq!(ids(&sink.records().await), vec!["new", "newer"]);
    assert_eq!(
        engine.store().get("issues", &key("P")).await,
        Some(Watermark::cutoff(at(6)))
    );
}

#[tokio::test]
async fn test_full_refresh_ignores_but_keeps_cutoff() {
    let pages = Arc::new(FakePages::new(vec![vec![rec("a", at(1)), rec("b", at(2))]]));
    let streams = vec![SyncStream::paginated("issues", pages.clone())];
    let engine = engine(SyncSettings::new().with_mode(SyncMode::FullRefresh));
    engine
        .store()
        .set("issues", &key("P"), Watermark::cutoff(at(5)))
        .await
        .unwrap();
    let sink = CollectingSink::new();

    engine
        .run(&ListEnumerator::new(["P"]), &streams, &sink)
        .await
        .unwrap();

    assert_eq!(ids(&sink.records().await), vec!["a", "b"]);
    assert_eq!(pages.calls()[0].2, FetchMode::Full);
    assert_eq!(
        engine.store().get("issues", &key("P")).await,
        Some(Watermark::cutoff(at(5)))
    );
}

#[tokio::test]
async fn test_descending_feed_stops_at_cutoff() {
    let pages = Arc::new(
        FakePages::new(vec![
            vec![rec("c", at(3)), rec("b", at(2)), rec("a", at(1))],
            vec![rec("older", at(1))],
        ])
        .ordered(RecordOrder::Descending),
    );
    let streams = vec![SyncStream::paginated("issues", pages.clone())];
    let engine = engine(SyncSettings::new());
    engine
        .store()
        .set("issues", &key("P"), Watermark::cutoff(at(2)))
        .await
        .unwrap();
    let sink = CollectingSink::new();

    engine
        .run(&ListEnumerator::new(["P"]), &streams, &sink)
        .await
        .unwrap();

    assert_eq!(ids(&sink.records().await), vec!["c"]);
    assert_eq!(pages.calls().len(), 1);
    assert_eq!(
        engine.store().get("issues", &key("P")).await,
        Some(Watermark::cutoff(at(3)))
    );
}

#[tokio::test]
async fn test_unordered_feed_reads_every_page() {
    let pages = Arc::new(FakePages::new(vec![
        vec![rec("c", at(3)), rec("a", at(1))],
        vec![rec("d", at(4))],
    ]));
    let streams = vec![SyncStream::paginated("issues", pages.clone())];
    let engine = engine(SyncSettings::new());
    engine
        .store()
        .set("issues", &key("P"), Watermark::cutoff(at(2)))
        .await
        .unwrap();
    let sink = CollectingSink::new();

    engine
        .run(&ListEnumerator::new(["P"]), &streams, &sink)
        .await
        .unwrap();

    assert_eq!(ids(&sink.records().await), vec!["c", "d"]);
    assert_eq!(pages.calls().len(), 2);
}

#[tokio::test]
async fn test_per_page_checkpoint_survives_later_failure() {
    let build = || {
        let mut pages = FakePages::new(vec![vec![rec("a", at(1))], vec![rec("b", at(2))]])
            .ordered(RecordOrder::Ascending);
        pages.fail_at_page = Some(1);
        Arc::new(pages)
    };

    let checkpointing = engine(SyncSettings::new().with_checkpoint_per_page(true));
    let report = checkpointing
        .run(
            &ListEnumerator::new(["P"]),
            &[SyncStream::paginated("builds", build())],
            &CollectingSink::new(),
        )
        .await
        .unwrap();
    assert!(matches!(
        report.get("builds", "P"),
        Some(PartitionOutcome::Failed { .. })
    ));
    assert_eq!(
        checkpointing.store().get("builds", &key("P")).await,
        Some(Watermark::cutoff(at(1)))
    );

    let deferred = engine(SyncSettings::new());
    deferred
        .run(
            &ListEnumerator::new(["P"]),
            &[SyncStream::paginated("builds", build())],
            &CollectingSink::new(),
        )
        .await
        .unwrap();
    assert_eq!(deferred.store().get("builds", &key("P")).await, None);
}

// ============================================================================
// Error Handling
// ============================================================================

#[tokio::test]
async fn test_permission_denied_skips_partition() {
    let mut pages = FakePages::new(vec![vec![rec("a", at(1))]]);
    pages.denied = vec!["B"];
    let streams = vec![SyncStream::paginated("issues", Arc::new(pages))];
    let engine = engine(SyncSettings::new());
    let sink = CollectingSink::new();

    let report = engine
        .run(&ListEnumerator::new(["A", "B", "C"]), &streams, &sink)
        .await
        .unwrap();

    assert!(report.is_success());
    assert!(matches!(
        report.get("issues", "B"),
        Some(PartitionOutcome::Skipped { .. })
    ));
    assert_eq!(report.stats.partitions_skipped, 1);
    assert_eq!(report.stats.partitions_synced, 2);
    assert!(sink.records_for("issues", "B").await.is_empty());
    assert_eq!(engine.store().get("issues", &key("B")).await, None);
    assert!(sink.messages().await.iter().any(|m| matches!(
        m,
        Message::Log {
            level: LogLevel::Warn,
            ..
        }
    )));
}

#[tokio::test]
async fn test_partition_failure_is_isolated() {
    let mut pages = FakePages::new(vec![vec![rec("a", at(1))]]);
    pages.malformed = vec!["B"];
    let streams = vec![SyncStream::paginated("issues", Arc::new(pages))];
    let engine = engine(SyncSettings::new());
    let sink = CollectingSink::new();

    let report = engine
        .run(&ListEnumerator::new(["A", "B", "C"]), &streams, &sink)
        .await
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.failures().count(), 1);
    assert_eq!(report.get("issues", "A"), Some(&synced("full_fetch", 1)));
    assert_eq!(report.get("issues", "C"), Some(&synced("full_fetch", 1)));
    assert_eq!(engine.store().get("issues", &key("B")).await, None);
}

#[tokio::test]
async fn test_fail_fast_returns_first_error() {
    let mut pages = FakePages::new(vec![vec![rec("a", at(1))]]);
    pages.malformed = vec!["B"];
    let streams = vec![SyncStream::paginated("issues", Arc::new(pages))];
    let engine = engine(SyncSettings::new().with_fail_fast(true).with_concurrency(1));

    let err = engine
        .run(&ListEnumerator::new(["A", "B", "C"]), &streams, &CollectingSink::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
}

#[tokio::test]
async fn test_invalid_settings_abort_before_enumeration() {
    let enumerator = CountingEnumerator {
        calls: AtomicUsize::new(0),
    };
    let pages = Arc::new(FakePages::new(vec![Vec::new()]));
    let streams = vec![SyncStream::paginated("issues", pages.clone())];
    let engine = engine(SyncSettings::new().with_concurrency(0));

    let err = engine
        .run(&enumerator, &streams, &CollectingSink::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(enumerator.calls.load(Ordering::SeqCst), 0);
    assert!(pages.calls().is_empty());
}

#[tokio::test]
async fn test_duplicate_stream_names_rejected() {
    let pages = Arc::new(FakePages::new(vec![Vec::new()]));
    let streams = vec![
        SyncStream::paginated("issues", pages.clone()),
        SyncStream::paginated("issues", pages),
    ];
    let err = engine(SyncSettings::new())
        .run(&ListEnumerator::new(["P"]), &streams, &CollectingSink::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_many_partitions_concurrently() {
    let pages = Arc::new(FakePages::new(vec![vec![rec("a", at(1))], vec![rec("b", at(2))]]));
    let streams = vec![SyncStream::paginated("issues", pages.clone())];
    let engine = engine(SyncSettings::new().with_concurrency(4));
    let partitions: Vec<String> = (0..20).map(|i| format!("org/repo-{i}")).collect();
    let sink = CollectingSink::new();

    let report = engine
        .run(&ListEnumerator::new(partitions.clone()), &streams, &sink)
        .await
        .unwrap();

    assert_eq!(report.stats.partitions_synced, 20);
    assert_eq!(report.stats.records_synced, 40);
    assert_eq!(report.stats.pages_fetched, 40);
    for p in &partitions {
        assert_eq!(
            report.state.get("issues", &key(p)),
            Some(&Watermark::cutoff(at(2)))
        );
    }
}

// ============================================================================
// Delta Streams
// ============================================================================

#[tokio::test]
async fn test_snapshot_seeds_change_token() {
    let feed = Arc::new(FakeFeed::new(vec![rec("e1", at(1))], Some("sync-1")));
    let streams = vec![SyncStream::delta("events", feed.clone())];
    let engine = engine(SyncSettings::new());
    let sink = CollectingSink::new();

    let report = engine
        .run(&ListEnumerator::new(["cal"]), &streams, &sink)
        .await
        .unwrap();

    assert_eq!(report.get("events", "cal"), Some(&synced("full_fetch", 1)));
    assert_eq!(
        engine.store().get("events", &key("cal")).await,
        Some(Watermark::change_token("sync-1"))
    );
    assert!(feed.tokens().is_empty());
}

#[tokio::test]
async fn test_delta_fetch_passes_tombstones_and_advances_token() {
    let feed = Arc::new(
        FakeFeed::new(Vec::new(), None)
            .with_batch(Ok(DeltaPage::more(vec![rec("e1", at(1))], "t2")))
            .with_batch(Ok(DeltaPage::last(
                vec![ChangeRecord::delete("e2", None)],
                "t3",
            ))),
    );
    let streams = vec![SyncStream::delta("events", feed.clone())];
    let engine = engine(SyncSettings::new());
    engine
        .store()
        .set("events", &key("cal"), Watermark::change_token("t1"))
        .await
        .unwrap();
    let sink = CollectingSink::new();

    let report = engine
        .run(&ListEnumerator::new(["cal"]), &streams, &sink)
        .await
        .unwrap();

    let records = sink.records().await;
    assert_eq!(ids(&records), vec!["e1", "e2"]);
    assert!(records[1].is_delete());
    assert!(records[1].payload.is_none());
    assert_eq!(feed.tokens(), vec!["t1", "t2"]);
    assert_eq!(report.get("events", "cal"), Some(&synced("delta_fetch", 2)));
    assert_eq!(
        engine.store().get("events", &key("cal")).await,
        Some(Watermark::change_token("t3"))
    );
}

#[tokio::test]
async fn test_delta_token_persisted_per_item() {
    let feed = Arc::new(
        FakeFeed::new(Vec::new(), None)
            .with_batch(Ok(DeltaPage::more(vec![rec("e1", at(1))], "t2")))
            .with_batch(Ok(DeltaPage::last(
                vec![rec("e2", at(2)), rec("e3", at(3))],
                "t3",
            ))),
    );
    let streams = vec![SyncStream::delta("events", feed.clone())];
    let engine = engine(SyncSettings::new());
    engine
        .store()
        .set("events", &key("cal"), Watermark::change_token("t1"))
        .await
        .unwrap();

    // the sink gives up on e3
    let report = engine
        .run(&ListEnumerator::new(["cal"]), &streams, &FailingSink::new(3))
        .await
        .unwrap();

    assert!(matches!(
        report.get("events", "cal"),
        Some(PartitionOutcome::Failed { .. })
    ));
    assert_eq!(
        engine.store().get("events", &key("cal")).await,
        Some(Watermark::change_token("t2"))
    );
}

#[tokio::test]
async fn test_token_expiry_falls_back_to_one_full_fetch() {
    let feed = Arc::new(
        FakeFeed::new(vec![rec("e1", at(1)), rec("e2", at(2))], Some("fresh"))
            .with_batch(Err(Error::token_expired("cal"))),
    );
    let streams = vec![SyncStream::delta("events", feed.clone())];
    let engine = engine(SyncSettings::new());
    engine
        .store()
        .set("events", &key("cal"), Watermark::change_token("stale"))
        .await
        .unwrap();
    let sink = CollectingSink::new();

    let report = engine
        .run(&ListEnumerator::new(["cal"]), &streams, &sink)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(feed.tokens(), vec!["stale"]);
    assert_eq!(feed.snapshots.load(Ordering::SeqCst), 1);
    assert_eq!(report.stats.token_fallbacks, 1);
    assert_eq!(ids(&sink.records().await), vec!["e1", "e2"]);
    assert_eq!(
        engine.store().get("events", &key("cal")).await,
        Some(Watermark::change_token("fresh"))
    );
}

#[tokio::test]
async fn test_token_expiry_without_new_token_discards_watermark() {
    let feed = Arc::new(
        FakeFeed::new(Vec::new(), None).with_batch(Err(Error::token_expired("cal"))),
    );
    let streams = vec![SyncStream::delta("events", feed.clone())];
    let engine = engine(SyncSettings::new());
    engine
        .store()
        .set("events", &key("cal"), Watermark::change_token("stale"))
        .await
        .unwrap();

    engine
        .run(&ListEnumerator::new(["cal"]), &streams, &CollectingSink::new())
        .await
        .unwrap();

    assert_eq!(engine.store().get("events", &key("cal")).await, None);
}

// ============================================================================
// Export Job Streams
// ============================================================================

fn export_streams(exports: &Arc<FakeExports>) -> Vec<SyncStream> {
    vec![SyncStream::export_job("stats", exports.clone())]
}

fn stored_job(watermark: Option<Watermark>) -> PendingJob {
    match watermark {
        Some(Watermark::PendingJob(job)) => job,
        other => panic!("expected pending job, got {other:?}"),
    }
}

#[tokio::test]
async fn test_first_job_uses_capped_lookback() {
    let exports = Arc::new(FakeExports::new(&[]));
    let engine = engine(SyncSettings::new());
    let sink = CollectingSink::new();

    engine
        .run(&ListEnumerator::new(["acct"]), &export_streams(&exports), &sink)
        .await
        .unwrap();

    let window = JobWindow::new(now() - Duration::days(30), now());
    assert_eq!(exports.created(), vec![window]);

    let job = stored_job(engine.store().get("stats", &key("acct")).await);
    assert_eq!(job.job_id, "job-1");
    assert_eq!(job.state, JobState::Created);
    assert_eq!(job.created_at, Some(now()));
    assert!(sink.messages().await.iter().any(Message::is_job_status));
}

#[tokio::test]
async fn test_min_gap_throttles_job_creation() {
    let exports = Arc::new(FakeExports::new(&[]));
    let engine = engine(SyncSettings::new());
    let previous = pending(
        JobState::Completed,
        JobWindow::new(now() - Duration::days(2), now() - Duration::hours(1)),
        now() - Duration::days(2),
    );
    engine
        .store()
        .set("stats", &key("acct"), Watermark::PendingJob(previous.clone()))
        .await
        .unwrap();
    let sink = CollectingSink::new();

    let report = engine
        .run(&ListEnumerator::new(["acct"]), &export_streams(&exports), &sink)
        .await
        .unwrap();

    assert_eq!(report.get("stats", "acct"), Some(&synced("throttled", 0)));
    assert!(exports.created().is_empty());
    assert_eq!(exports.polled.load(Ordering::SeqCst), 0);
    assert!(sink.records().await.is_empty());
    assert_eq!(
        engine.store().get("stats", &key("acct")).await,
        Some(Watermark::PendingJob(previous))
    );
}

#[tokio::test]
async fn test_completed_job_past_min_gap_creates_next_window() {
    let exports = Arc::new(FakeExports::new(&[]));
    let engine = engine(SyncSettings::new());
    let t0 = now() - Duration::hours(48);
    engine
        .store()
        .set(
            "stats",
            &key("acct"),
            Watermark::PendingJob(pending(
                JobState::Completed,
                JobWindow::new(t0 - Duration::days(1), t0),
                t0,
            )),
        )
        .await
        .unwrap();

    engine
        .run(&ListEnumerator::new(["acct"]), &export_streams(&exports), &CollectingSink::new())
        .await
        .unwrap();

    assert_eq!(exports.created(), vec![JobWindow::new(t0, now())]);
}

#[tokio::test]
async fn test_failed_job_retried_with_extended_window() {
    let exports = Arc::new(FakeExports::new(&[]));
    let engine = engine(SyncSettings::new());
    let start = now() - Duration::days(10);
    let failed_window = JobWindow::new(start, now() - Duration::days(9));
    let mut failed = pending(JobState::Failed, failed_window, start);
    failed.error_reason = Some("quota exceeded".to_string());
    engine
        .store()
        .set("stats", &key("acct"), Watermark::PendingJob(failed))
        .await
        .unwrap();

    engine
        .run(&ListEnumerator::new(["acct"]), &export_streams(&exports), &CollectingSink::new())
        .await
        .unwrap();

    assert_eq!(exports.created(), vec![JobWindow::new(start, now())]);
    let job = stored_job(engine.store().get("stats", &key("acct")).await);
    assert!(job.window.end >= failed_window.end);
    assert_eq!(
        job.last_failure,
        Some(JobFailure {
            job_id: "old-job".to_string(),
            window: failed_window,
            error_reason: Some("quota exceeded".to_string()),
        })
    );
}

#[tokio::test]
async fn test_stale_pending_job_is_replaced() {
    let exports = Arc::new(FakeExports::new(&[(JobState::Processing, None)]));
    let engine = engine(SyncSettings::new());
    let window = JobWindow::new(now() - Duration::days(9), now() - Duration::days(8));
    engine
        .store()
        .set(
            "stats",
            &key("acct"),
            Watermark::PendingJob(pending(JobState::Processing, window, now() - Duration::days(8))),
        )
        .await
        .unwrap();

    let report = engine
        .run(&ListEnumerator::new(["acct"]), &export_streams(&exports), &CollectingSink::new())
        .await
        .unwrap();

    assert_eq!(report.get("stats", "acct"), Some(&synced("create_job", 0)));
    assert_eq!(exports.polled.load(Ordering::SeqCst), 0);
    assert_eq!(exports.created(), vec![JobWindow::new(window.start, now())]);
    let job = stored_job(engine.store().get("stats", &key("acct")).await);
    assert_eq!(job.job_id, "job-1");
}

#[tokio::test]
async fn test_processing_job_is_polled_and_kept() {
    let exports = Arc::new(FakeExports::new(&[(JobState::Processing, None)]));
    let engine = engine(SyncSettings::new());
    let window = JobWindow::new(now() - Duration::days(5), now() - Duration::days(2));
    engine
        .store()
        .set(
            "stats",
            &key("acct"),
            Watermark::PendingJob(pending(JobState::Created, window, now() - Duration::hours(2))),
        )
        .await
        .unwrap();
    let sink = CollectingSink::new();

    let report = engine
        .run(&ListEnumerator::new(["acct"]), &export_streams(&exports), &sink)
        .await
        .unwrap();

    assert_eq!(report.get("stats", "acct"), Some(&synced("poll_job", 0)));
    assert!(exports.created().is_empty());
    let job = stored_job(engine.store().get("stats", &key("acct")).await);
    assert_eq!(job.state, JobState::Processing);
    assert_eq!(job.window, window);

    let statuses: Vec<_> = sink
        .messages()
        .await
        .into_iter()
        .filter_map(|m| match m {
            Message::JobStatus { job, previous, .. } => Some((previous, job.state)),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, vec![(Some(JobState::Created), JobState::Processing)]);
}

#[tokio::test]
async fn test_completed_job_downloads_then_creates_next() {
    let exports = Arc::new(FakeExports::new(&[(JobState::Completed, None)]));
    let engine = engine(SyncSettings::new());
    let window = JobWindow::new(now() - Duration::days(40), now() - Duration::days(10));
    engine
        .store()
        .set(
            "stats",
            &key("acct"),
            Watermark::PendingJob(pending(JobState::Processing, window, now() - Duration::hours(3))),
        )
        .await
        .unwrap();
    let sink = CollectingSink::new();

    let report = engine
        .run(&ListEnumerator::new(["acct"]), &export_streams(&exports), &sink)
        .await
        .unwrap();

    assert_eq!(ids(&sink.records().await), vec!["row-1", "row-2"]);
    assert_eq!(exports.created(), vec![JobWindow::new(window.end, now())]);
    assert_eq!(report.stats.jobs_polled, 1);
    assert_eq!(report.stats.jobs_created, 1);

    let job = stored_job(engine.store().get("stats", &key("acct")).await);
    assert_eq!(job.job_id, "job-1");
    assert_eq!(job.window.start, window.end);
}

#[tokio::test]
async fn test_failed_poll_then_retry_next_run() {
    let exports = Arc::new(FakeExports::new(&[(JobState::Failed, Some("disk full"))]));
    let engine = engine(SyncSettings::new());
    let window = JobWindow::new(now() - Duration::days(3), now() - Duration::days(2));
    engine
        .store()
        .set(
            "stats",
            &key("acct"),
            Watermark::PendingJob(pending(JobState::Processing, window, now() - Duration::hours(1))),
        )
        .await
        .unwrap();

    engine
        .run(&ListEnumerator::new(["acct"]), &export_streams(&exports), &CollectingSink::new())
        .await
        .unwrap();
    let failed = stored_job(engine.store().get("stats", &key("acct")).await);
    assert_eq!(failed.state, JobState::Failed);
    assert_eq!(failed.error_reason.as_deref(), Some("disk full"));
    assert!(exports.created().is_empty());

    engine
        .run(&ListEnumerator::new(["acct"]), &export_streams(&exports), &CollectingSink::new())
        .await
        .unwrap();
    let retry = stored_job(engine.store().get("stats", &key("acct")).await);
    assert_eq!(exports.created(), vec![JobWindow::new(window.start, now())]);
    assert_eq!(
        retry.last_failure.and_then(|f| f.error_reason).as_deref(),
        Some("disk full")
    );
}

// ============================================================================
// Sinks
// ============================================================================

#[tokio::test]
async fn test_json_lines_sink_skips_logs_by_default() {
    let sink = JsonLinesSink::new(Vec::new());
    sink.emit(Message::record("issues", &key("P"), rec("a", at(1))))
        .await
        .unwrap();
    sink.emit(Message::info("hello")).await.unwrap();
    sink.emit(Message::state("issues", &key("P"), Some(Watermark::cutoff(at(1)))))
        .await
        .unwrap();

    let output = String::from_utf8(sink.into_inner()).unwrap();
    let lines: Vec<serde_json::Value> = output
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["type"], "record");
    assert_eq!(lines[0]["record"]["entity_id"], "a");
    assert_eq!(lines[1]["type"], "state");
    assert_eq!(lines[1]["watermark"]["type"], "cutoff");
}

#[tokio::test]
async fn test_json_lines_sink_with_logs() {
    let sink = JsonLinesSink::new(Vec::new()).with_logs(true);
    sink.emit(Message::warn("careful")).await.unwrap();

    let output = String::from_utf8(sink.into_inner()).unwrap();
    let line: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
    assert_eq!(line, json!({"type": "log", "level": "warn", "message": "careful"}));
}
