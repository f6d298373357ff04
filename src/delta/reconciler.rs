//! Delta reconciler
//!
//! Walks a change feed batch by batch. Every emitted item carries the token
//! the caller should persist once that item has been handled. Items before
//! the last one in a batch carry the token the batch was fetched with, so a
//! crash mid-batch replays that batch; the last item carries the token that
//! follows the batch.

use crate::error::{Error, Result};
use crate::http::RetryPolicy;
use crate::source::{DeltaPage, DeltaSource};
use crate::types::{ChangeRecord, PartitionKey};
use tracing::debug;

/// One change plus the token to persist after handling it
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaItem {
    pub record: ChangeRecord,
    pub next_token: String,
}

/// Items of one fetched batch
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaBatch {
    pub items: Vec<DeltaItem>,
    /// Token after the whole batch; persisted even when `items` is empty
    pub token: String,
}

/// Lazy walk over a change feed starting at one token
pub struct DeltaReconciler<'a> {
    source: &'a dyn DeltaSource,
    partition: &'a PartitionKey,
    policy: &'a RetryPolicy,
    token: String,
    done: bool,
    batches: usize,
}

impl<'a> DeltaReconciler<'a> {
    /// Start reading changes after `token`
    pub fn new(
        source: &'a dyn DeltaSource,
        partition: &'a PartitionKey,
        policy: &'a RetryPolicy,
        token: impl Into<String>,
    ) -> Self {
        Self {
            source,
            partition,
            policy,
            token: token.into(),
            done: false,
            batches: 0,
        }
    }

    /// Latest token reached
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Check if the feed is drained
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of batches fetched
    pub fn batches_fetched(&self) -> usize {
        self.batches
    }

    /// Fetch the next batch
    ///
    /// A token-expired error from the first call is passed through
    /// unchanged; it is never retried.
    pub async fn next_batch(&mut self) -> Result<Option<DeltaBatch>> {
        if self.done {
            return Ok(None);
        }

        let source = self.source;
        let partition = self.partition;
        let token = self.token.clone();
        let page = self
            .policy
            .run("fetch_delta", || source.fetch_delta(partition, &token))
            .await?;
        self.batches += 1;

        let DeltaPage {
            changes,
            next_token,
            has_more,
        } = page;

        if has_more && next_token.is_none() {
            return Err(Error::malformed(format!(
                "change feed for {partition} reported more changes without a token"
            )));
        }
        if has_more && next_token.as_deref() == Some(token.as_str()) {
            return Err(Error::malformed(format!(
                "change feed token for {partition} did not advance"
            )));
        }

        let after = next_token.unwrap_or_else(|| token.clone());
        let last = changes.len().saturating_sub(1);
        let items = changes
            .into_iter()
            .enumerate()
            .map(|(i, record)| DeltaItem {
                record,
                next_token: if i == last { after.clone() } else { token.clone() },
            })
            .collect::<Vec<_>>();

        debug!(
            partition = %partition,
            batch = self.batches,
            changes = items.len(),
            has_more,
            "fetched change batch"
        );

        self.token = after.clone();
        self.done = !has_more;
        Ok(Some(DeltaBatch {
            items,
            token: after,
        }))
    }

    /// Drain the feed, returning every item and the final token
    pub async fn fetch_all(mut self) -> Result<(Vec<DeltaItem>, String)> {
        let mut items = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            items.extend(batch.items);
        }
        Ok((items, self.token))
    }
}
