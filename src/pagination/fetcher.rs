//! Paginated fetcher
//!
//! Drives repeated page fetches, feeding each page's `next_cursor` into the
//! next call until the cursor runs out. Every call goes through the shared
//! [`RetryPolicy`]. Pages are pulled one at a time with
//! [`PaginatedFetcher::next_page`]; the gap between two calls is the
//! cancellation point.

use crate::error::{Error, Result};
use crate::http::RetryPolicy;
use crate::types::{ChangeRecord, Page};
use async_trait::async_trait;
use futures::Stream;
use std::future::Future;
use tracing::debug;

/// One round trip returning a page
#[async_trait]
pub trait FetchPage: Send + Sync {
    /// Fetch the page at `cursor` (`None` = first page)
    async fn fetch_page(&self, cursor: Option<String>) -> Result<Page>;
}

#[async_trait]
impl<F, Fut> FetchPage for F
where
    F: Fn(Option<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Page>> + Send,
{
    async fn fetch_page(&self, cursor: Option<String>) -> Result<Page> {
        self(cursor).await
    }
}

/// Predicate marking the first record that is already synchronized
pub type StopPredicate<'a> = Box<dyn Fn(&ChangeRecord) -> bool + Send + Sync + 'a>;

/// Lazy sequence of pages
pub struct PaginatedFetcher<'a, F> {
    fetch: F,
    policy: RetryPolicy,
    operation: String,
    stop: Option<StopPredicate<'a>>,
    cursor: Option<String>,
    done: bool,
    pages: usize,
}

impl<'a, F: FetchPage> PaginatedFetcher<'a, F> {
    /// Start at the first page
    pub fn new(fetch: F, policy: RetryPolicy) -> Self {
        Self {
            fetch,
            policy,
            operation: "fetch_page".to_string(),
            stop: None,
            cursor: None,
            done: false,
            pages: 0,
        }
    }

    /// Name used in retry logs
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    /// Stop at the first record matching `predicate`
    ///
    /// The matching record and the rest of its page are dropped and no
    /// further pages are requested. Only valid for feeds that return
    /// records newest first.
    #[must_use]
    pub fn with_stop_predicate(mut self, predicate: StopPredicate<'a>) -> Self {
        self.stop = Some(predicate);
        self
    }

    /// Resume from a previously returned cursor
    #[must_use]
    pub fn resume_from(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    /// Cursor of the next page to fetch
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Check if no more pages will be fetched
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of pages fetched so far
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// Fetch the next page
    ///
    /// Returns `None` once the sequence is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        if self.done {
            return Ok(None);
        }

        let cursor = self.cursor.clone();
        let fetch = &self.fetch;
        let mut page = self
            .policy
            .run(&self.operation, || fetch.fetch_page(cursor.clone()))
            .await?;
        self.pages += 1;

        if let Some(ref stop) = self.stop {
            if let Some(pos) = page.items.iter().position(|r| stop(r)) {
                debug!(
                    operation = %self.operation,
                    page = self.pages,
                    kept = pos,
                    "stop predicate matched"
                );
                page.items.truncate(pos);
                page.next_cursor = None;
            }
        }

        match page.next_cursor {
            Some(ref next) if cursor.as_deref() == Some(next.as_str()) => {
                return Err(Error::malformed(format!(
                    "pagination cursor did not advance: {next}"
                )));
            }
            Some(ref next) => self.cursor = Some(next.clone()),
            None => self.done = true,
        }

        debug!(
            operation = %self.operation,
            page = self.pages,
            records = page.items.len(),
            has_more = !self.done,
            "fetched page"
        );
        Ok(Some(page))
    }

    /// Drain every page into one list
    pub async fn fetch_all(mut self) -> Result<Vec<ChangeRecord>> {
        let mut records = Vec::new();
        while let Some(page) = self.next_page().await? {
            records.extend(page.items);
        }
        Ok(records)
    }

    /// Convert into a stream of records
    pub fn into_stream(self) -> impl Stream<Item = Result<ChangeRecord>> + 'a
    where
        F: 'a,
    {
        let pages = futures::stream::try_unfold(self, |mut fetcher| async move {
            let next = fetcher.next_page().await?.map(|page| {
                let items = futures::stream::iter(page.items.into_iter().map(Ok::<_, Error>));
                (items, fetcher)
            });
            Ok::<_, Error>(next)
        });
        futures::TryStreamExt::try_flatten(pages)
    }
}
