//! Pagination module
//!
//! # Overview
//!
//! The paginated fetcher turns a "fetch next page" collaborator into a lazy
//! sequence of pages. It follows `next_cursor` until it runs out, retries
//! every call through the shared retry policy and optionally stops early on
//! newest-first feeds once it reaches already-synchronized records.

mod fetcher;

pub use fetcher::{FetchPage, PaginatedFetcher, StopPredicate};
