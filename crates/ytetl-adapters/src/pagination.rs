//! Cursor pagination and batched lookups with bounded retry, fixed pacing and
//! an optional run deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{Page, RetryDisposition, SourceError};

#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
    /// Minimum gap between successive requests against one collection.
    pub page_delay: Duration,
    /// Total attempts per page or batch, first try included.
    pub max_attempts: usize,
    pub retry_delay: Duration,
    pub batch_size: usize,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_secs(1),
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            batch_size: 50,
        }
    }
}

/// Point in time after which no further pages or batches are requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(budget: Duration) -> Self {
        Self(Some(Instant::now() + budget))
    }

    pub fn expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The server stopped handing out cursors.
    Exhausted,
    /// A permanent failure (or exhausted retries) ended the walk early.
    Abandoned { reason: String },
    DeadlineReached,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PagedFetch<T> {
    pub items: Vec<T>,
    pub pages: usize,
    pub completion: Completion,
}

impl<T> PagedFetch<T> {
    pub fn is_complete(&self) -> bool {
        self.completion == Completion::Exhausted
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchedFetch<T> {
    pub items: Vec<T>,
    pub batches: usize,
    pub failed_batches: usize,
    pub deadline_reached: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PaginationFetcher {
    policy: FetchPolicy,
    deadline: Deadline,
}

impl PaginationFetcher {
    pub fn new(policy: FetchPolicy) -> Self {
        Self {
            policy,
            deadline: Deadline::none(),
        }
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Walk every page of `collection`, following cursors until none is returned.
    ///
    /// Never fails: a permanent error keeps whatever pages were already read.
    pub async fn fetch_pages<T, F, Fut>(&self, collection: &str, mut fetch_page: F) -> PagedFetch<T>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<Page<T>, SourceError>>,
    {
        let mut items = Vec::new();
        let mut pages = 0usize;
        let mut cursor: Option<String> = None;

        let completion = loop {
            if self.deadline.expired() {
                warn!(collection, pages, items = items.len(), "run deadline reached; stopping pagination");
                break Completion::DeadlineReached;
            }

            let page = self
                .with_retry(collection, || fetch_page(cursor.clone()))
                .await;

            match page {
                Ok(page) => {
                    pages += 1;
                    let next = page.next_cursor().map(ToString::to_string);
                    items.extend(page.items);
                    debug!(collection, pages, items = items.len(), "page fetched");

                    match next {
                        Some(next) => {
                            cursor = Some(next);
                            tokio::time::sleep(self.policy.page_delay).await;
                        }
                        None => break Completion::Exhausted,
                    }
                }
                Err(err) => {
                    if err.is_access_denied() {
                        warn!(collection, error = %err, "quota exceeded or access denied");
                    }
                    warn!(
                        collection,
                        pages,
                        items = items.len(),
                        error = %err,
                        "abandoning pagination; keeping partial results"
                    );
                    break Completion::Abandoned {
                        reason: err.to_string(),
                    };
                }
            }
        };

        info!(collection, pages, items = items.len(), ?completion, "pagination finished");
        PagedFetch {
            items,
            pages,
            completion,
        }
    }

    /// Look up `ids` in chunks of `batch_size`. A failed chunk is logged and skipped.
    pub async fn fetch_batches<I, T, F, Fut>(
        &self,
        label: &str,
        ids: &[I],
        mut fetch_batch: F,
    ) -> BatchedFetch<T>
    where
        I: Clone,
        F: FnMut(Vec<I>) -> Fut,
        Fut: Future<Output = Result<Vec<T>, SourceError>>,
    {
        let mut out = BatchedFetch {
            items: Vec::new(),
            batches: 0,
            failed_batches: 0,
            deadline_reached: false,
        };

        for (index, chunk) in ids.chunks(self.policy.batch_size.max(1)).enumerate() {
            if self.deadline.expired() {
                warn!(label, batches = out.batches, "run deadline reached; skipping remaining batches");
                out.deadline_reached = true;
                break;
            }
            if index > 0 {
                tokio::time::sleep(self.policy.page_delay).await;
            }

            out.batches += 1;
            match self.with_retry(label, || fetch_batch(chunk.to_vec())).await {
                Ok(items) => out.items.extend(items),
                Err(err) => {
                    out.failed_batches += 1;
                    if err.is_access_denied() {
                        warn!(label, batch = index, error = %err, "quota exceeded or access denied");
                    }
                    warn!(label, batch = index, size = chunk.len(), error = %err, "skipping failed batch");
                }
            }
        }

        info!(
            label,
            batches = out.batches,
            failed_batches = out.failed_batches,
            items = out.items.len(),
            "batched lookup finished"
        );
        out
    }

    async fn with_retry<T, F, Fut>(&self, unit: &str, mut attempt_once: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1usize;
        loop {
            match attempt_once().await {
                Ok(value) => return Ok(value),
                Err(err)
                    if err.disposition() == RetryDisposition::Retryable
                        && attempt < max_attempts =>
                {
                    warn!(unit, attempt, max_attempts, error = %err, "transient failure; retrying");
                    tokio::time::sleep(self.policy.retry_delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
