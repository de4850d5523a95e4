// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Lazy, restartable search over the secondary store.
//!
//! # Architecture
//!
//! ```text
//! cursor.next()
//!       │
//!       ├─→ Buffered document? Return it
//!       │
//!       ├─→ Limit reached or store exhausted? None
//!       │
//!       └─→ Guarded page fetch (offset, page_size)
//!                │
//!                ├─→ Page: buffer matches, advance offset by `scanned`
//!                │
//!                └─→ Skipped / failed: treat as exhausted
//! ```
//!
//! Results come in `primary_id` order. A cursor never errors: an unreachable
//! store simply yields nothing, and a stored document that cannot be decoded
//! is skipped by the store while its neighbours are still returned.

use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::document::SyncedDocument;
use crate::model::EntityKind;

use super::{FetchError, SyncService};

/// Pull-based iterator over search results, capped at `search_limit`.
pub struct SearchCursor<'a> {
    service: &'a SyncService,
    kind: EntityKind,
    query: String,
    /// Candidates consumed from the store so far
    offset: usize,
    yielded: usize,
    buffer: VecDeque<SyncedDocument>,
    exhausted: bool,
}

impl<'a> SearchCursor<'a> {
    pub(super) fn new(service: &'a SyncService, kind: EntityKind, query: &str) -> Self {
        Self {
            service,
            kind,
            query: query.to_string(),
            offset: 0,
            yielded: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Documents returned so far.
    #[must_use]
    pub fn yielded(&self) -> usize {
        self.yielded
    }

    /// Next matching document, fetching another page when the buffer runs dry.
    pub async fn next(&mut self) -> Option<SyncedDocument> {
        loop {
            if self.yielded >= self.service.config().search_limit {
                return None;
            }
            if let Some(doc) = self.buffer.pop_front() {
                self.yielded += 1;
                return Some(doc);
            }
            if self.exhausted {
                return None;
            }
            self.fetch_page().await;
        }
    }

    /// Drain the remaining results.
    pub async fn collect(&mut self) -> Vec<SyncedDocument> {
        let mut docs = Vec::new();
        while let Some(doc) = self.next().await {
            docs.push(doc);
        }
        docs
    }

    /// Start over from the first result. The next call re-queries the store.
    pub fn restart(&mut self) {
        self.offset = 0;
        self.yielded = 0;
        self.buffer.clear();
        self.exhausted = false;
    }

    async fn fetch_page(&mut self) {
        let kind = self.kind;
        let offset = self.offset;
        let page_size = self.service.config().search_page_size.max(1);
        let query = self.query.clone();

        let result = self
            .service
            .guarded("search", |store| async move {
                store.search(kind, &query, offset, page_size).await
            })
            .await;

        match result {
            Ok(page) => {
                debug!(
                    kind = %kind,
                    offset,
                    scanned = page.scanned,
                    matched = page.documents.len(),
                    "Search page fetched"
                );
                crate::metrics::record_search_results(page.documents.len());
                self.offset += page.scanned;
                // A page that consumed nothing cannot make progress
                self.exhausted = page.exhausted || page.scanned == 0;
                self.buffer.extend(page.documents);
            }
            Err(FetchError::Skipped(reason)) => {
                debug!(kind = %kind, reason = %reason, "Search skipped");
                self.exhausted = true;
            }
            Err(FetchError::Storage(e)) => {
                warn!(kind = %kind, error = %e, "Search failed");
                self.exhausted = true;
            }
        }
    }
}
