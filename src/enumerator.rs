// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Candidate key enumeration.
//!
//! [`KeyStream`] pages through a source index and hands out keys one at a
//! time. It is lazy (a page is fetched only when the previous one is used
//! up), finite (stops at `limit` keys or on a short page) and single-use.
//!
//! ```text
//!   query_keys(offset=0,    limit=page) ──► [k0 .. k999]   (fresh)
//!   query_keys(offset=1000, limit=page) ──► [k1000 .. k1999]
//!   query_keys(offset=2000, limit=page) ──► [k2000 .. k2310] short page → done
//! ```
//!
//! Only the first page asks for a fresh index; later pages read the index
//! the first request already caught up.
//!
//! Keys are yielded in index order and are not deduplicated.

use crate::config::SyncConfig;
use crate::store::{DocumentStore, QueryPage, StoreResult};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Which index to read and how much of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexQuery {
    pub index: String,
    pub query: String,
    /// Maximum keys yielded in total.
    pub limit: usize,
    /// Keys requested per page.
    pub page_size: usize,
    /// Ask the store to bring the index up to date first.
    pub require_fresh: bool,
}

impl IndexQuery {
    pub fn new(index: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            query: query.into(),
            limit: 100_000,
            page_size: 1000,
            require_fresh: true,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(&config.source.index_name, &config.source.query_name)
            .with_limit(config.settings.query_limit)
            .with_page_size(config.settings.page_size)
            .with_fresh(config.settings.require_fresh_index)
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_fresh(mut self, require_fresh: bool) -> Self {
        self.require_fresh = require_fresh;
        self
    }
}

/// Lazy, finite sequence of candidate keys from a source index.
pub struct KeyStream<S: DocumentStore> {
    store: Arc<S>,
    query: IndexQuery,
    buffer: VecDeque<String>,
    offset: usize,
    yielded: usize,
    exhausted: bool,
}

impl<S: DocumentStore> KeyStream<S> {
    pub fn new(store: Arc<S>, query: IndexQuery) -> Self {
        let exhausted = query.limit == 0;
        Self {
            store,
            query,
            buffer: VecDeque::new(),
            offset: 0,
            yielded: 0,
            exhausted,
        }
    }

    /// Next key, `Ok(None)` when the stream is finished.
    ///
    /// An error from the index leaves the stream exhausted.
    pub async fn next_key(&mut self) -> StoreResult<Option<String>> {
        if self.yielded >= self.query.limit {
            return Ok(None);
        }

        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page().await {
                self.exhausted = true;
                return Err(e);
            }
        }

        match self.buffer.pop_front() {
            Some(key) => {
                self.yielded += 1;
                Ok(Some(key))
            }
            None => Ok(None),
        }
    }

    /// Drain the remaining keys into a vector.
    pub async fn collect_remaining(&mut self) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        while let Some(key) = self.next_key().await? {
            keys.push(key);
        }
        Ok(keys)
    }

    /// Keys handed out so far.
    pub fn yielded(&self) -> usize {
        self.yielded
    }

    pub fn query(&self) -> &IndexQuery {
        &self.query
    }

    async fn fetch_page(&mut self) -> StoreResult<()> {
        let remaining = self.query.limit - self.yielded;
        let limit = self.query.page_size.max(1).min(remaining);
        let page = QueryPage {
            offset: self.offset,
            limit,
            require_fresh: self.query.require_fresh && self.offset == 0,
        };

        let keys = self
            .store
            .query_keys(&self.query.index, &self.query.query, page)
            .await?;

        debug!(
            index = %self.query.index,
            query = %self.query.query,
            offset = page.offset,
            returned = keys.len(),
            "Index page read"
        );

        if keys.len() < limit || keys.len() >= remaining {
            self.exhausted = true;
        }
        self.offset += keys.len();
        self.buffer.extend(keys);
        Ok(())
    }
}

impl<S: DocumentStore> std::fmt::Debug for KeyStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStream")
            .field("query", &self.query)
            .field("offset", &self.offset)
            .field("yielded", &self.yielded)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}
