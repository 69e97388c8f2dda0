// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process [`DocumentStore`] with fault injection.
//!
//! Behaves like a real bucket for the four replication operations and
//! records every call, so tests can assert what the replicator did (and
//! what it did *not* do, e.g. no write after a failed fetch).
//!
//! Faults and delays are keyed by `(operation, key)`. For index queries
//! the key is `"{index}/{query}"`.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() {
//! use bucket_sync::memory_store::MemoryStore;
//! use bucket_sync::store::{StoreError, StoreOp};
//!
//! let source = MemoryStore::new("frombucket");
//! source.put("a", "1").await;
//! source.put("b", "2").await;
//! source.index_all("dev_sync", "all").await;
//! source.fail_on(StoreOp::Get, "a", StoreError::not_found("a")).await;
//! # }
//! ```

use crate::config::StoreEndpoint;
use crate::store::{
    Ack, BoxFuture, Document, DocumentStore, QueryPage, StoreConnector, StoreError, StoreOp,
    StoreResult, StoreRole,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// A recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub key: String,
}

#[derive(Debug, Clone)]
struct Stored {
    value: Vec<u8>,
    revision: u64,
}

#[derive(Default)]
struct MemoryState {
    docs: BTreeMap<String, Stored>,
    indexes: HashMap<(String, String), Vec<String>>,
    faults: HashMap<(StoreOp, String), StoreError>,
    delays: HashMap<(StoreOp, String), Duration>,
    calls: Vec<StoreCall>,
    pages: Vec<QueryPage>,
    revision: u64,
}

impl MemoryState {
    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

/// Bucket held in memory. Clones share the same contents.
#[derive(Clone)]
pub struct MemoryStore {
    bucket: Arc<str>,
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: Arc::from(bucket.into()),
            state: Arc::new(RwLock::new(MemoryState::default())),
        }
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    /// Write a document unconditionally (bypasses fault injection).
    pub async fn put(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        let mut state = self.state.write().await;
        let revision = state.next_revision();
        state.docs.insert(
            key.into(),
            Stored {
                value: value.into(),
                revision,
            },
        );
    }

    /// Define an index/query pair returning `keys` in the given order.
    ///
    /// Keys need not exist as documents; duplicates are kept.
    pub async fn define_index<I, K>(&self, index: &str, query: &str, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let keys = keys.into_iter().map(Into::into).collect();
        let mut state = self.state.write().await;
        state
            .indexes
            .insert((index.to_string(), query.to_string()), keys);
    }

    /// Define an index/query pair over every current document, in key order.
    pub async fn index_all(&self, index: &str, query: &str) {
        let mut state = self.state.write().await;
        let keys = state.docs.keys().cloned().collect();
        state
            .indexes
            .insert((index.to_string(), query.to_string()), keys);
    }

    // =========================================================================
    // Fault injection
    // =========================================================================

    /// Make `op` on `key` fail with `error`.
    pub async fn fail_on(&self, op: StoreOp, key: &str, error: StoreError) {
        let mut state = self.state.write().await;
        state.faults.insert((op, key.to_string()), error);
    }

    /// Delay `op` on `key` before it runs.
    pub async fn delay_on(&self, op: StoreOp, key: &str, delay: Duration) {
        let mut state = self.state.write().await;
        state.delays.insert((op, key.to_string()), delay);
    }

    pub async fn clear_faults(&self) {
        let mut state = self.state.write().await;
        state.faults.clear();
        state.delays.clear();
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub async fn value(&self, key: &str) -> Option<Vec<u8>> {
        let state = self.state.read().await;
        state.docs.get(key).map(|stored| stored.value.clone())
    }

    /// Current contents, key → value.
    pub async fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        let state = self.state.read().await;
        state
            .docs
            .iter()
            .map(|(key, stored)| (key.clone(), stored.value.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.docs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Every call made through the [`DocumentStore`] interface, in order.
    pub async fn calls(&self) -> Vec<StoreCall> {
        self.state.read().await.calls.clone()
    }

    /// Page requests received by `query_keys`, in call order.
    pub async fn query_pages(&self) -> Vec<QueryPage> {
        self.state.read().await.pages.clone()
    }

    /// Keys passed to `op`, in call order.
    pub async fn calls_for(&self, op: StoreOp) -> Vec<String> {
        let state = self.state.read().await;
        state
            .calls
            .iter()
            .filter(|call| call.op == op)
            .map(|call| call.key.clone())
            .collect()
    }

    /// Record the call, then apply any configured delay and fault.
    async fn enter(&self, op: StoreOp, key: &str) -> StoreResult<()> {
        let (delay, fault) = {
            let mut state = self.state.write().await;
            state.calls.push(StoreCall {
                op,
                key: key.to_string(),
            });
            let id = (op, key.to_string());
            (state.delays.get(&id).copied(), state.faults.get(&id).cloned())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match fault {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl DocumentStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn query_keys<'a>(
        &'a self,
        index: &'a str,
        query: &'a str,
        page: QueryPage,
    ) -> BoxFuture<'a, Vec<String>> {
        Box::pin(async move {
            self.enter(StoreOp::Query, &format!("{index}/{query}")).await?;

            let mut state = self.state.write().await;
            state.pages.push(page);
            let keys = state
                .indexes
                .get(&(index.to_string(), query.to_string()))
                .ok_or_else(|| StoreError::IndexMissing {
                    index: index.to_string(),
                    query: query.to_string(),
                })?;

            Ok(keys.iter().skip(page.offset).take(page.limit).cloned().collect())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Document> {
        Box::pin(async move {
            self.enter(StoreOp::Get, key).await?;

            let state = self.state.read().await;
            let stored = state.docs.get(key).ok_or_else(|| StoreError::not_found(key))?;
            Ok(Document {
                key: key.to_string(),
                value: stored.value.clone(),
                revision: Some(stored.revision),
            })
        })
    }

    fn insert<'a>(&'a self, key: &'a str, value: &'a [u8]) -> BoxFuture<'a, Ack> {
        Box::pin(async move {
            self.enter(StoreOp::Insert, key).await?;

            let mut state = self.state.write().await;
            if state.docs.contains_key(key) {
                return Err(StoreError::conflict(key));
            }
            let revision = state.next_revision();
            state.docs.insert(
                key.to_string(),
                Stored {
                    value: value.to_vec(),
                    revision,
                },
            );
            Ok(Ack {
                revision: Some(revision),
            })
        })
    }

    fn replace<'a>(&'a self, key: &'a str, value: &'a [u8]) -> BoxFuture<'a, Ack> {
        Box::pin(async move {
            self.enter(StoreOp::Replace, key).await?;

            let mut state = self.state.write().await;
            if !state.docs.contains_key(key) {
                return Err(StoreError::not_found(key));
            }
            let revision = state.next_revision();
            state.docs.insert(
                key.to_string(),
                Stored {
                    value: value.to_vec(),
                    revision,
                },
            );
            Ok(Ack {
                revision: Some(revision),
            })
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Connector
// ═══════════════════════════════════════════════════════════════════════════════

/// Hands out registered [`MemoryStore`]s by bucket name.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    stores: HashMap<String, MemoryStore>,
    refused: HashSet<StoreRole>,
    connects: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store under its bucket name.
    pub fn with_store(mut self, store: MemoryStore) -> Self {
        self.stores.insert(store.bucket().to_string(), store);
        self
    }

    /// Fail every connection attempt for `role`.
    pub fn refuse(mut self, role: StoreRole) -> Self {
        self.refused.insert(role);
        self
    }

    /// Connection attempts made so far, including refused ones.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl StoreConnector for MemoryConnector {
    type Store = MemoryStore;

    fn connect<'a>(
        &'a self,
        role: StoreRole,
        endpoint: &'a StoreEndpoint,
    ) -> BoxFuture<'a, Self::Store> {
        Box::pin(async move {
            self.connects.fetch_add(1, Ordering::SeqCst);

            if self.refused.contains(&role) {
                return Err(StoreError::Connect {
                    host: endpoint.host.clone(),
                    message: "connection refused".to_string(),
                });
            }
            self.stores
                .get(&endpoint.bucket)
                .cloned()
                .ok_or_else(|| StoreError::Connect {
                    host: endpoint.host.clone(),
                    message: format!("bucket {} does not exist", endpoint.bucket),
                })
        })
    }
}
