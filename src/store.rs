// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Document store interface.
//!
//! The replicator only needs a narrow contract from a key-value store:
//! enumerate keys through a server-side index, read a document, and two
//! conditional writes. Every call returns a tagged [`StoreError`] so the
//! replicator can branch on "already exists" versus "network failure"
//! without inspecting error strings.
//!
//! | Operation | Success | Expected failure |
//! |-----------|---------|------------------|
//! | `query_keys` | page of keys | `IndexMissing` |
//! | `get` | [`Document`] | `NotFound` |
//! | `insert` | [`Ack`] | `Conflict` (key exists) |
//! | `replace` | [`Ack`] | `NotFound` (key absent) |
//!
//! # Example
//!
//! ```rust,no_run
//! use bucket_sync::store::{Ack, BoxFuture, Document, DocumentStore, QueryPage, StoreError};
//!
//! struct ReadOnly;
//!
//! impl DocumentStore for ReadOnly {
//!     fn bucket(&self) -> &str {
//!         "readonly"
//!     }
//!
//!     fn query_keys<'a>(&'a self, _index: &'a str, _query: &'a str, _page: QueryPage) -> BoxFuture<'a, Vec<String>> {
//!         Box::pin(async move { Ok(Vec::new()) })
//!     }
//!
//!     fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Document> {
//!         Box::pin(async move { Err(StoreError::not_found(key)) })
//!     }
//!
//!     fn insert<'a>(&'a self, key: &'a str, _value: &'a [u8]) -> BoxFuture<'a, Ack> {
//!         Box::pin(async move { Err(StoreError::conflict(key)) })
//!     }
//!
//!     fn replace<'a>(&'a self, key: &'a str, _value: &'a [u8]) -> BoxFuture<'a, Ack> {
//!         Box::pin(async move { Err(StoreError::not_found(key)) })
//!     }
//! }
//! ```

use crate::config::StoreEndpoint;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Type alias for boxed async store futures.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Which side of the replication a store plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreRole {
    Source,
    Destination,
}

impl StoreRole {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreRole::Source => "source",
            StoreRole::Destination => "destination",
        }
    }
}

impl std::fmt::Display for StoreRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store operation, used for error context, timeouts and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Connect,
    Query,
    Get,
    Insert,
    Replace,
}

impl StoreOp {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreOp::Connect => "connect",
            StoreOp::Query => "query",
            StoreOp::Get => "get",
            StoreOp::Insert => "insert",
            StoreOp::Replace => "replace",
        }
    }
}

impl std::fmt::Display for StoreOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document read from a store.
///
/// The value is an opaque payload (JSON or binary); nothing here parses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub key: String,
    pub value: Vec<u8>,
    /// Store-managed revision token, when the backend exposes one.
    pub revision: Option<u64>,
}

impl Document {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            revision: None,
        }
    }
}

/// Acknowledgement of a successful conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ack {
    /// Revision after the write, when the backend exposes one.
    pub revision: Option<u64>,
}

/// One page of an index query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryPage {
    /// Number of index rows to skip.
    pub offset: usize,
    /// Maximum rows to return.
    pub limit: usize,
    /// Block until the index reflects every write preceding the query.
    pub require_fresh: bool,
}

/// Tagged store failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Key absent (get/replace).
    #[error("key {key} not found")]
    NotFound { key: String },

    /// Key already present (insert).
    #[error("key {key} already exists")]
    Conflict { key: String },

    /// The index/query pair does not exist on the store.
    #[error("index {index}/{query} does not exist")]
    IndexMissing { index: String, query: String },

    /// The operation did not complete within its deadline.
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout { operation: StoreOp, after: Duration },

    /// Network, protocol or server-side error.
    #[error("{operation} failed: {message}")]
    Transport { operation: StoreOp, message: String },

    /// The store could not be reached or authenticated.
    #[error("cannot connect to {host}: {message}")]
    Connect { host: String, message: String },

    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn conflict(key: impl Into<String>) -> Self {
        Self::Conflict { key: key.into() }
    }

    pub fn transport(operation: StoreOp, message: impl Into<String>) -> Self {
        Self::Transport {
            operation,
            message: message.into(),
        }
    }

    /// Map a redis error into a transport error for `operation`.
    pub fn redis(operation: StoreOp, source: &redis::RedisError) -> Self {
        Self::transport(operation, source.to_string())
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::IndexMissing { .. } => "index_missing",
            Self::Timeout { .. } => "timeout",
            Self::Transport { .. } => "transport",
            Self::Connect { .. } => "connect",
            Self::Internal(_) => "internal",
        }
    }

    /// Conflict and NotFound are answers from the store, not failures to
    /// reach it.
    pub fn is_conditional(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Conflict { .. })
    }
}

/// What the replicator needs from a key-value store bucket.
///
/// Implementations must be cheap to share behind an `Arc`; the replicator
/// calls them concurrently when the worker pool is enabled.
pub trait DocumentStore: Send + Sync + 'static {
    /// Bucket this handle is bound to (for logging).
    fn bucket(&self) -> &str;

    /// Read one page of keys from an index.
    ///
    /// Returns `IndexMissing` when the index/query pair does not exist.
    fn query_keys<'a>(
        &'a self,
        index: &'a str,
        query: &'a str,
        page: QueryPage,
    ) -> BoxFuture<'a, Vec<String>>;

    /// Fetch a document. Absent keys return `NotFound`.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Document>;

    /// Write only if the key is absent. Present keys return `Conflict`.
    fn insert<'a>(&'a self, key: &'a str, value: &'a [u8]) -> BoxFuture<'a, Ack>;

    /// Overwrite only if the key is present. Absent keys return `NotFound`.
    fn replace<'a>(&'a self, key: &'a str, value: &'a [u8]) -> BoxFuture<'a, Ack>;
}

/// Opens store handles for the coordinator.
///
/// Split from [`DocumentStore`] so the coordinator can be driven against
/// in-process stores in tests and against Redis in production.
pub trait StoreConnector: Send + Sync {
    type Store: DocumentStore;

    fn connect<'a>(
        &'a self,
        role: StoreRole,
        endpoint: &'a StoreEndpoint,
    ) -> BoxFuture<'a, Self::Store>;
}
