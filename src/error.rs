// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for a replication run.
//!
//! Two layers of errors exist:
//!
//! - [`SyncError`]: fatal for the whole run. The coordinator aborts, logs
//!   what it can, and the binary exits with status 1.
//! - [`StoreError`](crate::store::StoreError): per-operation store failures.
//!   Inside the replicator these are recoverable: they end up in a
//!   per-key [`Outcome`](crate::outcome::Outcome) and the run continues.
//!
//! # Error Categories
//!
//! | Error Type | Raised before stores are touched | Description |
//! |------------|----------------------------------|-------------|
//! | `AlreadyRunning` | Yes | Another process holds the run lock |
//! | `Lock` | Yes | Lock file could not be opened or locked |
//! | `Config` | Yes | Configuration invalid |
//! | `Logging` | Yes | Log directory/file could not be set up |
//! | `Connect` | No | Source or destination unreachable |
//! | `Query` | No | Index query failed (missing index, transport) |
//! | `InvalidState` | Yes | A pass is already in flight on this coordinator |

use crate::store::{StoreError, StoreRole};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for run-level operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Fatal errors that abort a replication run.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The run-exclusivity lock is held by another process.
    ///
    /// Raised before logging is set up and before either store is contacted.
    #[error("Multiple instances are not supported: lock {} is held by another process", .path.display())]
    AlreadyRunning { path: PathBuf },

    /// The lock file could not be opened or locked.
    #[error("Lock file error ({}): {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The log directory or log file could not be prepared.
    #[error("Logging setup error: {0}")]
    Logging(String),

    /// Connecting to the source or destination store failed.
    #[error("Could not connect to the {role} store ({host}): {source}")]
    Connect {
        role: StoreRole,
        host: String,
        #[source]
        source: StoreError,
    },

    /// The index query that enumerates candidate keys failed.
    ///
    /// There is nothing to replicate without it, so the run aborts.
    #[error("Index query {index}/{query} failed: {source}")]
    Query {
        index: String,
        query: String,
        #[source]
        source: StoreError,
    },

    /// A pass was requested while another is in flight.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },
}

impl SyncError {
    /// Create a connect error for the given store role.
    pub fn connect(role: StoreRole, host: impl Into<String>, source: StoreError) -> Self {
        Self::Connect {
            role,
            host: host.into(),
            source,
        }
    }

    /// Create a query error for the given index/query pair.
    pub fn query(index: impl Into<String>, query: impl Into<String>, source: StoreError) -> Self {
        Self::Query {
            index: index.into(),
            query: query.into(),
            source,
        }
    }

    /// Process exit code for this error.
    ///
    /// Every fatal error maps to 1; a completed pass exits 0 no matter how
    /// many keys failed.
    pub fn exit_code(&self) -> u8 {
        1
    }

    /// True when the failure happened before any store was contacted.
    pub fn is_pre_flight(&self) -> bool {
        matches!(
            self,
            Self::AlreadyRunning { .. }
                | Self::Lock { .. }
                | Self::Config(_)
                | Self::Logging(_)
                | Self::InvalidState { .. }
        )
    }
}
