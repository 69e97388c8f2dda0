// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Bucket Sync
//!
//! One-way replication of documents from a source key-value bucket to a
//! destination bucket, driven by an index on the source.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                              SyncCoordinator                              │
//! │  RunGuard (lock file) ─► Telemetry (rotating log) ─► connect src + dst    │
//! │                                                                           │
//! │  ┌─────────────┐    ┌───────────────────────────┐    ┌─────────────────┐  │
//! │  │ KeyStream   │───►│ Replicator (per key)      │───►│ RunLog          │  │
//! │  │ (index      │    │ get → insert → replace    │    │ (log line,      │  │
//! │  │  pages)     │    │ one Outcome per key       │    │  counters)      │  │
//! │  └─────────────┘    └───────────────────────────┘    └─────────────────┘  │
//! │        │                       │          │                               │
//! │        ▼                       ▼          ▼                               │
//! │   source store            source     destination   (DocumentStore trait)  │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Isolation
//!
//! Only run-level problems abort a pass: the run lock being held, bad
//! configuration, log setup, an unreachable store or a failing index query.
//! A failure on one key becomes that key's [`Outcome`] and the pass carries
//! on with the next key.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bucket_sync::{RedisConnector, SyncConfig, SyncCoordinator};
//!
//! #[tokio::main]
//! async fn main() -> bucket_sync::Result<()> {
//!     let config = SyncConfig::load()?;
//!     let connector = RedisConnector::new(config.settings.connect_retry());
//!
//!     let summary = SyncCoordinator::new(config, connector).run().await?;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod enumerator;
pub mod error;
pub mod lock;
pub mod memory_store;
pub mod metrics;
pub mod outcome;
pub mod redis_store;
pub mod replicator;
pub mod resilience;
pub mod store;
pub mod telemetry;

// Re-exports for convenience
pub use config::{SourceConfig, StoreEndpoint, SyncConfig, SyncSettings};
pub use coordinator::{RunState, SyncCoordinator};
pub use enumerator::{IndexQuery, KeyStream};
pub use error::{Result, SyncError};
pub use lock::RunGuard;
pub use memory_store::{MemoryConnector, MemoryStore};
pub use outcome::{Outcome, OutcomeKind, OutcomeRecorder, OutcomeSink, RunSummary};
pub use redis_store::{RedisConnector, RedisStore};
pub use replicator::Replicator;
pub use store::{Document, DocumentStore, StoreConnector, StoreError, StoreRole};
pub use telemetry::{LogLevel, LoggingConfig, Telemetry};
