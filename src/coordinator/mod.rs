// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication run coordinator.
//!
//! The orchestrator that ties together:
//! - Run exclusivity via [`crate::lock::RunGuard`]
//! - Run logging via [`crate::telemetry::Telemetry`]
//! - Store connections via a [`StoreConnector`]
//! - Key enumeration via [`crate::enumerator::KeyStream`]
//! - Per-key replication via [`crate::replicator::Replicator`]
//!
//! # Sequence
//!
//! ```text
//! run()
//!  ├─ RunGuard::acquire        (AlreadyRunning → exit before anything else)
//!  ├─ Telemetry::init          (log dir/file, level, rotation)
//!  └─ under the run's Dispatch:
//!       ├─ "Logger initialized"
//!       ├─ connect source, then destination   (fatal on failure)
//!       ├─ KeyStream over source index         (fatal on failure)
//!       ├─ replicate every key                 (per-key failures recorded)
//!       ├─ summary line
//!       └─ "All done!"
//! ```
//!
//! The guard and the log pipeline are plain values scoped to `run()`, so
//! both are released on every exit path.

mod pass;
mod types;

pub use types::RunState;

use crate::config::{StoreEndpoint, SyncConfig};
use crate::enumerator::{IndexQuery, KeyStream};
use crate::error::{Result, SyncError};
use crate::lock::RunGuard;
use crate::metrics;
use crate::outcome::{OutcomeSink, RunLog, RunSummary};
use crate::replicator::Replicator;
use crate::resilience::RateLimiter;
use crate::store::{StoreConnector, StoreRole};
use crate::telemetry::Telemetry;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::instrument::WithSubscriber;
use tracing::{error, info};

const BANNER: &str = "=============================================";

/// Runs single replication passes from a source bucket to a destination bucket.
///
/// # Example
///
/// ```rust,no_run
/// use bucket_sync::config::SyncConfig;
/// use bucket_sync::coordinator::SyncCoordinator;
/// use bucket_sync::redis_store::RedisConnector;
///
/// # async fn example() -> bucket_sync::Result<()> {
/// let config = SyncConfig::load()?;
/// let connector = RedisConnector::new(config.settings.connect_retry());
/// let coordinator = SyncCoordinator::new(config, connector);
///
/// let summary = coordinator.run().await?;
/// println!("{summary}");
/// # Ok(())
/// # }
/// ```
pub struct SyncCoordinator<C: StoreConnector> {
    config: SyncConfig,
    connector: C,

    /// Run state (broadcast to watchers)
    state_tx: watch::Sender<RunState>,

    /// Run state receiver (for internal use)
    state_rx: watch::Receiver<RunState>,

    /// Set while a pass is in flight.
    in_flight: AtomicBool,
}

/// Clears the in-flight flag however the pass ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<C: StoreConnector> SyncCoordinator<C> {
    pub fn new(config: SyncConfig, connector: C) -> Self {
        let (state_tx, state_rx) = watch::channel(RunState::Created);
        Self {
            config,
            connector,
            state_tx,
            state_rx,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Get current run state.
    pub fn state(&self) -> RunState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<RunState> {
        self.state_rx.clone()
    }

    /// Run one pass.
    ///
    /// Returns the summary of a completed pass, even when individual keys
    /// failed. Errors are fatal for the pass; see [`SyncError`].
    pub async fn run(&self) -> Result<RunSummary> {
        self.run_observed(None).await
    }

    /// Run one pass, forwarding every outcome to `observer`.
    pub async fn run_observed(&self, observer: Option<Arc<dyn OutcomeSink>>) -> Result<RunSummary> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SyncError::InvalidState {
                expected: "Created, Completed or Failed".to_string(),
                actual: self.state().to_string(),
            });
        }
        let _in_flight = InFlight(&self.in_flight);

        let started = Instant::now();
        let result = self.run_guarded(observer, started).await;

        match &result {
            Ok(_) => {
                self.set_state(RunState::Completed);
                metrics::record_run_complete("completed", started.elapsed());
            }
            Err(_) => {
                self.set_state(RunState::Failed);
                metrics::record_run_complete("failed", started.elapsed());
            }
        }
        result
    }

    async fn run_guarded(
        &self,
        observer: Option<Arc<dyn OutcomeSink>>,
        started: Instant,
    ) -> Result<RunSummary> {
        let guard = RunGuard::acquire(&self.config.lock_path())?;
        self.set_state(RunState::Locked);

        let telemetry = Telemetry::init(&self.config.logging)?;
        let dispatch = telemetry.dispatch().clone();

        let result = self
            .execute(observer, started, telemetry.log_path())
            .with_subscriber(dispatch)
            .await;

        // Flush the log before the lock goes.
        drop(telemetry);
        drop(guard);
        result
    }

    async fn execute(
        &self,
        observer: Option<Arc<dyn OutcomeSink>>,
        started: Instant,
        log_path: &Path,
    ) -> Result<RunSummary> {
        info!("{BANNER}");
        info!(
            log = %log_path.display(),
            level = %self.config.logging.level,
            "Logger initialized"
        );

        let result = self.replicate(observer, started).await;

        match &result {
            Ok(summary) => {
                info!(
                    enumerated = summary.enumerated,
                    inserted = summary.inserted,
                    replaced = summary.replaced,
                    fetch_failed = summary.fetch_failed,
                    write_failed = summary.write_failed,
                    duration_ms = summary.duration.as_millis() as u64,
                    "Replication finished: {summary}"
                );
                info!("All done!");
                info!("{BANNER}");
            }
            Err(e) => error!(error = %e, "Replication aborted"),
        }
        result
    }

    async fn replicate(
        &self,
        observer: Option<Arc<dyn OutcomeSink>>,
        started: Instant,
    ) -> Result<RunSummary> {
        self.set_state(RunState::Connecting);
        let source = self
            .connect(StoreRole::Source, &self.config.source.endpoint)
            .await?;
        let destination = self
            .connect(StoreRole::Destination, &self.config.destination)
            .await?;

        self.set_state(RunState::Replicating);
        let settings = &self.config.settings;
        let query = IndexQuery::from_config(&self.config);
        info!(
            index = %query.index,
            query = %query.query,
            limit = query.limit,
            fresh = query.require_fresh,
            concurrency = settings.concurrency,
            "Enumerating source keys"
        );

        let source = Arc::new(source);
        let mut replicator = Replicator::new(
            Arc::clone(&source),
            Arc::new(destination),
            settings.operation_timeout_duration(),
        );
        if let Some(rate) = settings.rate_limit_config() {
            info!(
                per_sec = rate.refill_rate,
                burst = rate.burst_size,
                "Rate limiting enabled"
            );
            replicator = replicator.with_rate_limiter(Arc::new(RateLimiter::new(rate)));
        }

        let mut stream = KeyStream::new(source, query);
        let log = Arc::new(RunLog::new(observer));

        let driven = pass::drive(&mut stream, &replicator, &log, settings.concurrency).await;
        metrics::record_keys_enumerated(stream.yielded());

        if let Err(e) = driven {
            let query = stream.query();
            return Err(SyncError::query(&query.index, &query.query, e));
        }

        Ok(log.summary(started.elapsed()))
    }

    async fn connect(&self, role: StoreRole, endpoint: &StoreEndpoint) -> Result<C::Store> {
        match self.connector.connect(role, endpoint).await {
            Ok(store) => {
                info!(%role, host = %endpoint.host, bucket = %endpoint.bucket, "Connected to {role} bucket");
                Ok(store)
            }
            Err(e) => Err(SyncError::connect(role, &endpoint.host, e)),
        }
    }

    fn set_state(&self, state: RunState) {
        let _ = self.state_tx.send(state);
        metrics::set_run_state(state.as_str(), state.code());
    }
}

impl<C: StoreConnector> std::fmt::Debug for SyncCoordinator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("state", &self.state())
            .field("source", &self.config.source.endpoint)
            .field("destination", &self.config.destination)
            .finish()
    }
}
