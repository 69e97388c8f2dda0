// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-key replication protocol.
//!
//! ```text
//!            source.get(k)
//!                 │
//!        ┌── err ─┴─ ok ──┐
//!        ▼                ▼
//!   FetchFailed    dest.insert(k, v)
//!                         │
//!                ┌── ok ──┴── err (conflict, timeout, ...) ──┐
//!                ▼                                           ▼
//!            Inserted                               dest.replace(k, v)
//!                                                            │
//!                                                  ┌── ok ───┴── err ──┐
//!                                                  ▼                   ▼
//!                                              Replaced     WriteFailed(insert err)
//! ```
//!
//! Nothing is retried within a pass. Every store call is bounded by the
//! operation timeout; an elapsed deadline becomes
//! [`StoreError::Timeout`] and takes the same branch as any other error.

use crate::outcome::Outcome;
use crate::resilience::RateLimiter;
use crate::store::{DocumentStore, StoreError, StoreOp, StoreResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Copies single keys from a source store to a destination store.
pub struct Replicator<S, D> {
    source: Arc<S>,
    destination: Arc<D>,
    operation_timeout: Duration,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl<S, D> Clone for Replicator<S, D> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            destination: Arc::clone(&self.destination),
            operation_timeout: self.operation_timeout,
            rate_limiter: self.rate_limiter.clone(),
        }
    }
}

impl<S: DocumentStore, D: DocumentStore> Replicator<S, D> {
    pub fn new(source: Arc<S>, destination: Arc<D>, operation_timeout: Duration) -> Self {
        Self {
            source,
            destination,
            operation_timeout,
            rate_limiter: None,
        }
    }

    /// Throttle keys through a shared rate limiter.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    /// Replicate one key. Never fails: every error ends up in the outcome.
    pub async fn replicate(&self, key: &str) -> Outcome {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }

        let document = match self.bounded(StoreOp::Get, self.source.get(key)).await {
            Ok(document) => document,
            Err(error) => {
                return Outcome::FetchFailed {
                    key: key.to_string(),
                    error,
                }
            }
        };
        debug!(%key, bytes = document.value.len(), "Found {key} in source");

        let insert_error = match self
            .bounded(StoreOp::Insert, self.destination.insert(key, &document.value))
            .await
        {
            Ok(_) => {
                return Outcome::Inserted {
                    key: key.to_string(),
                }
            }
            Err(error) => error,
        };

        match self
            .bounded(StoreOp::Replace, self.destination.replace(key, &document.value))
            .await
        {
            Ok(_) => Outcome::Replaced {
                key: key.to_string(),
            },
            Err(replace_error) => {
                debug!(
                    %key,
                    insert_error = %insert_error,
                    replace_error = %replace_error,
                    "Replace after failed insert also failed"
                );
                Outcome::WriteFailed {
                    key: key.to_string(),
                    error: insert_error,
                }
            }
        }
    }

    async fn bounded<T>(
        &self,
        operation: StoreOp,
        call: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.operation_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                operation,
                after: self.operation_timeout,
            }),
        }
    }
}

impl<S, D> std::fmt::Debug for Replicator<S, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replicator")
            .field("operation_timeout", &self.operation_timeout)
            .field("rate_limited", &self.rate_limiter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::resilience::RateLimitConfig;

    fn pair() -> (Arc<MemoryStore>, Arc<MemoryStore>) {
        (
            Arc::new(MemoryStore::new("frombucket")),
            Arc::new(MemoryStore::new("tobucket")),
        )
    }

    fn replicator(
        source: &Arc<MemoryStore>,
        destination: &Arc<MemoryStore>,
    ) -> Replicator<MemoryStore, MemoryStore> {
        Replicator::new(Arc::clone(source), Arc::clone(destination), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_absent_key_is_inserted() {
        let (source, destination) = pair();
        source.put("a", "1").await;

        let outcome = replicator(&source, &destination).replicate("a").await;

        assert_eq!(outcome, Outcome::Inserted { key: "a".to_string() });
        assert_eq!(destination.value("a").await, Some(b"1".to_vec()));
        assert!(destination.calls_for(StoreOp::Replace).await.is_empty());
    }

    #[tokio::test]
    async fn test_present_key_is_replaced() {
        let (source, destination) = pair();
        source.put("a", "new").await;
        destination.put("a", "old").await;

        let outcome = replicator(&source, &destination).replicate("a").await;

        assert_eq!(outcome, Outcome::Replaced { key: "a".to_string() });
        assert_eq!(destination.value("a").await, Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_missing_source_key_skips_destination() {
        let (source, destination) = pair();

        let outcome = replicator(&source, &destination).replicate("ghost").await;

        assert_eq!(
            outcome,
            Outcome::FetchFailed {
                key: "ghost".to_string(),
                error: StoreError::not_found("ghost"),
            }
        );
        assert!(destination.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_write_failed_carries_insert_error() {
        let (source, destination) = pair();
        source.put("a", "1").await;
        let insert_error = StoreError::transport(StoreOp::Insert, "broken pipe");
        destination
            .fail_on(StoreOp::Insert, "a", insert_error.clone())
            .await;
        destination
            .fail_on(
                StoreOp::Replace,
                "a",
                StoreError::transport(StoreOp::Replace, "connection reset"),
            )
            .await;

        let outcome = replicator(&source, &destination).replicate("a").await;

        assert_eq!(
            outcome,
            Outcome::WriteFailed {
                key: "a".to_string(),
                error: insert_error,
            }
        );
    }

    #[tokio::test]
    async fn test_insert_failure_on_absent_key_is_write_failed() {
        // Insert fails for a non-conflict reason, and replace finds nothing to
        // overwrite.
        let (source, destination) = pair();
        source.put("a", "1").await;
        destination
            .fail_on(StoreOp::Insert, "a", StoreError::transport(StoreOp::Insert, "oom"))
            .await;

        let outcome = replicator(&source, &destination).replicate("a").await;

        assert_eq!(outcome.kind(), crate::outcome::OutcomeKind::WriteFailed);
        assert!(destination.value("a").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout() {
        let (source, destination) = pair();
        source.put("slow", "1").await;
        source
            .delay_on(StoreOp::Get, "slow", Duration::from_secs(60))
            .await;

        let outcome = replicator(&source, &destination).replicate("slow").await;

        assert!(matches!(
            outcome,
            Outcome::FetchFailed {
                error: StoreError::Timeout {
                    operation: StoreOp::Get,
                    ..
                },
                ..
            }
        ));
        assert!(destination.calls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_timeout_falls_back_to_replace() {
        let (source, destination) = pair();
        source.put("a", "new").await;
        destination.put("a", "old").await;
        destination
            .delay_on(StoreOp::Insert, "a", Duration::from_secs(60))
            .await;

        let outcome = replicator(&source, &destination).replicate("a").await;

        assert_eq!(outcome, Outcome::Replaced { key: "a".to_string() });
        assert_eq!(destination.value("a").await, Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_rate_limited_replicator_still_replicates() {
        let (source, destination) = pair();
        source.put("a", "1").await;
        source.put("b", "2").await;

        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            burst_size: 1,
            refill_rate: 1000,
        }));
        let replicator = replicator(&source, &destination).with_rate_limiter(limiter);

        assert!(replicator.replicate("a").await.is_success());
        assert!(replicator.replicate("b").await.is_success());
        assert_eq!(destination.len().await, 2);
    }
}
