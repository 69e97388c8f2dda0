// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One replication pass: pull keys from the stream, replicate each, record
//! the outcome.
//!
//! With `concurrency == 1` keys are handled strictly in index order, one at
//! a time. Above that, keys fan out to a bounded set of workers:
//!
//! ```text
//! KeyStream ──► Bulkhead(permits = concurrency) ──► JoinSet workers ──► RunLog
//! ```
//!
//! Every worker is joined before `drive` returns, including when the stream
//! fails part way, so the summary always covers every key that was handed
//! out. A panicking worker still yields one `WriteFailed` outcome.

use crate::enumerator::KeyStream;
use crate::outcome::{Outcome, RunLog};
use crate::replicator::Replicator;
use crate::resilience::Bulkhead;
use crate::store::{DocumentStore, StoreError, StoreResult};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tracing::instrument::WithSubscriber;
use tracing::{debug, error};

/// Run the pass to completion.
///
/// Returns the stream's error if enumeration failed; outcomes recorded
/// before the failure stay in `log`.
pub(crate) async fn drive<S, D>(
    stream: &mut KeyStream<S>,
    replicator: &Replicator<S, D>,
    log: &Arc<RunLog>,
    concurrency: usize,
) -> StoreResult<()>
where
    S: DocumentStore,
    D: DocumentStore,
{
    if concurrency <= 1 {
        drive_sequential(stream, replicator, log).await
    } else {
        drive_pool(stream, replicator, log, concurrency).await
    }
}

async fn drive_sequential<S, D>(
    stream: &mut KeyStream<S>,
    replicator: &Replicator<S, D>,
    log: &RunLog,
) -> StoreResult<()>
where
    S: DocumentStore,
    D: DocumentStore,
{
    while let Some(key) = stream.next_key().await? {
        log.key_enumerated();
        let outcome = replicate_caught(replicator, key).await;
        log.record(&outcome);
    }
    Ok(())
}

async fn drive_pool<S, D>(
    stream: &mut KeyStream<S>,
    replicator: &Replicator<S, D>,
    log: &Arc<RunLog>,
    concurrency: usize,
) -> StoreResult<()>
where
    S: DocumentStore,
    D: DocumentStore,
{
    let bulkhead = Bulkhead::new(concurrency);
    let mut workers = JoinSet::new();

    debug!(concurrency, "Starting worker pool");

    let enumeration = loop {
        let key = match stream.next_key().await {
            Ok(Some(key)) => key,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };
        log.key_enumerated();

        let permit = match bulkhead.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                // The semaphore is never closed; record the key rather than lose it.
                log.record(&Outcome::WriteFailed {
                    key,
                    error: StoreError::Internal(e.to_string()),
                });
                continue;
            }
        };

        let replicator = replicator.clone();
        let log = Arc::clone(log);
        workers.spawn(
            async move {
                let outcome = replicate_caught(&replicator, key).await;
                log.record(&outcome);
                drop(permit);
            }
            .with_current_subscriber(),
        );

        while let Some(joined) = workers.try_join_next() {
            report_join(joined);
        }
    };

    while let Some(joined) = workers.join_next().await {
        report_join(joined);
    }

    enumeration
}

/// Replicate one key, turning a panic into a `WriteFailed` outcome.
async fn replicate_caught<S, D>(replicator: &Replicator<S, D>, key: String) -> Outcome
where
    S: DocumentStore,
    D: DocumentStore,
{
    match AssertUnwindSafe(replicator.replicate(&key)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Outcome::WriteFailed {
            error: StoreError::Internal(format!(
                "replication of {key} panicked: {}",
                panic_message(panic.as_ref())
            )),
            key,
        },
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

fn report_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Replication worker did not finish");
    }
}
