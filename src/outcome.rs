// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-key outcomes and the run log.
//!
//! Every candidate key ends in exactly one [`Outcome`]. The [`RunLog`] is
//! the only shared mutable state of a pass: it writes one log line per
//! outcome, bumps a counter and forwards the outcome to an optional
//! observer.
//!
//! | Outcome | Level | Line |
//! |---------|-------|------|
//! | `Inserted` | INFO | `Inserted {key} in destination` |
//! | `Replaced` | INFO | `Replaced {key} in destination` |
//! | `FetchFailed` | ERROR | `Did not find {key} in source, skipping` |
//! | `WriteFailed` | ERROR | `Failed to write {key} to destination` |

use crate::metrics;
use crate::store::StoreError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};

/// Terminal result of replicating one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Key was absent in the destination and has been created.
    Inserted { key: String },
    /// Key existed in the destination and has been overwritten.
    Replaced { key: String },
    /// Source read failed; the destination was not touched.
    FetchFailed { key: String, error: StoreError },
    /// Both insert and replace failed. Carries the insert error.
    WriteFailed { key: String, error: StoreError },
}

impl Outcome {
    pub fn key(&self) -> &str {
        match self {
            Outcome::Inserted { key }
            | Outcome::Replaced { key }
            | Outcome::FetchFailed { key, .. }
            | Outcome::WriteFailed { key, .. } => key,
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Inserted { .. } => OutcomeKind::Inserted,
            Outcome::Replaced { .. } => OutcomeKind::Replaced,
            Outcome::FetchFailed { .. } => OutcomeKind::FetchFailed,
            Outcome::WriteFailed { .. } => OutcomeKind::WriteFailed,
        }
    }

    pub fn error(&self) -> Option<&StoreError> {
        match self {
            Outcome::FetchFailed { error, .. } | Outcome::WriteFailed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error().is_none()
    }
}

/// Outcome tag without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OutcomeKind {
    Inserted,
    Replaced,
    FetchFailed,
    WriteFailed,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Inserted => "inserted",
            OutcomeKind::Replaced => "replaced",
            OutcomeKind::FetchFailed => "fetch_failed",
            OutcomeKind::WriteFailed => "write_failed",
        }
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives every outcome of a pass, in completion order.
pub trait OutcomeSink: Send + Sync {
    fn record(&self, outcome: &Outcome);
}

/// Sink that keeps every outcome in memory.
#[derive(Debug, Default)]
pub struct OutcomeRecorder {
    outcomes: Mutex<Vec<Outcome>>,
}

impl OutcomeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcomes recorded so far.
    pub fn outcomes(&self) -> Vec<Outcome> {
        match self.outcomes.lock() {
            Ok(outcomes) => outcomes.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn keys_of(&self, kind: OutcomeKind) -> Vec<String> {
        self.outcomes()
            .iter()
            .filter(|o| o.kind() == kind)
            .map(|o| o.key().to_string())
            .collect()
    }
}

impl OutcomeSink for OutcomeRecorder {
    fn record(&self, outcome: &Outcome) {
        let mut outcomes = match self.outcomes.lock() {
            Ok(outcomes) => outcomes,
            Err(poisoned) => poisoned.into_inner(),
        };
        outcomes.push(outcome.clone());
    }
}

/// Counts of a finished pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub enumerated: usize,
    pub inserted: usize,
    pub replaced: usize,
    pub fetch_failed: usize,
    pub write_failed: usize,
    pub duration: Duration,
}

impl RunSummary {
    /// Outcomes recorded (equals `enumerated` for a completed pass).
    pub fn total(&self) -> usize {
        self.inserted + self.replaced + self.fetch_failed + self.write_failed
    }

    pub fn succeeded(&self) -> usize {
        self.inserted + self.replaced
    }

    pub fn failed(&self) -> usize {
        self.fetch_failed + self.write_failed
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} keys: {} inserted, {} replaced, {} fetch failed, {} write failed in {}ms",
            self.enumerated,
            self.inserted,
            self.replaced,
            self.fetch_failed,
            self.write_failed,
            self.duration.as_millis()
        )
    }
}

/// Append-only record of a pass.
#[derive(Default)]
pub struct RunLog {
    enumerated: AtomicUsize,
    inserted: AtomicUsize,
    replaced: AtomicUsize,
    fetch_failed: AtomicUsize,
    write_failed: AtomicUsize,
    observer: Option<Arc<dyn OutcomeSink>>,
}

impl RunLog {
    pub fn new(observer: Option<Arc<dyn OutcomeSink>>) -> Self {
        Self {
            observer,
            ..Self::default()
        }
    }

    /// Count a key handed out by the enumerator.
    pub fn key_enumerated(&self) {
        self.enumerated.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one terminal outcome: one log line, one counter, one metric.
    pub fn record(&self, outcome: &Outcome) {
        match outcome {
            Outcome::Inserted { key } => {
                info!(%key, "Inserted {key} in destination");
                self.inserted.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Replaced { key } => {
                info!(%key, "Replaced {key} in destination");
                self.replaced.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::FetchFailed { key, error } => {
                error!(%key, error = %error, kind = error.kind(), "Did not find {key} in source, skipping");
                self.fetch_failed.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::WriteFailed { key, error } => {
                error!(%key, error = %error, kind = error.kind(), "Failed to write {key} to destination");
                self.write_failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        metrics::record_outcome(outcome.kind());
        if let Some(observer) = &self.observer {
            observer.record(outcome);
        }
    }

    pub fn summary(&self, duration: Duration) -> RunSummary {
        RunSummary {
            enumerated: self.enumerated.load(Ordering::Relaxed),
            inserted: self.inserted.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
            fetch_failed: self.fetch_failed.load(Ordering::Relaxed),
            write_failed: self.write_failed.load(Ordering::Relaxed),
            duration,
        }
    }
}

impl std::fmt::Debug for RunLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLog")
            .field("summary", &self.summary(Duration::ZERO))
            .field("observed", &self.observer.is_some())
            .finish()
    }
}
