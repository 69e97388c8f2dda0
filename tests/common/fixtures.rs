// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory run fixtures.

use bucket_sync::{MemoryConnector, MemoryStore, SyncConfig, SyncCoordinator};
use std::path::PathBuf;
use tempfile::TempDir;

pub const INDEX: &str = "dev_sync";
pub const QUERY: &str = "all";

/// Source and destination buckets plus a private log dir and lock file.
pub struct TestRun {
    pub dir: TempDir,
    pub source: MemoryStore,
    pub destination: MemoryStore,
}

impl TestRun {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
            source: MemoryStore::new("frombucket"),
            destination: MemoryStore::new("tobucket"),
        }
    }

    /// Put `docs` in the source and index them in the given order.
    pub async fn seed_source(&self, docs: &[(&str, &str)]) {
        for (key, value) in docs {
            self.source.put(*key, *value).await;
        }
        self.source
            .define_index(INDEX, QUERY, docs.iter().map(|(key, _)| *key))
            .await;
    }

    pub async fn seed_destination(&self, docs: &[(&str, &str)]) {
        for (key, value) in docs {
            self.destination.put(*key, *value).await;
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.path().join("log").join("bucket_sync.log")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.path().join("run.lock")
    }

    pub fn config(&self) -> SyncConfig {
        SyncConfig::for_testing(&self.dir.path().join("log"), &self.lock_path())
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector::new()
            .with_store(self.source.clone())
            .with_store(self.destination.clone())
    }

    pub fn coordinator(&self) -> SyncCoordinator<MemoryConnector> {
        SyncCoordinator::new(self.config(), self.connector())
    }

    pub fn log_contents(&self) -> String {
        std::fs::read_to_string(self.log_path()).unwrap_or_default()
    }
}

impl Default for TestRun {
    fn default() -> Self {
        Self::new()
    }
}
