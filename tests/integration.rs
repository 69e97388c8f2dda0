// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration Tests for Bucket Sync
//!
//! Tests use testcontainers for portability - no external docker-compose required.
//!
//! # Running Tests
//! ```bash
//! # Run all integration tests (requires Docker)
//! cargo test --test integration -- --ignored
//!
//! # Run specific test
//! cargo test --test integration redis_store -- --ignored
//! ```
//!
//! # Test Organization
//! - `redis_store_*` - Document reads and conditional writes against Redis
//! - `redis_index_*` - Index paging, empty and missing index handling
//! - `connector_*` - Connection setup and retry
//! - `sync_*` - Full passes through `SyncCoordinator`

mod common;

use bucket_sync::resilience::RetryConfig;
use bucket_sync::store::QueryPage;
use bucket_sync::{
    DocumentStore, IndexQuery, KeyStream, OutcomeKind, OutcomeRecorder, RedisConnector,
    StoreConnector, StoreError, StoreRole, SyncConfig, SyncCoordinator, SyncError,
};
use common::TestRedis;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::clients::Cli;

fn connector() -> RedisConnector {
    RedisConnector::new(RetryConfig::testing())
}

fn page(offset: usize, limit: usize) -> QueryPage {
    QueryPage {
        offset,
        limit,
        require_fresh: offset == 0,
    }
}

/// Config pointing both buckets at the container, logging into `dir`.
fn sync_config(redis: &TestRedis<'_>, dir: &std::path::Path) -> SyncConfig {
    let mut config = SyncConfig::for_testing(&dir.join("log"), &dir.join("run.lock"));
    config.source.endpoint = redis.endpoint("frombucket");
    config.destination = redis.endpoint("tobucket");
    config
}

// =============================================================================
// Document reads and conditional writes
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_store_get_existing_and_missing() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    redis.put("frombucket", "user:1", b"{\"name\":\"ada\"}").await.unwrap();

    let store = connector()
        .connect(StoreRole::Source, &redis.endpoint("frombucket"))
        .await
        .unwrap();

    let doc = store.get("user:1").await.unwrap();
    assert_eq!(doc.key, "user:1");
    assert_eq!(doc.value, b"{\"name\":\"ada\"}".to_vec());

    let missing = store.get("user:2").await.unwrap_err();
    assert_eq!(missing, StoreError::not_found("user:2"));
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_store_insert_is_create_only() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    let store = connector()
        .connect(StoreRole::Destination, &redis.endpoint("tobucket"))
        .await
        .unwrap();

    store.insert("k", b"first").await.unwrap();
    let err = store.insert("k", b"second").await.unwrap_err();

    assert_eq!(err, StoreError::conflict("k"));
    assert_eq!(
        redis.value("tobucket", "k").await.unwrap(),
        Some(b"first".to_vec())
    );
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_store_replace_requires_existing() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    let store = connector()
        .connect(StoreRole::Destination, &redis.endpoint("tobucket"))
        .await
        .unwrap();

    let err = store.replace("k", b"v").await.unwrap_err();
    assert_eq!(err, StoreError::not_found("k"));
    assert_eq!(redis.value("tobucket", "k").await.unwrap(), None);

    redis.put("tobucket", "k", b"old").await.unwrap();
    store.replace("k", b"new").await.unwrap();
    assert_eq!(
        redis.value("tobucket", "k").await.unwrap(),
        Some(b"new".to_vec())
    );
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_store_buckets_are_isolated() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    redis.put("frombucket", "shared", b"source").await.unwrap();

    let destination = connector()
        .connect(StoreRole::Destination, &redis.endpoint("tobucket"))
        .await
        .unwrap();

    assert!(destination.get("shared").await.is_err());
    destination.insert("shared", b"dest").await.unwrap();
    assert_eq!(
        redis.value("frombucket", "shared").await.unwrap(),
        Some(b"source".to_vec())
    );
}

// =============================================================================
// Index queries
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_index_pages_in_order() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    redis
        .define_index("frombucket", "dev_sync", "all", &["c", "a", "e", "b", "d"])
        .await
        .unwrap();

    let store = connector()
        .connect(StoreRole::Source, &redis.endpoint("frombucket"))
        .await
        .unwrap();

    let first = store.query_keys("dev_sync", "all", page(0, 2)).await.unwrap();
    let second = store.query_keys("dev_sync", "all", page(2, 2)).await.unwrap();
    let third = store.query_keys("dev_sync", "all", page(4, 2)).await.unwrap();
    let past_end = store.query_keys("dev_sync", "all", page(6, 2)).await.unwrap();

    assert_eq!(first, vec!["c", "a"]);
    assert_eq!(second, vec!["e", "b"]);
    assert_eq!(third, vec!["d"]);
    assert!(past_end.is_empty());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_index_missing_is_reported() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    let store = connector()
        .connect(StoreRole::Source, &redis.endpoint("frombucket"))
        .await
        .unwrap();

    let err = store.query_keys("dev_sync", "nope", page(0, 10)).await.unwrap_err();
    assert_eq!(
        err,
        StoreError::IndexMissing {
            index: "dev_sync".to_string(),
            query: "nope".to_string(),
        }
    );
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_index_defined_but_empty_has_no_rows() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    redis
        .define_index("frombucket", "dev_sync", "all", &[])
        .await
        .unwrap();

    let store = connector()
        .connect(StoreRole::Source, &redis.endpoint("frombucket"))
        .await
        .unwrap();

    let rows = store.query_keys("dev_sync", "all", page(0, 10)).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_index_key_stream_respects_limit() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    let keys: Vec<String> = (0..25).map(|i| format!("doc:{i:03}")).collect();
    let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    redis
        .define_index("frombucket", "dev_sync", "all", &key_refs)
        .await
        .unwrap();

    let store = connector()
        .connect(StoreRole::Source, &redis.endpoint("frombucket"))
        .await
        .unwrap();
    let mut stream = KeyStream::new(
        Arc::new(store),
        IndexQuery::new("dev_sync", "all")
            .with_page_size(4)
            .with_limit(10),
    );

    let collected = stream.collect_remaining().await.unwrap();
    assert_eq!(collected, keys[..10].to_vec());
    assert_eq!(stream.yielded(), 10);
}

// =============================================================================
// Connector
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn connector_reports_role_and_host() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);

    let store = connector()
        .connect(StoreRole::Destination, &redis.endpoint("tobucket"))
        .await
        .unwrap();

    assert_eq!(store.role(), StoreRole::Destination);
    assert_eq!(store.host(), redis.host);
    assert_eq!(store.bucket(), "tobucket");
}

#[tokio::test]
#[ignore] // Requires Docker
async fn connector_writes_visible_to_other_clients() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    let store = connector()
        .connect(StoreRole::Destination, &redis.endpoint("tobucket"))
        .await
        .unwrap();

    store.insert("before", b"1").await.unwrap();

    // A fresh client can still see writes made through the manager.
    assert_eq!(
        redis.value("tobucket", "before").await.unwrap(),
        Some(b"1".to_vec())
    );
    assert!(store.insert("before", b"2").await.is_err());
}

// =============================================================================
// Full passes
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn sync_copies_indexed_documents() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    let dir = tempfile::tempdir().unwrap();

    redis.put("frombucket", "k1", b"v1").await.unwrap();
    redis.put("frombucket", "k2", b"v2").await.unwrap();
    redis.put("frombucket", "unindexed", b"v3").await.unwrap();
    redis.put("tobucket", "k2", b"stale").await.unwrap();
    redis
        .define_index("frombucket", "dev_sync", "all", &["k1", "k2", "ghost"])
        .await
        .unwrap();

    let recorder = Arc::new(OutcomeRecorder::new());
    let coordinator = SyncCoordinator::new(sync_config(&redis, dir.path()), connector());
    let summary = coordinator.run_observed(Some(recorder.clone())).await.unwrap();

    assert_eq!(summary.enumerated, 3);
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.replaced, 1);
    assert_eq!(summary.fetch_failed, 1);
    assert_eq!(recorder.keys_of(OutcomeKind::FetchFailed), vec!["ghost"]);

    assert_eq!(redis.value("tobucket", "k1").await.unwrap(), Some(b"v1".to_vec()));
    assert_eq!(redis.value("tobucket", "k2").await.unwrap(), Some(b"v2".to_vec()));
    assert_eq!(redis.value("tobucket", "unindexed").await.unwrap(), None);
    assert_eq!(redis.value("tobucket", "ghost").await.unwrap(), None);

    let log = std::fs::read_to_string(dir.path().join("log").join("bucket_sync.log")).unwrap();
    assert!(log.contains("Inserted k1 in destination"));
    assert!(log.contains("Replaced k2 in destination"));
    assert!(log.contains("Did not find ghost in source, skipping"));
    assert!(log.contains("All done!"));
}

#[tokio::test]
#[ignore] // Requires Docker
async fn sync_with_worker_pool_copies_everything() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    let dir = tempfile::tempdir().unwrap();

    let keys: Vec<String> = (0..200).map(|i| format!("item:{i}")).collect();
    for key in &keys {
        redis.put("frombucket", key, key.as_bytes()).await.unwrap();
    }
    let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    redis
        .define_index("frombucket", "dev_sync", "all", &key_refs)
        .await
        .unwrap();

    let mut config = sync_config(&redis, dir.path());
    config.settings.concurrency = 16;
    config.settings.page_size = 37;

    let summary = SyncCoordinator::new(config, connector()).run().await.unwrap();
    assert_eq!(summary.inserted, 200);
    assert_eq!(summary.failed(), 0);

    for key in &keys {
        assert_eq!(
            redis.value("tobucket", key).await.unwrap(),
            Some(key.as_bytes().to_vec())
        );
    }
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_empty_index_completes_pass() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    let dir = tempfile::tempdir().unwrap();

    redis.put("frombucket", "unindexed", b"v").await.unwrap();
    redis
        .define_index("frombucket", "dev_sync", "all", &[])
        .await
        .unwrap();

    let summary = SyncCoordinator::new(sync_config(&redis, dir.path()), connector())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.enumerated, 0);
    assert_eq!(summary.total(), 0);
    assert_eq!(redis.value("tobucket", "unindexed").await.unwrap(), None);
    let log = std::fs::read_to_string(dir.path().join("log").join("bucket_sync.log")).unwrap();
    assert!(log.contains("All done!"));
}

#[tokio::test]
#[ignore] // Requires Docker
async fn sync_missing_index_is_fatal() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    let dir = tempfile::tempdir().unwrap();

    let err = SyncCoordinator::new(sync_config(&redis, dir.path()), connector())
        .run()
        .await
        .unwrap_err();

    match err {
        SyncError::Query { index, query, source } => {
            assert_eq!(index, "dev_sync");
            assert_eq!(query, "all");
            assert!(matches!(source, StoreError::IndexMissing { .. }));
        }
        other => panic!("expected query error, got {other:?}"),
    }
}

#[tokio::test]
#[ignore] // Requires Docker
async fn sync_unreachable_destination_is_fatal() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    let dir = tempfile::tempdir().unwrap();

    let mut config = sync_config(&redis, dir.path());
    config.destination.host = "127.0.0.1:1".to_string();
    let retry = RetryConfig::once(Duration::from_millis(500));

    let err = SyncCoordinator::new(config, RedisConnector::new(retry))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SyncError::Connect {
            role: StoreRole::Destination,
            ..
        }
    ));
    let log = std::fs::read_to_string(dir.path().join("log").join("bucket_sync.log")).unwrap();
    assert!(!log.contains("All done!"));
}

#[tokio::test]
#[ignore] // Requires Docker
async fn sync_existing_documents_are_replaced() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    let dir = tempfile::tempdir().unwrap();

    for key in ["a", "b"] {
        redis.put("frombucket", key, b"new").await.unwrap();
        redis.put("tobucket", key, b"old").await.unwrap();
    }
    redis
        .define_index("frombucket", "dev_sync", "all", &["a", "b"])
        .await
        .unwrap();

    let summary = SyncCoordinator::new(sync_config(&redis, dir.path()), connector())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.replaced, 2);
    assert_eq!(summary.failed(), 0);
}
