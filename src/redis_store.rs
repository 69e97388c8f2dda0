// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis-backed document store.
//!
//! A bucket is a key prefix on one Redis server:
//!
//! | Concept | Redis layout |
//! |---------|--------------|
//! | document `k` in bucket `b` | string `b::k` |
//! | index `v`, query `q` defined | member `v::q` of set `b::_indexes` |
//! | rows of index `v`, query `q` | sorted set `b::_index::v::q`, members are document keys |
//! | insert | `SET b::k value NX` (nil reply → `Conflict`) |
//! | replace | `SET b::k value XX` (nil reply → `NotFound`) |
//!
//! Index pages are read with `ZRANGE` by rank, so index order is score
//! order. Redis drops a sorted set once its last member is removed, so
//! whether an index exists is answered by the `_indexes` registry and an
//! absent row set is simply an empty index. Whatever maintains the index writes the sorted set in the same
//! transaction as the documents, so the index is always caught up and a
//! freshness request needs no extra work.
//!
//! # Connection
//!
//! Uses `redis::aio::ConnectionManager` (multiplexed, reconnecting). The
//! initial connection is retried with exponential backoff and each attempt
//! is bounded by a timeout, so an unreachable host fails the run instead of
//! hanging it.

use crate::config::StoreEndpoint;
use crate::metrics;
use crate::resilience::RetryConfig;
use crate::store::{
    Ack, BoxFuture, Document, DocumentStore, QueryPage, StoreConnector, StoreError, StoreOp,
    StoreResult, StoreRole,
};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use std::time::Instant;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Default Redis port when the host has none.
pub const DEFAULT_PORT: u16 = 6379;

/// Redis key holding document `key` of `bucket`.
pub fn document_key(bucket: &str, key: &str) -> String {
    format!("{bucket}::{key}")
}

/// Redis key of the sorted set backing `index`/`query` in `bucket`.
pub fn index_key(bucket: &str, index: &str, query: &str) -> String {
    format!("{bucket}::_index::{index}::{query}")
}

/// Redis key of the set naming every index/query pair defined in `bucket`.
pub fn index_registry_key(bucket: &str) -> String {
    format!("{bucket}::_indexes")
}

/// Registry member for `index`/`query`.
pub fn index_member(index: &str, query: &str) -> String {
    format!("{index}::{query}")
}

/// One bucket on a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    role: StoreRole,
    bucket: String,
    host: String,
    conn: ConnectionManager,
}

impl RedisStore {
    pub fn role(&self) -> StoreRole {
        self.role
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn observe<T>(&self, op: StoreOp, started: Instant, result: &StoreResult<T>) {
        let success = match result {
            Ok(_) => true,
            Err(e) => e.is_conditional(),
        };
        metrics::record_store_operation(self.role, op, started.elapsed(), success);
    }

    async fn set_conditional(&self, op: StoreOp, key: &str, value: &[u8]) -> StoreResult<Ack> {
        let flag = match op {
            StoreOp::Insert => "NX",
            _ => "XX",
        };
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(document_key(&self.bucket, key))
            .arg(value)
            .arg(flag)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::redis(op, &e))?;

        match (reply, op) {
            (Some(_), _) => Ok(Ack::default()),
            (None, StoreOp::Insert) => Err(StoreError::conflict(key)),
            (None, _) => Err(StoreError::not_found(key)),
        }
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("role", &self.role)
            .field("bucket", &self.bucket)
            .field("host", &self.host)
            .finish()
    }
}

impl DocumentStore for RedisStore {
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
            let started = Instant::now();
            let result = async {
                let key = index_key(&self.bucket, index, query);
                let mut conn = self.conn.clone();

                if page.offset == 0 {
                    let defined: bool = conn
                        .sismember(index_registry_key(&self.bucket), index_member(index, query))
                        .await
                        .map_err(|e| StoreError::redis(StoreOp::Query, &e))?;
                    if !defined {
                        return Err(StoreError::IndexMissing {
                            index: index.to_string(),
                            query: query.to_string(),
                        });
                    }
                }
                if page.limit == 0 {
                    return Ok(Vec::new());
                }

                let start = page.offset as isize;
                let stop = (page.offset + page.limit - 1) as isize;
                let keys: Vec<String> = conn
                    .zrange(&key, start, stop)
                    .await
                    .map_err(|e| StoreError::redis(StoreOp::Query, &e))?;
                Ok(keys)
            }
            .await;

            self.observe(StoreOp::Query, started, &result);
            result
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Document> {
        Box::pin(async move {
            let started = Instant::now();
            let mut conn = self.conn.clone();
            let result = conn
                .get::<_, Option<Vec<u8>>>(document_key(&self.bucket, key))
                .await
                .map_err(|e| StoreError::redis(StoreOp::Get, &e))
                .and_then(|value| {
                    value
                        .map(|value| Document::new(key, value))
                        .ok_or_else(|| StoreError::not_found(key))
                });

            self.observe(StoreOp::Get, started, &result);
            result
        })
    }

    fn insert<'a>(&'a self, key: &'a str, value: &'a [u8]) -> BoxFuture<'a, Ack> {
        Box::pin(async move {
            let started = Instant::now();
            let result = self.set_conditional(StoreOp::Insert, key, value).await;
            self.observe(StoreOp::Insert, started, &result);
            result
        })
    }

    fn replace<'a>(&'a self, key: &'a str, value: &'a [u8]) -> BoxFuture<'a, Ack> {
        Box::pin(async move {
            let started = Instant::now();
            let result = self.set_conditional(StoreOp::Replace, key, value).await;
            self.observe(StoreOp::Replace, started, &result);
            result
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Connector
// ═══════════════════════════════════════════════════════════════════════════════

/// Opens [`RedisStore`]s with retry.
#[derive(Debug, Clone, Default)]
pub struct RedisConnector {
    retry: RetryConfig,
}

impl RedisConnector {
    pub fn new(retry: RetryConfig) -> Self {
        Self { retry }
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }
}

/// Build connection info for an endpoint.
///
/// `host` may carry a port (`host:6380`, `[::1]:6380`). A bare IPv6 address
/// (`::1`) uses [`DEFAULT_PORT`]. The admin identity is only sent alongside
/// a password; without a password the connection is anonymous.
pub fn connection_info(endpoint: &StoreEndpoint) -> StoreResult<ConnectionInfo> {
    let (host, port) = split_host_port(&endpoint.host)?;

    let username = match (&endpoint.password, endpoint.admin.is_empty()) {
        (Some(_), false) => Some(endpoint.admin.clone()),
        _ => None,
    };

    Ok(ConnectionInfo {
        addr: ConnectionAddr::Tcp(host, port),
        redis: RedisConnectionInfo {
            db: 0,
            username,
            password: endpoint.password.clone(),
            ..Default::default()
        },
    })
}

fn split_host_port(raw: &str) -> StoreResult<(String, u16)> {
    let parse_port = |port: &str| {
        port.parse::<u16>().map_err(|_| StoreError::Connect {
            host: raw.to_string(),
            message: format!("invalid port '{port}'"),
        })
    };

    if let Some(bracketed) = raw.strip_prefix('[') {
        let (host, rest) = bracketed.split_once(']').ok_or_else(|| StoreError::Connect {
            host: raw.to_string(),
            message: "unterminated '[' in host".to_string(),
        })?;
        let port = match rest.strip_prefix(':') {
            Some(port) => parse_port(port)?,
            None if rest.is_empty() => DEFAULT_PORT,
            None => {
                return Err(StoreError::Connect {
                    host: raw.to_string(),
                    message: format!("unexpected '{rest}' after address"),
                })
            }
        };
        return Ok((host.to_string(), port));
    }

    match raw.split_once(':') {
        // More than one colon without brackets: an IPv6 address, no port.
        Some((_, rest)) if rest.contains(':') => Ok((raw.to_string(), DEFAULT_PORT)),
        Some((host, port)) => Ok((host.to_string(), parse_port(port)?)),
        None => Ok((raw.to_string(), DEFAULT_PORT)),
    }
}

async fn open_verified(client: &Client) -> redis::RedisResult<ConnectionManager> {
    let mut conn = client.get_connection_manager().await?;
    redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
    Ok(conn)
}

impl StoreConnector for RedisConnector {
    type Store = RedisStore;

    fn connect<'a>(
        &'a self,
        role: StoreRole,
        endpoint: &'a StoreEndpoint,
    ) -> BoxFuture<'a, Self::Store> {
        Box::pin(async move {
            info!(%role, host = %endpoint.host, bucket = %endpoint.bucket, "Connecting to store");

            let client = Client::open(connection_info(endpoint)?).map_err(|e| StoreError::Connect {
                host: endpoint.host.clone(),
                message: format!("invalid connection settings: {e}"),
            })?;

            let max_attempts = self.retry.max_attempts.max(1);
            let mut attempt = 0;
            let mut delay = self.retry.initial_delay;

            loop {
                attempt += 1;

                let last_error = match timeout(self.retry.connection_timeout, open_verified(&client)).await {
                    Ok(Ok(conn)) => {
                        metrics::record_store_connection(role, true);
                        if attempt > 1 {
                            info!(%role, host = %endpoint.host, attempt, "Connected to store after retry");
                        } else {
                            info!(%role, host = %endpoint.host, "Connected to store");
                        }
                        return Ok(RedisStore {
                            role,
                            bucket: endpoint.bucket.clone(),
                            host: endpoint.host.clone(),
                            conn,
                        });
                    }
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => StoreError::Timeout {
                        operation: StoreOp::Connect,
                        after: self.retry.connection_timeout,
                    }
                    .to_string(),
                };

                metrics::record_store_connection(role, false);

                if attempt >= max_attempts {
                    error!(
                        %role,
                        host = %endpoint.host,
                        attempt,
                        error = %last_error,
                        "Failed to connect after max retries"
                    );
                    return Err(StoreError::Connect {
                        host: endpoint.host.clone(),
                        message: format!("failed after {attempt} attempts: {last_error}"),
                    });
                }

                warn!(
                    %role,
                    host = %endpoint.host,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "Connection attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = self.retry.delay_for_attempt(attempt + 1);
            }
        })
    }
}
