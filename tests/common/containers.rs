// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for Redis.
//!
//! Provides helpers to spin up Redis containers and lay out buckets the way
//! `RedisStore` reads them.

use bucket_sync::redis_store::{document_key, index_key, index_member, index_registry_key};
use bucket_sync::StoreEndpoint;
use redis::AsyncCommands;
use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

/// Create a vanilla Redis container.
///
/// Uses official redis:7 image. Waits for "Ready to accept connections".
pub fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

/// `host:port` of a container, as a `StoreEndpoint` host.
pub fn redis_host(container: &Container<'_, GenericImage>) -> String {
    let port = container.get_host_port_ipv4(6379);
    format!("127.0.0.1:{}", port)
}

/// One Redis server holding any number of buckets.
pub struct TestRedis<'a> {
    #[allow(dead_code)] // Kept alive for container lifetime
    container: Container<'a, GenericImage>,
    pub host: String,
}

impl<'a> TestRedis<'a> {
    pub fn new(docker: &'a Cli) -> Self {
        let container = redis_container(docker);
        let host = redis_host(&container);
        Self { container, host }
    }

    pub fn endpoint(&self, bucket: &str) -> StoreEndpoint {
        StoreEndpoint::new(self.host.clone(), bucket)
    }

    async fn conn(&self) -> redis::RedisResult<redis::aio::MultiplexedConnection> {
        let client = redis::Client::open(format!("redis://{}", self.host))?;
        client.get_multiplexed_async_connection().await
    }

    /// Write a document directly.
    pub async fn put(&self, bucket: &str, key: &str, value: &[u8]) -> redis::RedisResult<()> {
        let mut conn = self.conn().await?;
        conn.set(document_key(bucket, key), value).await
    }

    /// Read a document directly.
    pub async fn value(&self, bucket: &str, key: &str) -> redis::RedisResult<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        conn.get(document_key(bucket, key)).await
    }

    /// Define an index: register it and write its rows as a sorted set,
    /// scored by position. An empty `keys` leaves a defined, empty index.
    pub async fn define_index(
        &self,
        bucket: &str,
        index: &str,
        query: &str,
        keys: &[&str],
    ) -> redis::RedisResult<()> {
        let mut conn = self.conn().await?;
        conn.sadd::<_, _, ()>(index_registry_key(bucket), index_member(index, query))
            .await?;
        let set = index_key(bucket, index, query);
        conn.del::<_, ()>(&set).await?;
        for (position, key) in keys.iter().enumerate() {
            conn.zadd::<_, _, _, ()>(&set, *key, position as f64).await?;
        }
        Ok(())
    }
}
