use std::time::Duration;

use ::redis::{AsyncCommands, Client, aio::ConnectionManager};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::{CacheBackend, CacheError, CacheResult};

/// Redis-backed cache over a reconnecting [`ConnectionManager`].
pub struct RedisCache {
    connection: RwLock<Option<ConnectionManager>>,
    scan_count: usize,
}

impl RedisCache {
    /// Open the connection and check it with a `PING`.
    #[instrument(skip(url))]
    pub async fn connect(url: &str, scan_count: usize) -> CacheResult<Self> {
        let client = Client::open(url)?;
        let mut connection = ConnectionManager::new(client).await?;
        ::redis::cmd("PING").query_async::<()>(&mut connection).await?;
        debug!("Connected to redis");

        Ok(Self {
            connection: RwLock::new(Some(connection)),
            scan_count: scan_count.max(1),
        })
    }

    /// A handle to the shared connection; clones share the same multiplexed socket.
    async fn connection(&self) -> CacheResult<ConnectionManager> {
        self.connection.read().await.clone().ok_or(CacheError::Closed)
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection().await?;
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, seconds).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    /// Walk the keyspace with `SCAN ... MATCH ... COUNT` and delete each batch as it arrives.
    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let mut conn = self.connection().await?;
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(self.scan_count)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let removed: u64 = conn.del(&keys).await?;
                deleted += removed;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(deleted)
    }

    async fn close(&self) {
        // Dropping the last manager closes the socket.
        self.connection.write().await.take();
    }
}
