//! Redis-backed shared tier
//!
//! Wraps a multiplexed [`ConnectionManager`], which reconnects on its own
//! after transient failures. Every call clones the manager handle, so the
//! store is cheap to share across tasks.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use super::shared::SharedStore;
use crate::error::{CacheError, Result};

/// Shared tier backed by a Redis server
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to the server at `url` and verify it answers `PING`
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::Config(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client).await?;

        let store = Self { conn };
        store.ping().await?;
        info!("Connected to Redis shared tier");
        Ok(store)
    }

    fn ttl_millis(ttl: Duration) -> Option<u64> {
        (!ttl.is_zero()).then(|| ttl.as_millis().max(1) as u64)
    }

    fn set_cmd(key: &str, value: &[u8], ttl: Duration) -> redis::Cmd {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ms) = Self::ttl_millis(ttl) {
            cmd.arg("PX").arg(ms);
        }
        cmd
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value.map(Bytes::from))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let values: Vec<Option<Vec<u8>>> =
            redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values.into_iter().map(|v| v.map(Bytes::from)).collect())
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = Self::set_cmd(key, &value, ttl)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_many(&self, entries: &[(String, Bytes, Duration)]) -> Result<Vec<bool>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for (key, value, ttl) in entries {
            pipe.add_command(Self::set_cmd(key, value, *ttl)).ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        debug!(count = entries.len(), "Pipelined shared tier writes");
        Ok(vec![true; entries.len()])
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<Vec<bool>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        // One DEL per key inside a single pipeline so the caller gets exact
        // per-key results.
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("DEL").arg(key);
        }

        let mut conn = self.conn.clone();
        let removed: Vec<u64> = pipe.query_async(&mut conn).await?;
        Ok(removed.into_iter().map(|n| n > 0).collect())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(count > 0)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn.clone();
        // -2: missing, -1: no expiry
        let millis: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok((millis >= 0).then(|| Duration::from_millis(millis as u64)))
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        let mut conn = self.conn.clone();
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok((next, keys))
    }

    async fn flush(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            return Err(CacheError::backend("ping", format!("unexpected reply {pong}")));
        }
        Ok(())
    }

    async fn key_count(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let size: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_millis() {
        assert_eq!(RedisStore::ttl_millis(Duration::ZERO), None);
        assert_eq!(RedisStore::ttl_millis(Duration::from_secs(2)), Some(2000));
        assert_eq!(RedisStore::ttl_millis(Duration::from_micros(10)), Some(1));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let err = RedisStore::connect("not a url").await.err();
        assert!(matches!(err, Some(CacheError::Config(_))));
    }
}
