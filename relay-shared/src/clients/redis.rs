use redis::aio::ConnectionManager;
use redis::AsyncCommands;

#[derive(Clone)]
pub struct RedisClient {
    conn: ConnectionManager,
}

impl RedisClient {
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        tracing::info!(url = %url, "connected to Redis");
        Ok(Self { conn })
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.get(key).await
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.set_ex(key, value, ttl_secs).await
    }

    pub async fn del(&self, key: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.del(key).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.exists(key).await
    }

    /// Record one hit in the sliding window for `key` and return the count
    /// of hits still inside `period_ms` (including this one).
    ///
    /// Implemented as a Redis sorted set keyed by `key`, scored by the hit's
    /// millisecond timestamp. Old members are trimmed on every call so the
    /// set never grows past `period_ms` worth of entries, and the key's TTL
    /// is refreshed to just past the window so idle keys are reclaimed.
    pub async fn sliding_window_hit(
        &self,
        key: &str,
        now_ms: i64,
        period_ms: i64,
    ) -> Result<u64, redis::RedisError> {
        let mut conn = self.conn.clone();
        let member = format!("{now_ms}-{}", uuid_like_nonce());
        let floor = now_ms - period_ms;

        let count: u64 = redis::pipe()
            .atomic()
            .zadd(key, &member, now_ms)
            .ignore()
            .zrembyscore(key, "-inf", floor)
            .ignore()
            .zcard(key)
            .query_async(&mut conn)
            .await?;

        let ttl_secs = (period_ms / 1000).max(1) + 1;
        let _: () = conn.expire(key, ttl_secs).await?;

        Ok(count)
    }
}

/// A cheap collision-avoidance suffix for sorted-set members sharing the
/// same millisecond timestamp. Not a real UUID — just enough entropy that
/// two hits landing in the same millisecond don't overwrite one another.
fn uuid_like_nonce() -> u32 {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
