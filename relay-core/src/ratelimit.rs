use async_trait::async_trait;

use relay_shared::clients::RedisClient;
use relay_shared::RelayResult;

/// Sliding-window keyed counter. `hit` counts one event into the window
/// ending `now_ms` and returns whether the resulting count exceeds `rate`.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn hit(&self, key: &str, now_ms: i64, period_ms: i64, rate: u64) -> RelayResult<bool>;
}

/// Redis-backed sliding window, built on
/// [`RedisClient::sliding_window_hit`].
pub struct RedisRateLimiter {
    redis: RedisClient,
}

impl RedisRateLimiter {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn hit(&self, key: &str, now_ms: i64, period_ms: i64, rate: u64) -> RelayResult<bool> {
        let count = self.redis.sliding_window_hit(key, now_ms, period_ms).await?;
        Ok(count > rate)
    }
}

/// In-process sliding window used by pipeline unit tests so they don't need
/// a live Redis instance. Not wired into `relay-server`.
#[derive(Default)]
pub struct InMemoryRateLimiter {
    hits: tokio::sync::Mutex<std::collections::HashMap<String, Vec<i64>>>,
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn hit(&self, key: &str, now_ms: i64, period_ms: i64, rate: u64) -> RelayResult<bool> {
        let mut hits = self.hits.lock().await;
        let entry = hits.entry(key.to_string()).or_default();
        entry.retain(|&ts| ts > now_ms - period_ms);
        entry.push(now_ms);
        Ok(entry.len() as u64 > rate)
    }
}
