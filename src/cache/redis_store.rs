use async_trait::async_trait;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;

use super::{CacheError, CacheStore};

const PUT_IF_GENERATION: &str = r#"
if tonumber(redis.call('GET', KEYS[2]) or '0') == tonumber(ARGV[1]) then
    redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
    return 1
end
return 0
"#;

const FORGET: &str = r#"
redis.call('INCR', KEYS[2])
return redis.call('DEL', KEYS[1])
"#;

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        Self::Backend(e.to_string())
    }
}

pub struct RedisCacheStore {
    client: Arc<redis::Client>,
    prefix: String,
}

impl RedisCacheStore {
    pub fn new(client: Arc<redis::Client>) -> Self {
        Self {
            client,
            prefix: String::new(),
        }
    }

    pub fn from_url(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        Ok(Self::new(Arc::new(client)))
    }

    /// Namespaces every key, e.g. `helpdesk:` → `helpdesk:tickets:all`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn generation_key(&self, key: &str) -> String {
        format!("{}{}:generation", self.prefix, key)
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: Option<String> = conn.get(self.key(key)).await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        // SETEX rejects a zero expiry
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(self.key(key), value, seconds).await?;
        Ok(())
    }

    async fn generation(&self, key: &str) -> Result<u64, CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let generation: Option<u64> = conn.get(self.generation_key(key)).await?;
        Ok(generation.unwrap_or(0))
    }

    async fn put_if_generation(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
        generation: u64,
    ) -> Result<bool, CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let written: i64 = redis::cmd("EVAL")
            .arg(PUT_IF_GENERATION)
            .arg(2)
            .arg(self.key(key))
            .arg(self.generation_key(key))
            .arg(generation)
            .arg(value)
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(written == 1)
    }

    async fn forget(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let removed: i64 = redis::cmd("EVAL")
            .arg(FORGET)
            .arg(2)
            .arg(self.key(key))
            .arg(self.generation_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }
}
