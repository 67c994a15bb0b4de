use crate::error::DnsResult;
use crate::store::CacheStore;
use moka::sync::Cache;
use redis::aio::ConnectionManager;
use redis::Client;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct CachedField {
    pub value: String,
    pub expires_at: Option<Instant>,
}

impl CachedField {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process cache store. Fields expire individually; nothing is evicted by size.
pub struct MemoryCache {
    entries: Cache<String, HashMap<String, CachedField>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self { entries: Cache::builder().build() }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryCache {
    fn name(&self) -> &str { "memory" }

    async fn hash_set(&self, key: &str, field: &str, value: &str, ttl: Duration) -> DnsResult<()> {
        let now = Instant::now();
        let item = CachedField {
            value: value.to_string(),
            expires_at: if ttl.is_zero() { None } else { Some(now + ttl) },
        };
        self.entries
            .entry(key.to_string())
            .and_upsert_with(|existing| {
                let mut fields = existing.map(|e| e.into_value()).unwrap_or_default();
                fields.retain(|_, f| f.is_live(now));
                fields.insert(field.to_string(), item);
                fields
            });
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> DnsResult<HashMap<String, String>> {
        let now = Instant::now();
        let Some(fields) = self.entries.get(key) else {
            return Ok(HashMap::new());
        };
        let live: HashMap<String, String> = fields
            .into_iter()
            .filter(|(_, f)| f.is_live(now))
            .map(|(k, f)| (k, f.value))
            .collect();
        if live.is_empty() {
            self.entries.invalidate(key);
        }
        Ok(live)
    }

    async fn hash_delete_all(&self, key: &str) -> DnsResult<()> {
        self.entries.invalidate(key);
        Ok(())
    }

    async fn flush_all(&self) -> DnsResult<()> {
        self.entries.invalidate_all();
        Ok(())
    }
}

/// Redis (or DragonflyDB) backed cache store. TTLs apply to the whole hash
/// through EXPIRE, so the most recent non-zero TTL written to a key wins.
pub struct RedisCache {
    connection: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }
}

#[async_trait::async_trait]
impl CacheStore for RedisCache {
    fn name(&self) -> &str { "redis" }

    async fn hash_set(&self, key: &str, field: &str, value: &str, ttl: Duration) -> DnsResult<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("HSET").arg(key).arg(field).arg(value).query_async(&mut conn).await?;
        if ttl.is_zero() {
            return Ok(());
        }
        let _: () = redis::cmd("EXPIRE").arg(key).arg(ttl.as_secs()).query_async(&mut conn).await?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> DnsResult<HashMap<String, String>> {
        let mut conn = self.connection.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;
        Ok(fields)
    }

    async fn hash_delete_all(&self, key: &str) -> DnsResult<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn flush_all(&self) -> DnsResult<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("FLUSHALL").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_hash_roundtrip() {
        let cache = MemoryCache::new();
        cache.hash_set("k", "Answer-0", "a", Duration::ZERO).await.unwrap();
        cache.hash_set("k", "Ns-0", "b", Duration::ZERO).await.unwrap();

        let all = cache.hash_get_all("k").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["Answer-0"], "a");

        cache.hash_delete_all("k").await.unwrap();
        assert!(cache.hash_get_all("k").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_fields_expire_independently() {
        let cache = MemoryCache::new();
        cache.hash_set("k", "Answer-0", "short", Duration::from_millis(20)).await.unwrap();
        cache.hash_set("k", "Answer-1", "forever", Duration::ZERO).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let all = cache.hash_get_all("k").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["Answer-1"], "forever");
    }

    #[tokio::test]
    async fn test_memory_flush_all() {
        let cache = MemoryCache::new();
        cache.hash_set("a", "Answer-0", "1", Duration::ZERO).await.unwrap();
        cache.hash_set("b", "Answer-0", "2", Duration::ZERO).await.unwrap();
        cache.flush_all().await.unwrap();
        assert!(cache.hash_get_all("a").await.unwrap().is_empty());
        assert!(cache.hash_get_all("b").await.unwrap().is_empty());
    }
}
