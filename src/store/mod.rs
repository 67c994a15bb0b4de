pub mod cache;
pub mod sqlite;

use crate::config::CacheBackend;
use crate::error::DnsResult;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Key-value store where each question maps to a hash of field -> serialized record.
/// A zero TTL means the field never expires.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    fn name(&self) -> &str;
    async fn hash_set(&self, key: &str, field: &str, value: &str, ttl: Duration) -> DnsResult<()>;
    async fn hash_get_all(&self, key: &str) -> DnsResult<HashMap<String, String>>;
    async fn hash_delete_all(&self, key: &str) -> DnsResult<()>;
    async fn flush_all(&self) -> DnsResult<()>;
}

/// A row of the authoritative record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub name: String,
    pub rr_type: u16,
    pub class: u16,
    pub record: String,
}

/// Durable authoritative records, unique on (name, type, class).
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Fails with `Conflict` when the triple is already present.
    async fn create(&self, record: &StoredRecord) -> DnsResult<()>;
    async fn get(&self, name: &str, rr_type: u16, class: u16) -> DnsResult<StoredRecord>;
    async fn list(&self) -> DnsResult<Vec<StoredRecord>>;
    /// Fails with `NotFound` when no row matches the triple.
    async fn update(&self, record: &StoredRecord) -> DnsResult<()>;
    async fn delete(&self, name: &str, rr_type: u16, class: u16) -> DnsResult<()>;
}

pub async fn open_cache(backend: &CacheBackend) -> Result<Arc<dyn CacheStore>> {
    let store: Arc<dyn CacheStore> = match backend {
        CacheBackend::Memory => Arc::new(cache::MemoryCache::new()),
        CacheBackend::Redis(url) => Arc::new(cache::RedisCache::connect(url).await?),
    };
    tracing::info!("[cache] Using {} cache store", store.name());
    Ok(store)
}

pub fn open_records(path: &str) -> Result<Arc<dyn RecordStore>> {
    let store = if path == ":memory:" {
        sqlite::SqliteRecordStore::in_memory()?
    } else {
        sqlite::SqliteRecordStore::open(path)?
    };
    tracing::info!("[store] Authoritative records stored in {}", path);
    Ok(Arc::new(store))
}
