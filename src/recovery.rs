//! Startup reconciliation of the cache with the record store.

use crate::error::DnsResult;
use crate::metrics::RECOVERED_RECORDS_TOTAL;
use crate::records::{create_fake_aaaa, is_suppression_active};
use crate::store::{CacheStore, RecordStore};
use crate::types::{Section, TYPE_AAAA};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct Recovery {
    cache: Arc<dyn CacheStore>,
    store: Arc<dyn RecordStore>,
}

impl Recovery {
    pub fn new(cache: Arc<dyn CacheStore>, store: Arc<dyn RecordStore>) -> Self {
        Self { cache, store }
    }

    /// Flushes the cache and rebuilds it from the record store.
    /// Returns the number of records written back.
    pub async fn run(&self) -> DnsResult<usize> {
        self.clear_cache().await?;
        let restored = self.recover().await?;
        info!("[recovery] Restored {} authoritative record(s) into the {} cache", restored, self.cache.name());
        Ok(restored)
    }

    pub async fn clear_cache(&self) -> DnsResult<()> {
        self.cache.flush_all().await
    }

    /// Writes every stored record whose question is not cached yet, then
    /// gives its name a suppression entry. Stops at the first failure.
    pub async fn recover(&self) -> DnsResult<usize> {
        let mut restored = 0;
        for row in self.store.list().await? {
            let rr: crate::rr::ResourceRecord = row.record.parse()?;
            let key = rr.question().cache_key();

            let entry = self.cache.hash_get_all(&key).await?;
            let populated = if rr.header.rr_type == TYPE_AAAA {
                !entry.is_empty() && !is_suppression_active(&*self.cache, &key).await?
            } else {
                !entry.is_empty()
            };
            if populated {
                debug!("[recovery] {} already cached, skipping", key);
                continue;
            }

            if !entry.is_empty() {
                // suppression written for this name by an earlier record
                self.cache.hash_delete_all(&key).await?;
            }
            self.cache
                .hash_set(&key, &Section::Answer.field(0), &row.record, Duration::ZERO)
                .await?;

            if rr.header.rr_type != TYPE_AAAA {
                create_fake_aaaa(&*self.cache, &*self.store, &rr.header).await?;
            }

            restored += 1;
            RECOVERED_RECORDS_TOTAL.inc();
        }
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DnsError;
    use crate::store::cache::MemoryCache;
    use crate::store::sqlite::SqliteRecordStore;
    use crate::store::StoredRecord;
    use crate::types::{Question, CLASS_INET, TYPE_A, TYPE_CNAME};

    const A_TEXT: &str = "test.com.\t1440\tIN\tA\t1.1.1.1";

    async fn seeded(rows: &[(&str, u16, &str)]) -> (Recovery, Arc<MemoryCache>) {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(SqliteRecordStore::in_memory().unwrap());
        for (name, rr_type, record) in rows {
            store
                .create(&StoredRecord {
                    name: name.to_string(),
                    rr_type: *rr_type,
                    class: CLASS_INET,
                    record: record.to_string(),
                })
                .await
                .unwrap();
        }
        (Recovery::new(cache.clone(), store), cache)
    }

    #[tokio::test]
    async fn test_recover_a_record_with_suppression() {
        let (recovery, cache) = seeded(&[("test.com.", TYPE_A, A_TEXT)]).await;
        cache.hash_set("stale", "Answer-0", "old", Duration::ZERO).await.unwrap();

        assert_eq!(recovery.run().await.unwrap(), 1);

        assert!(cache.hash_get_all("stale").await.unwrap().is_empty());
        let a = cache
            .hash_get_all(&Question::new("test.com.", TYPE_A, CLASS_INET).cache_key())
            .await
            .unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a["Answer-0"], A_TEXT);

        let aaaa = cache
            .hash_get_all(&Question::new("test.com.", TYPE_AAAA, CLASS_INET).cache_key())
            .await
            .unwrap();
        assert_eq!(aaaa.len(), 1);
        let soa: crate::rr::ResourceRecord = aaaa["Ns-0"].parse().unwrap();
        assert_eq!(
            soa.data,
            crate::rr::RecordData::SOA {
                mname: "test.com.".to_string(),
                rname: "test.com.".to_string(),
                serial: 0,
                refresh: 1440,
                retry: 300,
                expire: 1440,
                minimum: 1440,
            }
        );
    }

    #[tokio::test]
    async fn test_recover_is_idempotent() {
        let (recovery, _cache) = seeded(&[
            ("test.com.", TYPE_A, A_TEXT),
            ("www.test.com.", TYPE_CNAME, "www.test.com.\t300\tIN\tCNAME\ttest.com."),
        ])
        .await;

        assert_eq!(recovery.run().await.unwrap(), 2);
        assert_eq!(recovery.recover().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recover_suppresses_non_a_records() {
        let (recovery, cache) =
            seeded(&[("www.test.com.", TYPE_CNAME, "www.test.com.\t300\tIN\tCNAME\ttest.com.")]).await;
        recovery.run().await.unwrap();

        let aaaa = cache
            .hash_get_all(&Question::new("www.test.com.", TYPE_AAAA, CLASS_INET).cache_key())
            .await
            .unwrap();
        assert!(aaaa["Ns-0"].contains("\tSOA\t"));
    }

    #[tokio::test]
    async fn test_recover_real_aaaa_is_not_suppressed() {
        let (recovery, cache) = seeded(&[
            ("test.com.", TYPE_A, A_TEXT),
            ("test.com.", TYPE_AAAA, "test.com.\t60\tIN\tAAAA\t2001:db8::1"),
        ])
        .await;

        assert_eq!(recovery.run().await.unwrap(), 2);
        let aaaa = cache
            .hash_get_all(&Question::new("test.com.", TYPE_AAAA, CLASS_INET).cache_key())
            .await
            .unwrap();
        assert_eq!(aaaa.len(), 1);
        assert_eq!(aaaa["Answer-0"], "test.com.\t60\tIN\tAAAA\t2001:db8::1");
    }

    #[tokio::test]
    async fn test_recover_aborts_on_bad_row() {
        let (recovery, _cache) = seeded(&[("bad.com.", TYPE_A, "bad.com. 60 IN A nonsense")]).await;
        assert!(matches!(recovery.run().await, Err(DnsError::Decode(_))));
    }
}
