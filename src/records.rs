//! Authoritative record management.
//!
//! Every authoritative record lives in the record store and, under its
//! question key, in the cache as `Answer-0` with no expiry. A names that own
//! an A record additionally get a suppression entry: a synthetic SOA under
//! `Ns-0` of the AAAA question, so AAAA lookups are answered locally instead
//! of being forwarded, unless the name also owns an authoritative AAAA
//! record. An AAAA key never holds both `Answer-*` fields and the
//! suppression entry.

use crate::error::{DnsError, DnsResult};
use crate::rr::{ResourceRecord, RrHeader};
use crate::store::{CacheStore, RecordStore, StoredRecord};
use crate::types::{to_fqdn, FieldKey, Question, Section, TYPE_A};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct RecordManager {
    cache: Arc<dyn CacheStore>,
    store: Arc<dyn RecordStore>,
}

impl RecordManager {
    pub fn new(cache: Arc<dyn CacheStore>, store: Arc<dyn RecordStore>) -> Self {
        Self { cache, store }
    }

    pub async fn create(&self, rr: &ResourceRecord) -> DnsResult<()> {
        let rr = normalized(rr);
        let question = rr.question();

        match self.store.get(&question.name, question.qtype, question.qclass).await {
            Ok(_) => return Err(DnsError::Conflict(question.to_string())),
            Err(DnsError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let text = rr.to_string();
        self.store.create(&stored(&question, &text)).await?;

        // drops upstream answers and, for AAAA, any suppression entry
        let key = question.cache_key();
        self.cache.hash_delete_all(&key).await?;
        self.cache
            .hash_set(&key, &Section::Answer.field(0), &text, Duration::ZERO)
            .await?;

        if rr.header.rr_type == TYPE_A {
            create_fake_aaaa(&*self.cache, &*self.store, &rr.header).await?;
        }

        info!("[records] Created {}", text);
        Ok(())
    }

    /// Reads the record store directly; the cache is not consulted.
    pub async fn get(&self, question: &Question) -> DnsResult<ResourceRecord> {
        let name = to_fqdn(&question.name);
        let row = self.store.get(&name, question.qtype, question.qclass).await?;
        row.record.parse()
    }

    /// All authoritative records. One undecodable row fails the whole listing.
    pub async fn list(&self) -> DnsResult<Vec<ResourceRecord>> {
        self.store
            .list()
            .await?
            .iter()
            .map(|row| row.record.parse())
            .collect()
    }

    pub async fn update(&self, rr: &ResourceRecord) -> DnsResult<()> {
        let rr = normalized(rr);
        let question = rr.question();
        let text = rr.to_string();

        self.store.update(&stored(&question, &text)).await?;

        // entries cached under the record text are dropped as well as the
        // question's own entry
        self.cache.hash_delete_all(&text).await?;
        let key = question.cache_key();
        self.cache.hash_delete_all(&key).await?;
        self.cache
            .hash_set(&key, &Section::Answer.field(0), &text, Duration::ZERO)
            .await?;

        if rr.header.rr_type == TYPE_A
            && is_suppression_active(&*self.cache, &question.as_aaaa().cache_key()).await?
        {
            create_fake_aaaa(&*self.cache, &*self.store, &rr.header).await?;
        }

        info!("[records] Updated {}", text);
        Ok(())
    }

    pub async fn delete(&self, question: &Question) -> DnsResult<()> {
        let question = Question::new(&question.name, question.qtype, question.qclass);
        self.store.delete(&question.name, question.qtype, question.qclass).await?;

        let aaaa_key = question.as_aaaa().cache_key();
        if is_suppression_active(&*self.cache, &aaaa_key).await? {
            self.cache.hash_delete_all(&aaaa_key).await?;
        }
        self.cache.hash_delete_all(&question.cache_key()).await?;

        info!("[records] Deleted {}", question);
        Ok(())
    }
}

/// Writes the suppression entry for the name of `header`, derived from the
/// record cached under the header's own question. Names with an
/// authoritative AAAA record are left alone; anything else cached for the
/// AAAA question is replaced.
pub(crate) async fn create_fake_aaaa(
    cache: &dyn CacheStore,
    store: &dyn RecordStore,
    header: &RrHeader,
) -> DnsResult<()> {
    let question = header.question();
    let source = cache.hash_get_all(&question.cache_key()).await?;

    let answer = source
        .iter()
        .filter_map(|(field, value)| {
            let key = FieldKey::parse(field)?;
            (key.section == Section::Answer).then_some((key.index, value))
        })
        .min_by_key(|(index, _)| *index)
        .map(|(_, value)| value)
        .ok_or_else(|| {
            DnsError::Inconsistency(format!("no corresponding A record for {}", question))
        })?;
    let source_rr: ResourceRecord = answer.parse()?;
    let soa = ResourceRecord::suppression_soa(&source_rr.header);

    let aaaa = question.as_aaaa();
    match store.get(&aaaa.name, aaaa.qtype, aaaa.qclass).await {
        Ok(_) => {
            debug!("[records] {} owns an AAAA record, no suppression", question.name);
            return Ok(());
        }
        Err(DnsError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }

    let aaaa_key = aaaa.cache_key();
    cache.hash_delete_all(&aaaa_key).await?;
    cache
        .hash_set(&aaaa_key, &Section::Ns.field(0), &soa.to_string(), Duration::ZERO)
        .await
}

/// True when the entry at `key` exists and carries no answer fields.
pub(crate) async fn is_suppression_active(cache: &dyn CacheStore, key: &str) -> DnsResult<bool> {
    let entry = cache.hash_get_all(key).await?;
    Ok(!entry.is_empty() && !has_answer(entry.keys()))
}

fn has_answer<'a>(mut fields: impl Iterator<Item = &'a String>) -> bool {
    fields.any(|field| field.starts_with(Section::Answer.as_str()))
}

fn normalized(rr: &ResourceRecord) -> ResourceRecord {
    let mut rr = rr.clone();
    rr.header.name = to_fqdn(&rr.header.name);
    rr
}

fn stored(question: &Question, text: &str) -> StoredRecord {
    StoredRecord {
        name: question.name.clone(),
        rr_type: question.qtype,
        class: question.qclass,
        record: text.to_string(),
    }
}
