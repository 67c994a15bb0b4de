//! Cache-aside resolution: answer from the cache store when it holds the
//! question, otherwise forward to the configured upstreams in order and
//! write the first useful answer back into the cache.

use crate::config::ForwardConfig;
use crate::error::{DnsError, DnsResult};
use crate::metrics::{
    CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, DNS_DROPPED_TOTAL, DNS_RESPONSES_TOTAL,
    UPSTREAM_REQUEST_DURATION,
};
use crate::rr::ResourceRecord;
use crate::store::CacheStore;
use crate::types::{FieldKey, Question, Section};
use crate::wire;
use hickory_proto::op::Message;
use hickory_proto::rr::Record;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, warn};

pub struct Resolver {
    cache: Arc<dyn CacheStore>,
    upstreams: Vec<SocketAddr>,
    timeout: Duration,
}

impl Resolver {
    pub fn new(cache: Arc<dyn CacheStore>, forward: &ForwardConfig) -> Self {
        Self { cache, upstreams: forward.upstreams.clone(), timeout: forward.timeout }
    }

    /// Answers from the cache alone. `Ok(None)` when the question is not cached.
    pub async fn query_from_cache(&self, request: &Message) -> DnsResult<Option<Message>> {
        let question = question_of(request)?;
        let entry = self.cache.hash_get_all(&question.cache_key()).await?;
        if entry.is_empty() {
            return Ok(None);
        }

        let mut fields: Vec<(FieldKey, String)> = entry
            .into_iter()
            .filter_map(|(field, value)| FieldKey::parse(&field).map(|key| (key, value)))
            .collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        let mut resp = wire::reply_to(request);
        for (key, value) in fields {
            let rr: ResourceRecord = value.parse()?;
            let record = wire::to_wire(&rr)?;
            match key.section {
                Section::Answer => resp.add_answer(record),
                Section::Ns => resp.add_name_server(record),
                Section::Extra => resp.add_additional(record),
            };
        }

        Ok(wire::has_records(&resp).then_some(resp))
    }

    /// Forwards the request to each upstream in turn until one returns records.
    pub async fn query_from_upstream(&self, request: &Message) -> DnsResult<Message> {
        let question = question_of(request)?;
        let query = wire::encode(request)?;

        for upstream in &self.upstreams {
            let started = Instant::now();
            let outcome = match self.exchange(*upstream, &query).await {
                Ok(resp) if resp.id() != request.id() => {
                    warn!("[forward] {} answered with mismatched id {}", upstream, resp.id());
                    Err("mismatch")
                }
                Ok(resp) if !wire::has_records(&resp) => {
                    debug!("[forward] {} returned an empty response for {}", upstream, question);
                    Err("empty")
                }
                Ok(resp) => Ok(resp),
                Err(e) => {
                    debug!("[forward] {} failed for {}: {}", upstream, question, e);
                    Err(e.kind())
                }
            };

            let label = match &outcome {
                Ok(_) => "ok",
                Err(reason) => *reason,
            };
            UPSTREAM_REQUEST_DURATION
                .with_label_values(&[&upstream.to_string(), label])
                .observe(started.elapsed().as_secs_f64());

            if let Ok(resp) = outcome {
                self.populate(&question, &resp).await;
                return Ok(resp);
            }
        }

        Err(DnsError::UpstreamExhausted)
    }

    /// Full query path. `None` means the query is dropped without a reply.
    pub async fn serve(&self, request: &Message) -> Option<Message> {
        match self.query_from_cache(request).await {
            Ok(Some(resp)) => {
                CACHE_HITS_TOTAL.inc();
                DNS_RESPONSES_TOTAL.with_label_values(&["cache"]).inc();
                return Some(resp);
            }
            Ok(None) => CACHE_MISSES_TOTAL.inc(),
            Err(e) => {
                CACHE_MISSES_TOTAL.inc();
                warn!("[cache] Lookup failed, falling back to upstream: {}", e);
            }
        }

        match self.query_from_upstream(request).await {
            Ok(resp) => {
                DNS_RESPONSES_TOTAL.with_label_values(&["upstream"]).inc();
                Some(resp)
            }
            Err(e) => {
                DNS_DROPPED_TOTAL.with_label_values(&[e.kind()]).inc();
                debug!("[resolver] Dropping query {}: {}", request.id(), e);
                None
            }
        }
    }

    async fn exchange(&self, upstream: SocketAddr, query: &[u8]) -> DnsResult<Message> {
        let bind_addr = if upstream.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind_addr).await.map_err(transport)?;
        socket.connect(upstream).await.map_err(transport)?;
        socket.send(query).await.map_err(transport)?;

        let mut buf = vec![0u8; 4096];
        let len = timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| DnsError::Transport(format!("timeout after {:?}", self.timeout)))?
            .map_err(transport)?;
        wire::decode(&buf[..len])
    }

    /// Writes every record of `resp` into the question's cache entry, one field
    /// per record with the record's own TTL. Records with TTL 0 are skipped.
    async fn populate(&self, question: &Question, resp: &Message) {
        let key = question.cache_key();
        let sections: [(Section, &[Record]); 3] = [
            (Section::Answer, resp.answers()),
            (Section::Ns, resp.name_servers()),
            (Section::Extra, resp.additionals()),
        ];

        for (section, records) in sections {
            for (i, record) in records.iter().enumerate() {
                if record.ttl() == 0 {
                    continue;
                }
                let rr = match wire::from_wire(record) {
                    Ok(rr) => rr,
                    Err(e) => {
                        debug!("[cache] Not caching {} record {}: {}", section.as_str(), record.name(), e);
                        continue;
                    }
                };
                let ttl = Duration::from_secs(u64::from(rr.header.ttl));
                if let Err(e) = self.cache.hash_set(&key, &section.field(i), &rr.to_string(), ttl).await {
                    warn!("[cache] Failed to store {} for {}: {}", section.field(i), question, e);
                }
            }
        }
    }
}

fn question_of(request: &Message) -> DnsResult<Question> {
    request
        .queries()
        .first()
        .map(Question::from_query)
        .ok_or_else(|| DnsError::InvalidRequest("query has no question".to_string()))
}

fn transport(e: std::io::Error) -> DnsError {
    DnsError::Transport(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::cache::MemoryCache;
    use crate::types::{CLASS_INET, TYPE_A};
    use hickory_proto::op::{MessageType, OpCode, Query};
    use hickory_proto::rr::{Name, RecordType};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Memory cache that also remembers the TTL of every write.
    struct RecordingCache {
        inner: MemoryCache,
        writes: Mutex<Vec<(String, String, Duration)>>,
    }

    impl RecordingCache {
        fn new() -> Self {
            Self { inner: MemoryCache::new(), writes: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait::async_trait]
    impl CacheStore for RecordingCache {
        fn name(&self) -> &str { "recording" }

        async fn hash_set(&self, key: &str, field: &str, value: &str, ttl: Duration) -> DnsResult<()> {
            self.writes.lock().unwrap().push((key.to_string(), field.to_string(), ttl));
            self.inner.hash_set(key, field, value, ttl).await
        }

        async fn hash_get_all(&self, key: &str) -> DnsResult<HashMap<String, String>> {
            self.inner.hash_get_all(key).await
        }

        async fn hash_delete_all(&self, key: &str) -> DnsResult<()> {
            self.inner.hash_delete_all(key).await
        }

        async fn flush_all(&self) -> DnsResult<()> {
            self.inner.flush_all().await
        }
    }

    fn request(name: &str, id: u16) -> Message {
        let mut msg = Message::new();
        msg.set_id(id);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        msg.set_recursion_desired(true);
        msg.add_query(Query::query(Name::from_ascii(name).unwrap(), RecordType::A));
        msg
    }

    fn record(text: &str) -> Record {
        wire::to_wire(&text.parse::<ResourceRecord>().unwrap()).unwrap()
    }

    /// Bound socket that never answers. Dropping it closes the port.
    async fn silent_upstream() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    /// Answers every query with `answers`, `authority` in the matching sections.
    async fn answering_upstream(answers: Vec<&str>, authority: Vec<&str>) -> SocketAddr {
        let answers: Vec<Record> = answers.into_iter().map(record).collect();
        let authority: Vec<Record> = authority.into_iter().map(record).collect();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            while let Ok((len, src)) = socket.recv_from(&mut buf).await {
                let req = wire::decode(&buf[..len]).unwrap();
                let mut resp = wire::reply_to(&req);
                for r in &answers {
                    resp.add_answer(r.clone());
                }
                for r in &authority {
                    resp.add_name_server(r.clone());
                }
                socket.send_to(&wire::encode(&resp).unwrap(), src).await.unwrap();
            }
        });
        addr
    }

    fn forward(upstreams: Vec<SocketAddr>) -> ForwardConfig {
        ForwardConfig { upstreams, timeout: Duration::from_millis(200) }
    }

    fn texts(records: &[Record]) -> Vec<String> {
        records.iter().map(|r| wire::from_wire(r).unwrap().to_string()).collect()
    }

    #[tokio::test]
    async fn test_upstream_failover_populates_cache() {
        let (_silent, first) = silent_upstream().await;
        let second = answering_upstream(vec!["test.com. 300 IN A 1.1.1.1"], vec![]).await;
        let cache = Arc::new(RecordingCache::new());
        let resolver = Resolver::new(cache.clone(), &forward(vec![first, second]));

        let resp = resolver.query_from_upstream(&request("test.com.", 77)).await.unwrap();
        assert_eq!(resp.id(), 77);
        assert_eq!(texts(resp.answers()), vec!["test.com.\t300\tIN\tA\t1.1.1.1"]);

        let key = Question::new("test.com.", TYPE_A, CLASS_INET).cache_key();
        let writes = cache.writes.lock().unwrap().clone();
        assert_eq!(writes, vec![(key.clone(), "Answer-0".to_string(), Duration::from_secs(300))]);

        let cached = cache.hash_get_all(&key).await.unwrap();
        assert_eq!(cached["Answer-0"], "test.com.\t300\tIN\tA\t1.1.1.1");
    }

    #[tokio::test]
    async fn test_cache_returns_what_upstream_cached() {
        let upstream = answering_upstream(
            vec!["test.com. 300 IN A 1.1.1.1", "test.com. 300 IN A 2.2.2.2"],
            vec!["com. 600 IN NS ns.example.net."],
        )
        .await;
        let resolver = Resolver::new(Arc::new(MemoryCache::new()), &forward(vec![upstream]));

        let upstream_resp = resolver.query_from_upstream(&request("test.com.", 1)).await.unwrap();
        let cached_resp = resolver.query_from_cache(&request("test.com.", 2)).await.unwrap().unwrap();

        assert_eq!(cached_resp.id(), 2);
        assert_eq!(texts(cached_resp.answers()), texts(upstream_resp.answers()));
        assert_eq!(texts(cached_resp.name_servers()), texts(upstream_resp.name_servers()));
        assert!(cached_resp.additionals().is_empty());
    }

    #[tokio::test]
    async fn test_empty_upstream_reply_is_inconclusive() {
        let empty = answering_upstream(vec![], vec![]).await;
        let good = answering_upstream(vec!["test.com. 60 IN A 9.9.9.9"], vec![]).await;
        let resolver = Resolver::new(Arc::new(MemoryCache::new()), &forward(vec![empty, good]));

        let resp = resolver.query_from_upstream(&request("test.com.", 5)).await.unwrap();
        assert_eq!(texts(resp.answers()), vec!["test.com.\t60\tIN\tA\t9.9.9.9"]);
    }

    #[tokio::test]
    async fn test_exhausted_upstreams_drop_query() {
        let (_a, first) = silent_upstream().await;
        let empty = answering_upstream(vec![], vec![]).await;
        let resolver = Resolver::new(Arc::new(MemoryCache::new()), &forward(vec![first, empty]));

        let err = resolver.query_from_upstream(&request("test.com.", 9)).await.unwrap_err();
        assert!(matches!(err, DnsError::UpstreamExhausted));
        assert!(resolver.serve(&request("test.com.", 9)).await.is_none());
    }

    #[tokio::test]
    async fn test_zero_ttl_records_are_not_cached() {
        let upstream = answering_upstream(vec!["test.com. 0 IN A 1.1.1.1"], vec![]).await;
        let cache = Arc::new(MemoryCache::new());
        let resolver = Resolver::new(cache.clone(), &forward(vec![upstream]));

        assert!(resolver.serve(&request("test.com.", 3)).await.is_some());
        let key = Question::new("test.com.", TYPE_A, CLASS_INET).cache_key();
        assert!(cache.hash_get_all(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_hit_is_not_forwarded() {
        let (_silent, upstream) = silent_upstream().await;
        let cache = Arc::new(MemoryCache::new());
        let key = Question::new("test.com.", TYPE_A, CLASS_INET).cache_key();
        cache.hash_set(&key, "Answer-0", "test.com.\t1440\tIN\tA\t1.1.1.1", Duration::ZERO).await.unwrap();
        let resolver = Resolver::new(cache, &forward(vec![upstream]));

        let resp = resolver.serve(&request("test.com.", 11)).await.unwrap();
        assert_eq!(texts(resp.answers()), vec!["test.com.\t1440\tIN\tA\t1.1.1.1"]);
    }

    #[tokio::test]
    async fn test_cache_sections_sorted_by_index() {
        let cache = Arc::new(MemoryCache::new());
        let key = Question::new("test.com.", TYPE_A, CLASS_INET).cache_key();
        for (field, ip) in [("Answer-10", "10.0.0.10"), ("Answer-2", "10.0.0.2"), ("Answer-0", "10.0.0.0")] {
            let text = format!("test.com.\t60\tIN\tA\t{}", ip);
            cache.hash_set(&key, field, &text, Duration::ZERO).await.unwrap();
        }
        cache.hash_set(&key, "Bogus-0", "ignored", Duration::ZERO).await.unwrap();
        let resolver = Resolver::new(cache, &forward(vec![]));

        let resp = resolver.query_from_cache(&request("test.com.", 1)).await.unwrap().unwrap();
        assert_eq!(
            texts(resp.answers()),
            vec![
                "test.com.\t60\tIN\tA\t10.0.0.0",
                "test.com.\t60\tIN\tA\t10.0.0.2",
                "test.com.\t60\tIN\tA\t10.0.0.10",
            ]
        );
    }

    #[tokio::test]
    async fn test_cache_miss_and_bad_entry() {
        let cache = Arc::new(MemoryCache::new());
        let resolver = Resolver::new(cache.clone(), &forward(vec![]));
        assert!(resolver.query_from_cache(&request("test.com.", 1)).await.unwrap().is_none());

        let key = Question::new("test.com.", TYPE_A, CLASS_INET).cache_key();
        cache.hash_set(&key, "Answer-0", "not a record", Duration::ZERO).await.unwrap();
        assert!(matches!(
            resolver.query_from_cache(&request("test.com.", 1)).await,
            Err(DnsError::Decode(_))
        ));
    }
}
