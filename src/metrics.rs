use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    pub static ref DNS_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "restful_dns_requests_total",
        "Counter of DNS requests per protocol.",
        &["proto"]
    ).unwrap();

    pub static ref DNS_RESPONSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "restful_dns_responses_total",
        "Counter of DNS responses by where the answer came from.",
        &["source"]
    ).unwrap();

    pub static ref DNS_DROPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "restful_dns_dropped_total",
        "Counter of queries that got no response.",
        &["reason"]
    ).unwrap();

    pub static ref CACHE_HITS_TOTAL: IntCounter = register_int_counter!(
        "restful_dns_cache_hits_total",
        "The count of cache hits."
    ).unwrap();

    pub static ref CACHE_MISSES_TOTAL: IntCounter = register_int_counter!(
        "restful_dns_cache_misses_total",
        "The count of cache misses."
    ).unwrap();

    pub static ref UPSTREAM_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "restful_dns_upstream_request_duration_seconds",
        "Histogram of the time each upstream request took.",
        &["to", "outcome"],
        vec![0.00025, 0.0005, 0.001, 0.002, 0.004, 0.008, 0.016, 0.032, 0.064, 0.128, 0.256, 0.512, 1.024, 2.048]
    ).unwrap();

    pub static ref ADMIN_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "restful_dns_admin_operations_total",
        "Counter of record management operations by result.",
        &["operation", "result"]
    ).unwrap();

    pub static ref RECOVERED_RECORDS_TOTAL: IntCounter = register_int_counter!(
        "restful_dns_recovered_records_total",
        "Authoritative records written back into the cache at startup."
    ).unwrap();
}

/// Records the result of a record management call.
pub fn observe_admin<T>(operation: &str, result: &crate::error::DnsResult<T>) {
    let label = match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    ADMIN_OPERATIONS_TOTAL.with_label_values(&[operation, label]).inc();
}

/// Text exposition of every registered collector.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("[prometheus] Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_exposes_counters() {
        DNS_REQUESTS_TOTAL.with_label_values(&["udp"]).inc();
        observe_admin::<()>("create", &Err(crate::error::DnsError::Conflict("x".into())));
        let text = gather();
        assert!(text.contains("restful_dns_requests_total"));
        assert!(text.contains("operation=\"create\",result=\"conflict\""));
    }
}
