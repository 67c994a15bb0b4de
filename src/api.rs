//! REST administration of the authoritative records, plus health and metrics.

use crate::error::{DnsError, DnsResult};
use crate::metrics::{self, observe_admin};
use crate::records::RecordManager;
use crate::rr::{RecordData, ResourceRecord};
use crate::types::{class_name, parse_class, parse_type, type_name, Question};
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct ApiState {
    pub records: Arc<RecordManager>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/record/{record_type}", post(create_record).put(update_record))
        .route("/api/v1/record", get(get_record).delete(delete_record))
        .route("/api/v1/records", get(list_records))
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: ApiState, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind API {}: {}", addr, e))?;
    tracing::info!("[api] Listening on http://{}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    tracing::info!("[api] Server stopped");
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeaderBody {
    pub name: String,
    pub rrtype: String,
    pub class: String,
    pub ttl: u32,
}

#[derive(Debug, Deserialize)]
pub struct ABody {
    pub hdr: HeaderBody,
    pub a: Ipv4Addr,
}

#[derive(Debug, Deserialize)]
pub struct AaaaBody {
    pub hdr: HeaderBody,
    pub aaaa: Ipv6Addr,
}

/// Record kinds accepted by the create and update endpoints.
#[derive(Debug)]
pub enum RecordBody {
    A(ABody),
    Aaaa(AaaaBody),
}

impl RecordBody {
    /// Decodes `body` as the kind named in the path (`a` or `aaaa`).
    pub fn parse(kind: &str, body: &[u8]) -> DnsResult<Self> {
        let parsed = match kind {
            "a" => serde_json::from_slice(body).map(RecordBody::A),
            "aaaa" => serde_json::from_slice(body).map(RecordBody::Aaaa),
            _ => {
                return Err(DnsError::InvalidRequest(format!(
                    "record type '{}' is not supported",
                    kind
                )))
            }
        };
        parsed.map_err(|e| DnsError::InvalidRequest(format!("Bind JSON error: {}", e)))
    }

    pub fn into_record(self) -> DnsResult<ResourceRecord> {
        let (hdr, expected, data) = match self {
            RecordBody::A(body) => (body.hdr, "A", RecordData::A(body.a)),
            RecordBody::Aaaa(body) => (body.hdr, "AAAA", RecordData::AAAA(body.aaaa)),
        };
        if !hdr.rrtype.eq_ignore_ascii_case(expected) {
            return Err(DnsError::InvalidRequest(format!(
                "rrtype '{}' does not match record kind {}",
                hdr.rrtype, expected
            )));
        }
        if hdr.name.is_empty() {
            return Err(DnsError::InvalidRequest("hdr.name is required".to_string()));
        }
        let class = parse_class(&hdr.class)
            .ok_or_else(|| DnsError::InvalidRequest(format!("unknown class '{}'", hdr.class)))?;
        ResourceRecord::new(&hdr.name, class, hdr.ttl, data)
    }
}

#[derive(Debug, Deserialize)]
pub struct QuestionBody {
    pub name: String,
    pub qtype: String,
    pub qclass: String,
}

impl QuestionBody {
    pub fn into_question(self) -> DnsResult<Question> {
        if self.name.is_empty() {
            return Err(DnsError::InvalidRequest("name is required".to_string()));
        }
        let qtype = parse_type(&self.qtype)
            .map_err(|_| DnsError::InvalidRequest(format!("unknown qtype '{}'", self.qtype)))?;
        let qclass = parse_class(&self.qclass)
            .ok_or_else(|| DnsError::InvalidRequest(format!("unknown qclass '{}'", self.qclass)))?;
        Ok(Question::new(&self.name, qtype, qclass))
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct RecordView {
    pub hdr: HeaderBody,
    pub rdata: String,
    pub record: String,
}

impl From<&ResourceRecord> for RecordView {
    fn from(rr: &ResourceRecord) -> Self {
        Self {
            hdr: HeaderBody {
                name: rr.header.name.clone(),
                rrtype: type_name(rr.header.rr_type),
                class: class_name(rr.header.class),
                ttl: rr.header.ttl,
            },
            rdata: rr.rdata_text(),
            record: rr.to_string(),
        }
    }
}

async fn create_record(
    State(state): State<ApiState>,
    Path(record_type): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<RecordView>), DnsError> {
    let result = async {
        let rr = RecordBody::parse(&record_type, &body)?.into_record()?;
        state.records.create(&rr).await?;
        Ok::<_, DnsError>(rr)
    }
    .await;
    observe_admin("create", &result);
    let rr = result?;
    Ok((StatusCode::CREATED, Json(RecordView::from(&rr))))
}

async fn get_record(
    State(state): State<ApiState>,
    query: Result<Query<QuestionBody>, QueryRejection>,
) -> Result<Json<RecordView>, DnsError> {
    let result = async {
        let Query(question) =
            query.map_err(|e| DnsError::InvalidRequest(format!("Bind query error: {}", e)))?;
        state.records.get(&question.into_question()?).await
    }
    .await;
    observe_admin("get", &result);
    Ok(Json(RecordView::from(&result?)))
}

async fn list_records(State(state): State<ApiState>) -> Result<Json<Vec<RecordView>>, DnsError> {
    let result = state.records.list().await;
    observe_admin("list", &result);
    Ok(Json(result?.iter().map(RecordView::from).collect()))
}

async fn update_record(
    State(state): State<ApiState>,
    Path(record_type): Path<String>,
    body: Bytes,
) -> Result<Json<RecordView>, DnsError> {
    let result = async {
        let rr = RecordBody::parse(&record_type, &body)?.into_record()?;
        state.records.update(&rr).await?;
        Ok::<_, DnsError>(rr)
    }
    .await;
    observe_admin("update", &result);
    Ok(Json(RecordView::from(&result?)))
}

async fn delete_record(State(state): State<ApiState>, body: Bytes) -> Result<StatusCode, DnsError> {
    let result = async {
        let question: QuestionBody = serde_json::from_slice(&body)
            .map_err(|e| DnsError::InvalidRequest(format!("Bind JSON error: {}", e)))?;
        state.records.delete(&question.into_question()?).await
    }
    .await;
    observe_admin("delete", &result);
    result?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health() -> &'static str {
    "OK"
}

async fn prometheus_metrics() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], metrics::gather())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::cache::MemoryCache;
    use crate::store::sqlite::SqliteRecordStore;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app() -> Router {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(SqliteRecordStore::in_memory().unwrap());
        router(ApiState { records: Arc::new(RecordManager::new(cache, store)) })
    }

    fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    const A_BODY: &str =
        r#"{"hdr":{"name":"test.com","rrtype":"A","class":"INET","ttl":1440},"a":"1.1.1.1"}"#;

    #[tokio::test]
    async fn test_create_and_get_record() {
        let app = app();
        let (status, body) = send(&app, json_request("POST", "/api/v1/record/a", A_BODY)).await;
        assert_eq!(status, StatusCode::CREATED);
        let view: RecordView = serde_json::from_str(&body).unwrap();
        assert_eq!(view.record, "test.com.\t1440\tIN\tA\t1.1.1.1");
        assert_eq!(view.rdata, "1.1.1.1");

        let (status, body) =
            send(&app, get_request("/api/v1/record?name=test.com&qtype=A&qclass=INET")).await;
        assert_eq!(status, StatusCode::OK);
        let fetched: RecordView = serde_json::from_str(&body).unwrap();
        assert_eq!(fetched, view);

        let (status, body) = send(&app, get_request("/api/v1/records")).await;
        assert_eq!(status, StatusCode::OK);
        let all: Vec<RecordView> = serde_json::from_str(&body).unwrap();
        assert_eq!(all, vec![view]);
    }

    #[tokio::test]
    async fn test_duplicate_create_is_conflict() {
        let app = app();
        send(&app, json_request("POST", "/api/v1/record/a", A_BODY)).await;
        let (status, body) = send(&app, json_request("POST", "/api/v1/record/a", A_BODY)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let problem: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(problem["statusCode"], 409);
    }

    #[tokio::test]
    async fn test_rejects_bad_record_bodies() {
        let app = app();
        let (status, _) = send(&app, json_request("POST", "/api/v1/record/mx", A_BODY)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, json_request("POST", "/api/v1/record/aaaa", A_BODY)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mismatched =
            r#"{"hdr":{"name":"test.com","rrtype":"AAAA","class":"INET","ttl":60},"a":"1.1.1.1"}"#;
        let (status, _) = send(&app, json_request("POST", "/api/v1/record/a", mismatched)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, get_request("/api/v1/record?name=test.com")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_and_delete_record() {
        let app = app();
        let updated =
            r#"{"hdr":{"name":"test.com","rrtype":"A","class":"IN","ttl":60},"a":"2.2.2.2"}"#;
        let (status, _) = send(&app, json_request("PUT", "/api/v1/record/a", updated)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        send(&app, json_request("POST", "/api/v1/record/a", A_BODY)).await;
        let (status, body) = send(&app, json_request("PUT", "/api/v1/record/a", updated)).await;
        assert_eq!(status, StatusCode::OK);
        let view: RecordView = serde_json::from_str(&body).unwrap();
        assert_eq!(view.record, "test.com.\t60\tIN\tA\t2.2.2.2");

        let question = r#"{"name":"test.com","qtype":"A","qclass":"INET"}"#;
        let (status, _) = send(&app, json_request("DELETE", "/api/v1/record", question)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, json_request("DELETE", "/api/v1/record", question)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let app = app();
        let (status, body) = send(&app, get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");

        send(&app, json_request("POST", "/api/v1/record/a", A_BODY)).await;
        let (status, body) = send(&app, get_request("/metrics")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("restful_dns_admin_operations_total"));
    }
}
