//! Error kinds shared by the resolver, the record manager and the stores.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum DnsError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("the record is already existed: {0}")]
    Conflict(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("inconsistent cache state: {0}")]
    Inconsistency(String),

    #[error("upstream forwarder exhausted")]
    UpstreamExhausted,
}

pub type DnsResult<T> = Result<T, DnsError>;

impl DnsError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DnsError::NotFound(_) => StatusCode::NOT_FOUND,
            DnsError::Conflict(_) => StatusCode::CONFLICT,
            DnsError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DnsError::UpstreamExhausted => StatusCode::BAD_GATEWAY,
            DnsError::Transport(_) | DnsError::Decode(_) | DnsError::Inconsistency(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DnsError::NotFound(_) => "not_found",
            DnsError::Conflict(_) => "conflict",
            DnsError::InvalidRequest(_) => "invalid_request",
            DnsError::Transport(_) => "transport",
            DnsError::Decode(_) => "decode",
            DnsError::Inconsistency(_) => "inconsistency",
            DnsError::UpstreamExhausted => "upstream_exhausted",
        }
    }
}

impl From<redis::RedisError> for DnsError {
    fn from(e: redis::RedisError) -> Self {
        DnsError::Transport(format!("Redis error: {}", e))
    }
}

impl From<rusqlite::Error> for DnsError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DnsError::Conflict(e.to_string())
            }
            _ => DnsError::Transport(format!("DB error: {}", e)),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Problem {
    message: String,
    status_code: u16,
}

impl IntoResponse for DnsError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Problem { message: self.to_string(), status_code: status.as_u16() };
        let body = serde_json::to_string(&body).unwrap_or_default();
        (status, [(header::CONTENT_TYPE, "application/problem+json")], body).into_response()
    }
}
