//! HTTP/JSON transport
//!
//! # API Endpoints
//!
//! ## POST /admit
//!
//! Run admission control for an identifier.
//!
//! ### Request Body
//!
//! ```json
//! { "identifier": "203.0.113.9:summarize", "tokens": 1 }
//! ```
//!
//! - `tokens` is optional (defaults to 1)
//!
//! ### Response
//!
//! `200 OK` with `x-ratelimit-limit`, `x-ratelimit-remaining` and
//! `x-ratelimit-reset` headers:
//!
//! ```json
//! { "allowed": true, "limit": 10, "remaining": 9, "reset_after": 300, "burst_remaining": 19 }
//! ```
//!
//! `429 Too Many Requests` with a `retry-after` header:
//!
//! ```json
//! { "error": "rate limit exceeded (sustained), retry after 60s", "reason": "rate_limited", "retry_after": 60 }
//! ```
//!
//! ## GET /breaker
//!
//! Snapshot of the downstream circuit breaker.
//!
//! ## GET /metrics
//!
//! Prometheus text exposition.
//!
//! ## GET /health
//!
//! Health check endpoint. Returns "OK" with 200 status.

use super::{Gateway, Transport};
use crate::error::GovernanceError;
use crate::types::{AdmitRequest, AdmitResponse, BreakerStatus, ErrorPayload};
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    Router,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use std::net::SocketAddr;

const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

pub struct HttpTransport {
    addr: SocketAddr,
}

impl HttpTransport {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{host}:{port}")
            .parse()
            .with_context(|| format!("invalid HTTP listen address {host}:{port}"))?;
        Ok(Self { addr })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(self, gateway: Gateway) -> Result<()> {
        let app = router(gateway);

        tracing::info!("HTTP server listening on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

pub fn router(gateway: Gateway) -> Router {
    Router::new()
        .route("/admit", post(handle_admit))
        .route("/breaker", get(handle_breaker))
        .route("/metrics", get(handle_metrics))
        .route("/health", get(|| async { "OK" }))
        .with_state(gateway)
}

async fn handle_admit(State(gateway): State<Gateway>, Json(req): Json<AdmitRequest>) -> Response {
    if req.identifier.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorPayload {
                error: "identifier must not be empty".to_string(),
                reason: "invalid_request".to_string(),
                retry_after: None,
            }),
        )
            .into_response();
    }

    match gateway
        .admission
        .check(&req.identifier, req.tokens.unwrap_or(1))
    {
        Ok(admission) => {
            gateway.metrics.record_admitted();
            let body = AdmitResponse::from(admission);
            let mut headers = HeaderMap::new();
            headers.insert(RATELIMIT_LIMIT, HeaderValue::from(body.limit));
            headers.insert(RATELIMIT_REMAINING, HeaderValue::from(body.remaining));
            headers.insert(RATELIMIT_RESET, HeaderValue::from(body.reset_after));
            (StatusCode::OK, headers, Json(body)).into_response()
        }
        Err(err) => {
            gateway.metrics.record_error(&err);
            error_response(&err)
        }
    }
}

async fn handle_breaker(State(gateway): State<Gateway>) -> Json<BreakerStatus> {
    Json(BreakerStatus::new(
        gateway.breaker.name(),
        gateway.breaker.snapshot(),
    ))
}

async fn handle_metrics(State(gateway): State<Gateway>) -> impl IntoResponse {
    gateway
        .metrics
        .update_tracked_identifiers(gateway.admission.tracked());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gateway.metrics.export_prometheus(),
    )
}

fn error_response(err: &GovernanceError) -> Response {
    let status = match err {
        GovernanceError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        GovernanceError::CircuitOpen { .. } | GovernanceError::QueueClosed => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        GovernanceError::QueueTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        GovernanceError::Upstream(_) => StatusCode::BAD_GATEWAY,
        GovernanceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let payload = ErrorPayload::from(err);

    let mut headers = HeaderMap::new();
    if let Some(secs) = payload.retry_after {
        headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    (status, headers, Json(payload)).into_response()
}
