#[cfg(test)]
mod tests {
    use super::super::Gateway;
    use super::super::http::router;
    use crate::admission::AdmissionControl;
    use crate::breaker::AsyncCircuitBreaker;
    use crate::metrics::Metrics;
    use crate::types::{AdmitResponse, BreakerStatus, ErrorPayload};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use axum::response::Response;
    use std::sync::Arc;
    use std::time::Duration;
    use throttlegate::{
        CircuitBreakerConfig, SlidingWindowLimiter, TokenBucketConfig, TokenBucketLimiter,
    };
    use tower::ServiceExt;

    fn gateway(max_requests: u64) -> Gateway {
        let sustained = SlidingWindowLimiter::builder()
            .max_requests(max_requests)
            .window_size(Duration::from_secs(60))
            .sliding_window_count(5)
            .block_duration(Duration::from_secs(60))
            .build()
            .unwrap();
        let burst = TokenBucketLimiter::new(TokenBucketConfig::default()).unwrap();
        Gateway {
            admission: Arc::new(AdmissionControl::new(sustained, burst)),
            breaker: Arc::new(AsyncCircuitBreaker::new(
                "downstream",
                CircuitBreakerConfig::default(),
            )),
            metrics: Arc::new(Metrics::new()),
        }
    }

    fn admit_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/admit")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_admit_allowed_sets_quota_headers() {
        let app = router(gateway(10));

        let response = app
            .oneshot(admit_request(r#"{"identifier": "client-a"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "10");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "9");
        assert_eq!(response.headers()["x-ratelimit-reset"], "300");

        let body: AdmitResponse = body_json(response).await;
        assert!(body.allowed);
        assert_eq!(body.remaining, 9);
        assert_eq!(body.burst_remaining, 19);
    }

    #[tokio::test]
    async fn test_admit_denied_returns_429() {
        let gateway = gateway(1);
        let app = router(gateway.clone());

        let first = app
            .clone()
            .oneshot(admit_request(r#"{"identifier": "client-b"}"#))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(admit_request(r#"{"identifier": "client-b", "tokens": 1}"#))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers()[header::RETRY_AFTER], "60");

        let body: ErrorPayload = body_json(second).await;
        assert_eq!(body.reason, "rate_limited");
        assert_eq!(body.retry_after, Some(60));

        let metrics = gateway.metrics.export_prometheus();
        assert!(metrics.contains("throttlegate_requests_denied{scope=\"sustained\"} 1"));
    }

    #[tokio::test]
    async fn test_admit_rejects_empty_identifier() {
        let app = router(gateway(10));

        let response = app
            .oneshot(admit_request(r#"{"identifier": ""}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorPayload = body_json(response).await;
        assert_eq!(body.reason, "invalid_request");
        assert_eq!(body.retry_after, None);
    }

    #[tokio::test]
    async fn test_breaker_endpoint() {
        let gateway = gateway(10);
        gateway.breaker.trip();
        let app = router(gateway);

        let request = Request::builder()
            .uri("/breaker")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let status: BreakerStatus = body_json(response).await;
        assert_eq!(status.name, "downstream");
        assert_eq!(status.state, "open");
        assert!(status.opened_at.is_some());
        assert!(!status.trial_in_flight);
    }

    #[tokio::test]
    async fn test_metrics_and_health_endpoints() {
        let gateway = gateway(10);
        gateway.admission.check("client-c", 1).unwrap();
        let app = router(gateway);

        let request = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("throttlegate_tracked_identifiers 1"));

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"OK");
    }
}
