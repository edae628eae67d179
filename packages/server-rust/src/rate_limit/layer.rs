//! Tower middleware enforcing a [`RateLimitPolicy`] per client address.
//!
//! Every response carries `x-ratelimit-limit` and `x-ratelimit-remaining`;
//! rejections additionally carry `retry-after` and a `RATE_LIMITED` body.
//! Layers can be stacked: each owns its own store and both must allow the
//! request. On allowed responses the innermost layer's headers are kept,
//! since it is the most specific limit for that path.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::response::{IntoResponse, Response};
use http::header::RETRY_AFTER;
use http::{HeaderMap, HeaderName, HeaderValue, Request};
use tower::{Layer, Service};
use tracing::debug;

use super::{client_key, Decision, MemoryRateLimitStore, RateLimitPolicy, RateLimitStore};
use crate::error::GuardError;

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

// ---------------------------------------------------------------------------
// RateLimitLayer
// ---------------------------------------------------------------------------

/// Tower layer that checks each request against a keyed counter store.
#[derive(Clone)]
pub struct RateLimitLayer {
    name: &'static str,
    policy: RateLimitPolicy,
    store: Arc<dyn RateLimitStore>,
}

impl RateLimitLayer {
    /// Creates a layer over an existing store. `name` labels logs and metrics.
    #[must_use]
    pub fn new(name: &'static str, policy: RateLimitPolicy, store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            name,
            policy,
            store,
        }
    }

    /// Creates a layer with its own in-process store.
    #[must_use]
    pub fn in_memory(name: &'static str, policy: RateLimitPolicy) -> Self {
        Self::new(name, policy, Arc::new(MemoryRateLimitStore::new()))
    }

    /// Shared handle to the backing store, e.g. for the background sweeper.
    #[must_use]
    pub fn store(&self) -> Arc<dyn RateLimitStore> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            name: self.name,
            policy: self.policy,
            store: Arc::clone(&self.store),
        }
    }
}

// ---------------------------------------------------------------------------
// RateLimitService
// ---------------------------------------------------------------------------

/// Service wrapper produced by [`RateLimitLayer`].
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    name: &'static str,
    policy: RateLimitPolicy,
    store: Arc<dyn RateLimitStore>,
}

impl<S, B> Service<Request<B>> for RateLimitService<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let key = client_key(req.headers());
        let store = Arc::clone(&self.store);
        let policy = self.policy;
        let name = self.name;

        // The service that was driven to readiness must handle this request.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let decision = store.check(&key, &policy).await;

            if let Decision::Deny { retry_after_secs, .. } = decision {
                metrics::counter!("tenantgate_rate_limited_total", "limiter" => name).increment(1);
                debug!(limiter = name, client = %key, retry_after_secs, "rate limit exceeded");

                let mut response = GuardError::RateLimited { retry_after_secs }.into_response();
                apply_headers(response.headers_mut(), &decision);
                return Ok(response);
            }

            let mut response = inner.call(req).await?;
            apply_headers(response.headers_mut(), &decision);
            Ok(response)
        })
    }
}

fn apply_headers(headers: &mut HeaderMap, decision: &Decision) {
    let limit = HeaderValue::from(decision.limit());
    let remaining = HeaderValue::from(decision.remaining());

    match decision {
        Decision::Allow { .. } => {
            headers.entry(RATE_LIMIT_LIMIT).or_insert(limit);
            headers.entry(RATE_LIMIT_REMAINING).or_insert(remaining);
        }
        Decision::Deny {
            retry_after_secs, ..
        } => {
            headers.insert(RATE_LIMIT_LIMIT, limit);
            headers.insert(RATE_LIMIT_REMAINING, remaining);
            headers.insert(RETRY_AFTER, HeaderValue::from(*retry_after_secs));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::time::Duration;

    use axum::body::Body;
    use http::StatusCode;
    use tower::{ServiceBuilder, ServiceExt};

    use super::*;

    /// Service that answers every request with an empty 200.
    #[derive(Clone)]
    struct OkService;

    impl Service<Request<Body>> for OkService {
        type Response = Response;
        type Error = Infallible;
        type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: Request<Body>) -> Self::Future {
            Box::pin(async { Ok(Response::new(Body::empty())) })
        }
    }

    fn request_from(addr: &str) -> Request<Body> {
        Request::builder()
            .uri("/")
            .header("x-forwarded-for", addr)
            .body(Body::empty())
            .unwrap()
    }

    fn header(response: &Response, name: &HeaderName) -> String {
        response.headers()[name].to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn remaining_counts_down_then_rejects() {
        let layer = RateLimitLayer::in_memory("test", RateLimitPolicy::new(3, Duration::from_secs(60)));
        let svc = layer.layer(OkService);

        for expected in ["2", "1", "0"] {
            let response = svc.clone().oneshot(request_from("10.0.0.1")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(header(&response, &RATE_LIMIT_LIMIT), "3");
            assert_eq!(header(&response, &RATE_LIMIT_REMAINING), expected);
        }

        let response = svc.clone().oneshot(request_from("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&response, &RATE_LIMIT_REMAINING), "0");
        let retry: u64 = header(&response, &RETRY_AFTER).parse().unwrap();
        assert!(retry > 0);
    }

    #[tokio::test]
    async fn other_clients_are_unaffected() {
        let layer = RateLimitLayer::in_memory("test", RateLimitPolicy::new(1, Duration::from_secs(60)));
        let svc = layer.layer(OkService);

        assert_eq!(
            svc.clone().oneshot(request_from("10.0.0.1")).await.unwrap().status(),
            StatusCode::OK
        );
        assert_eq!(
            svc.clone().oneshot(request_from("10.0.0.1")).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            svc.clone().oneshot(request_from("10.0.0.2")).await.unwrap().status(),
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn stacked_limiters_both_apply() {
        let general = RateLimitLayer::in_memory("general", RateLimitPolicy::new(10, Duration::from_secs(60)));
        let sensitive = RateLimitLayer::in_memory("sensitive", RateLimitPolicy::new(2, Duration::from_secs(60)));
        let svc = ServiceBuilder::new()
            .layer(general.clone())
            .layer(sensitive.clone())
            .service(OkService);

        let first = svc.clone().oneshot(request_from("10.0.0.1")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        // Innermost (sensitive) headers win on success.
        assert_eq!(header(&first, &RATE_LIMIT_LIMIT), "2");
        assert_eq!(header(&first, &RATE_LIMIT_REMAINING), "1");

        let _ = svc.clone().oneshot(request_from("10.0.0.1")).await.unwrap();
        let third = svc.clone().oneshot(request_from("10.0.0.1")).await.unwrap();
        assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&third, &RATE_LIMIT_LIMIT), "2");

        // The general limiter counted all three requests.
        assert_eq!(general.store().tracked_clients(), 1);
        let probe = general
            .store()
            .check("10.0.0.1", &general.policy())
            .await;
        assert_eq!(probe.remaining(), 6);
    }

    #[tokio::test]
    async fn rejection_body_carries_code() {
        let layer = RateLimitLayer::in_memory("test", RateLimitPolicy::new(0, Duration::from_secs(60)));
        let response = layer.layer(OkService).oneshot(request_from("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "RATE_LIMITED");
        assert!(body["retry_after_secs"].as_u64().unwrap() > 0);
    }
}
