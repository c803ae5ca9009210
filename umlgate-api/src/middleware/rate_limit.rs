//! Per-client rate limiting.
//!
//! Each client gets a GCRA limiter from `governor` that allows `max` requests
//! at once and refills one request every `window / max`. This is a smoothed
//! version of "max per window": a client that drains its burst waits
//! `window / max` for each further request, but across a window boundary a
//! burst followed by steady refills can reach up to `2 * max` requests in any
//! sliding `window`, the same worst case a fixed-window counter has at its
//! edge.
//!
//! Clients are keyed by socket address. Proxy headers are only consulted when
//! `trust_proxy_headers` is set, otherwise any caller could pick its own key.
//! Limiters idle for a full window are swept out, since their budget would be
//! full again anyway.

use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use governor::{clock::DefaultClock, Quota, RateLimiter};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::constants::RATE_LIMIT_PRUNE_EVERY;
use crate::error::ApiError;

type DirectRateLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

/// Who a request is counted against.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum RateLimitKey {
    Ip(IpAddr),
    /// No trusted header and no socket address (in-process callers).
    Unknown,
}

struct ClientLimiter {
    limiter: DirectRateLimiter,
    last_seen: Mutex<Instant>,
}

/// State for rate limiting middleware.
#[derive(Clone)]
pub struct RateLimitState {
    enabled: bool,
    trust_proxy_headers: bool,
    quota: Quota,
    limit: u32,
    window: Duration,
    limiters: Arc<DashMap<RateLimitKey, Arc<ClientLimiter>>>,
    requests: Arc<AtomicU64>,
}

impl RateLimitState {
    /// `rate_limit_max` requests per `rate_limit_window`, all usable as a burst.
    pub fn new(config: &ApiConfig) -> Self {
        let max = NonZeroU32::new(config.rate_limit_max).unwrap_or(NonZeroU32::MIN);
        let period = config.rate_limit_window / max.get();
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_minute(max))
            .allow_burst(max);

        Self {
            enabled: config.rate_limit_enabled,
            trust_proxy_headers: config.trust_proxy_headers,
            quota,
            limit: max.get(),
            window: config.rate_limit_window,
            limiters: Arc::new(DashMap::new()),
            requests: Arc::new(AtomicU64::new(0)),
        }
    }

    fn client(&self, key: &RateLimitKey) -> Arc<ClientLimiter> {
        self.limiters
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(ClientLimiter {
                    limiter: RateLimiter::direct(self.quota),
                    last_seen: Mutex::new(Instant::now()),
                })
            })
            .clone()
    }

    /// Count one request against `key`. On rejection returns how long the
    /// client has to wait.
    fn check(&self, key: &RateLimitKey) -> Result<(), Duration> {
        if self.requests.fetch_add(1, Ordering::Relaxed) % RATE_LIMIT_PRUNE_EVERY
            == RATE_LIMIT_PRUNE_EVERY - 1
        {
            self.prune_idle();
        }

        let client = self.client(key);
        *client.last_seen.lock() = Instant::now();
        client.limiter.check().map_err(|not_until| {
            not_until.wait_time_from(governor::clock::Clock::now(&DefaultClock::default()))
        })
    }

    /// Drop limiters for clients not seen for a full window.
    pub fn prune_idle(&self) -> usize {
        self.prune_idle_at(Instant::now())
    }

    /// Drop limiters for clients not seen for a full window before `now`.
    pub fn prune_idle_at(&self, now: Instant) -> usize {
        let before = self.limiters.len();
        self.limiters
            .retain(|_, client| now.saturating_duration_since(*client.last_seen.lock()) < self.window);
        self.limiters.shrink_to_fit();

        let removed = before.saturating_sub(self.limiters.len());
        if removed > 0 {
            debug!(removed, remaining = self.limiters.len(), "Pruned idle rate limiters");
        }
        removed
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.limiters.len()
    }
}

/// Client IP from the socket address, or from proxy headers when trusted.
fn client_key(request: &Request, trust_proxy_headers: bool) -> RateLimitKey {
    if trust_proxy_headers {
        let headers = request.headers();
        if let Some(first) = headers
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.split(',').next())
        {
            if let Ok(ip) = first.trim().parse() {
                return RateLimitKey::Ip(ip);
            }
        }

        if let Some(ip) = headers
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
        {
            return RateLimitKey::Ip(ip);
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| RateLimitKey::Ip(addr.ip()))
        .unwrap_or(RateLimitKey::Unknown)
}

/// Reject with 429 and `retry-after` once a client exhausts its budget.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.enabled {
        return next.run(request).await;
    }

    let key = client_key(&request, state.trust_proxy_headers);
    match state.check(&key) {
        Ok(()) => {
            let mut response = next.run(request).await;
            if let Ok(limit) = HeaderValue::from_str(&state.limit.to_string()) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static("x-ratelimit-limit"), limit);
            }
            response
        }
        Err(wait) => {
            let retry_after = wait.as_secs().max(1);
            warn!(client = ?key, retry_after, "Rate limit exceeded");

            let mut response = ApiError::too_many_requests(retry_after).into_response();
            response.headers_mut().insert(
                HeaderName::from_static("retry-after"),
                HeaderValue::from_str(&retry_after.to_string())
                    .unwrap_or_else(|_| HeaderValue::from_static("60")),
            );
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app(config: &ApiConfig) -> (Router, RateLimitState) {
        let state = RateLimitState::new(config);
        let router = Router::new()
            .route("/analyze", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware));
        (router, state)
    }

    fn trusted(max: u32, window: Duration) -> ApiConfig {
        ApiConfig::default()
            .with_rate_limit(max, window)
            .with_trusted_proxy_headers()
    }

    fn from(ip: &str) -> axum::http::Request<Body> {
        axum::http::Request::get("/analyze")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    async fn status(app: &Router, ip: &str) -> StatusCode {
        app.clone().oneshot(from(ip)).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_requests_over_budget_get_429() {
        let (app, _) = app(&trusted(2, Duration::from_secs(60)));

        for _ in 0..2 {
            let response = app.clone().oneshot(from("10.0.0.1")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()["x-ratelimit-limit"], "2");
        }

        let response = app.clone().oneshot(from("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = response.headers()["retry-after"].to_str().unwrap().parse().unwrap();
        assert!((29..=30).contains(&retry_after));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["type"], "RATE_LIMIT");
    }

    #[tokio::test]
    async fn test_drained_budget_refills_one_request_per_interval() {
        // 2 per 400ms: one request comes back every 200ms, not the whole burst.
        let (app, _) = app(&trusted(2, Duration::from_millis(400)));

        assert_eq!(status(&app, "10.0.0.1").await, StatusCode::OK);
        assert_eq!(status(&app, "10.0.0.1").await, StatusCode::OK);
        assert_eq!(status(&app, "10.0.0.1").await, StatusCode::TOO_MANY_REQUESTS);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(status(&app, "10.0.0.1").await, StatusCode::OK);
        assert_eq!(status(&app, "10.0.0.1").await, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_clients_are_counted_separately() {
        let (app, state) = app(&trusted(1, Duration::from_secs(60)));

        assert_eq!(status(&app, "10.0.0.1").await, StatusCode::OK);
        assert_eq!(status(&app, "10.0.0.2").await, StatusCode::OK);
        assert_eq!(status(&app, "10.0.0.1").await, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(state.tracked_clients(), 2);
    }

    #[tokio::test]
    async fn test_forwarded_headers_are_ignored_unless_trusted() {
        let config = ApiConfig::default().with_rate_limit(1, Duration::from_secs(60));
        let (app, state) = app(&config);

        assert_eq!(status(&app, "10.0.0.1").await, StatusCode::OK);
        for n in 2..20 {
            assert_eq!(
                status(&app, &format!("10.0.0.{}", n)).await,
                StatusCode::TOO_MANY_REQUESTS
            );
        }
        assert_eq!(state.tracked_clients(), 1);
    }

    #[tokio::test]
    async fn test_idle_clients_are_pruned() {
        let window = Duration::from_secs(1);
        let (app, state) = app(&trusted(1, window));

        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            assert_eq!(status(&app, ip).await, StatusCode::OK);
        }
        assert_eq!(state.tracked_clients(), 3);

        assert_eq!(state.prune_idle_at(Instant::now()), 0);
        assert_eq!(state.tracked_clients(), 3);

        assert_eq!(state.prune_idle_at(Instant::now() + window * 2), 3);
        assert_eq!(state.tracked_clients(), 0);
    }

    #[tokio::test]
    async fn test_disabled_limiter_passes_everything() {
        let config = trusted(1, Duration::from_secs(60)).without_rate_limit();
        let (app, state) = app(&config);
        for _ in 0..5 {
            assert_eq!(status(&app, "10.0.0.1").await, StatusCode::OK);
        }
        assert_eq!(state.tracked_clients(), 0);
    }

    #[test]
    fn test_client_key_precedence() {
        let socket: SocketAddr = "192.0.2.7:40000".parse().unwrap();
        let mut request = axum::http::Request::get("/")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .header("x-real-ip", "198.51.100.1")
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(ConnectInfo(socket));
        assert_eq!(client_key(&request, true), RateLimitKey::Ip("203.0.113.9".parse().unwrap()));
        assert_eq!(client_key(&request, false), RateLimitKey::Ip(socket.ip()));

        let request = axum::http::Request::get("/")
            .header("x-real-ip", "198.51.100.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_key(&request, true), RateLimitKey::Ip("198.51.100.1".parse().unwrap()));
        assert_eq!(client_key(&request, false), RateLimitKey::Unknown);

        let request = axum::http::Request::get("/").body(Body::empty()).unwrap();
        assert_eq!(client_key(&request, true), RateLimitKey::Unknown);
    }
}
