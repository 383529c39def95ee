//! Rate limiting middleware.
//!
//! Fixed-window admission control keyed by client identity. Counters live in
//! the shared [`KeyValueStore`] and are advanced with one atomic increment per
//! request, so rejected requests still count against the window.
//!
//! Known weakness: a client can burst up to twice the limit across a window
//! boundary.

use crate::auth::models::Claims;
use crate::clock::SharedClock;
use crate::store::{KeyValueStore, StoreError};
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Configuration for rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u32,
    /// Window duration.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    /// Tighter profile for credential endpoints: 10 requests per 15 minutes.
    pub fn auth() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(15 * 60),
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed {
        limit: u32,
        remaining: u32,
        /// Window end, seconds since epoch (rounded up).
        reset_at: u64,
    },
    Limited {
        limit: u32,
        /// Seconds until the window ends (at least 1).
        retry_after: u64,
        reset_at: u64,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

/// Fixed-window admission controller for one limit profile.
#[derive(Clone)]
pub struct RateLimiter {
    scope: &'static str,
    config: RateLimitConfig,
    store: Arc<dyn KeyValueStore>,
    clock: SharedClock,
}

impl RateLimiter {
    /// `scope` namespaces counters so several profiles can share one store.
    pub fn new(
        scope: &'static str,
        config: RateLimitConfig,
        store: Arc<dyn KeyValueStore>,
        clock: SharedClock,
    ) -> Self {
        Self {
            scope,
            config,
            store,
            clock,
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Count a request from `client_key` at `now_ms` and decide admission.
    pub async fn admit(&self, client_key: &str, now_ms: u64) -> Result<Admission, StoreError> {
        let key = format!("ratelimit:{}:{}", self.scope, client_key);
        let state = self
            .store
            .increment_window(&key, now_ms, self.config.window)
            .await?;

        let window_end_ms = state.window_start_ms + self.config.window.as_millis() as u64;
        let reset_at = div_ceil_1000(window_end_ms);
        let limit = self.config.max_requests;

        if state.count > limit {
            let retry_after = div_ceil_1000(window_end_ms.saturating_sub(now_ms)).max(1);
            Ok(Admission::Limited {
                limit,
                retry_after,
                reset_at,
            })
        } else {
            Ok(Admission::Allowed {
                limit,
                remaining: limit - state.count,
                reset_at,
            })
        }
    }

    /// Admission check against the injected clock.
    pub async fn check(&self, client_key: &str) -> Result<Admission, StoreError> {
        self.admit(client_key, self.clock.now_ms()).await
    }

    /// Remove windows (and other expired entries) from the backing store.
    pub async fn cleanup(&self) -> Result<usize, StoreError> {
        self.store.sweep(self.clock.now_ms()).await
    }

    /// Periodically run [`RateLimiter::cleanup`] in the background.
    pub fn spawn_cleanup(&self, every: Duration) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match limiter.cleanup().await {
                    Ok(removed) if removed > 0 => {
                        debug!(scope = limiter.scope, removed, "Rate limit sweep")
                    }
                    Ok(_) => {}
                    Err(e) => warn!(scope = limiter.scope, error = %e, "Rate limit sweep failed"),
                }
            }
        })
    }
}

fn div_ceil_1000(ms: u64) -> u64 {
    (ms + 999) / 1000
}

/// Derive the admission key for a request.
///
/// Authenticated subject first, then the first `X-Forwarded-For` entry, then
/// the peer address. The forwarded header is trusted as-is, so clients that
/// reach the service directly can spoof it.
pub fn client_key(request: &Request<Body>) -> String {
    if let Some(claims) = request.extensions().get::<Claims>() {
        return format!("user:{}", claims.sub);
    }

    if let Some(ip) = forwarded_for(request.headers()) {
        return format!("ip:{}", ip);
    }

    match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => format!("ip:{}", addr.ip()),
        None => "ip:unknown".to_string(),
    }
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn header_value(value: impl std::fmt::Display) -> HeaderValue {
    HeaderValue::try_from(value.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

/// Rate limiting middleware function.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = client_key(&request);

    let admission = match limiter.check(&key).await {
        Ok(admission) => admission,
        Err(e) => {
            error!(scope = limiter.scope, error = %e, "Rate limit check failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Rate limit check failed").into_response();
        }
    };

    match admission {
        Admission::Allowed {
            limit,
            remaining,
            reset_at,
        } => {
            let mut response = next.run(request).await;
            // An inner, tighter limiter has already reported its quota
            if response.headers().contains_key(X_RATELIMIT_LIMIT) {
                return response;
            }
            let headers = response.headers_mut();
            headers.insert(X_RATELIMIT_LIMIT, header_value(limit));
            headers.insert(X_RATELIMIT_REMAINING, header_value(remaining));
            headers.insert(X_RATELIMIT_RESET, header_value(reset_at));
            response
        }
        Admission::Limited {
            limit,
            retry_after,
            reset_at,
        } => {
            warn!(
                scope = limiter.scope,
                client = %key,
                retry_after_secs = retry_after,
                "Rate limit exceeded"
            );

            let body = serde_json::json!({
                "error": "rate_limited",
                "message": "Too many requests. Please slow down.",
                "retryAfter": retry_after,
            });

            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, header_value(retry_after));
            headers.insert(X_RATELIMIT_LIMIT, header_value(limit));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from_static("0"));
            headers.insert(X_RATELIMIT_RESET, header_value(reset_at));
            response
        }
    }
}
