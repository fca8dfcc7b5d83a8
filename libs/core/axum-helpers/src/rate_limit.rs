//! Fixed-window rate limiting keyed by caller + route.
//!
//! Windows are lazily created and logically expire once `now` passes
//! `window_end`; the next request starts a fresh window. The store's
//! increment-and-check is a single atomic read-modify-write so concurrent
//! requests sharing a key cannot both sneak under the limit.

use crate::auth::Claims;
use crate::errors::{AppError, StoreError};
use crate::http::client_identity;
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Response header carrying the remaining request budget for the window.
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// One time-boxed request counter.
#[derive(Debug, Clone)]
pub struct RateLimitWindow {
    pub key: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub current_count: u32,
    pub max_allowed: u32,
}

impl RateLimitWindow {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.window_end
    }
}

/// Outcome of an increment-and-check.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
}

/// Store for rate-limit windows.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically increment the window for `key` and report whether the
    /// request is within budget.
    async fn increment_and_check(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        max_allowed: u32,
    ) -> Result<RateLimitDecision, StoreError>;
}

/// In-memory implementation of RateLimitStore (single-lock atomicity).
#[derive(Default)]
pub struct InMemoryRateLimitStore {
    windows: Mutex<HashMap<String, RateLimitWindow>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn increment_and_check(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        max_allowed: u32,
    ) -> Result<RateLimitDecision, StoreError> {
        let mut windows = self.windows.lock().await;

        let entry = windows.get(key).filter(|w| !w.is_expired(now));
        let current = match entry {
            Some(w) => {
                let count = w.current_count + 1;
                let mut w = w.clone();
                w.current_count = count;
                windows.insert(key.to_string(), w);
                count
            }
            None => {
                windows.insert(
                    key.to_string(),
                    RateLimitWindow {
                        key: key.to_string(),
                        window_start: now,
                        window_end: now + window,
                        current_count: 1,
                        max_allowed,
                    },
                );
                1
            }
        };

        Ok(RateLimitDecision {
            allowed: current <= max_allowed,
            remaining: max_allowed.saturating_sub(current),
        })
    }
}

/// Shared state for the rate-limit middleware.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    max_requests: u32,
    window: Duration,
    exempt_roles: Arc<Vec<String>>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, max_requests: u32, window: Duration) -> Self {
        Self {
            store,
            max_requests,
            window,
            exempt_roles: Arc::new(Vec::new()),
        }
    }

    /// Roles whose callers bypass rate limiting entirely.
    pub fn with_exempt_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exempt_roles = Arc::new(roles.into_iter().map(Into::into).collect());
        self
    }
}

/// Rate-limit middleware.
///
/// The window identity is caller + route: the authenticated subject when
/// present, otherwise the client IP. Responses carry the remaining budget in
/// `x-ratelimit-remaining`.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(claims) = request.extensions().get::<Claims>() {
        if claims.has_any_role(&limiter.exempt_roles) {
            return Ok(next.run(request).await);
        }
    }

    let caller = request
        .extensions()
        .get::<Claims>()
        .map(|c| c.sub.clone())
        .unwrap_or_else(|| client_identity(request.headers()));
    let key = format!("{}:{}", caller, request.uri().path());

    let decision = limiter
        .store
        .increment_and_check(&key, Utc::now(), limiter.window, limiter.max_requests)
        .await?;

    if !decision.allowed {
        tracing::info!(key = %key, "Rate limit exceeded");
        let mut response = AppError::RateLimitExceeded.into_response();
        response.headers_mut().insert(
            RATE_LIMIT_REMAINING_HEADER,
            HeaderValue::from_static("0"),
        );
        return Ok(response);
    }

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        response
            .headers_mut()
            .insert(RATE_LIMIT_REMAINING_HEADER, value);
    }
    Ok(response)
}
