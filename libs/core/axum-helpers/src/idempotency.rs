//! Idempotent-replay support for externally invoked operations.
//!
//! A request carrying an `Idempotency-Key` header is fingerprinted
//! (SHA-256 of method + path + body). The first request with a given key
//! executes and its response is persisted before it is returned; a later
//! request with the same key and fingerprint receives the stored response
//! verbatim, marked as a replay. The same key with a different fingerprint
//! is a conflict, not a replay. Two simultaneous requests sharing a key
//! never both execute: the store's begin operation atomically claims the
//! key, and the loser observes a conflict.

use crate::errors::{AppError, StoreError};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Header carrying the client-supplied idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Response header marking whether a response was served from the store.
pub const REPLAY_HEADER: &str = "x-idempotent-replay";

/// Largest request/response body the middleware will buffer.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// A stored response, replayed byte-identically on duplicate requests.
#[derive(Debug, Clone)]
pub struct StoredResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

/// One idempotency record: key, request fingerprint, and (once the wrapped
/// operation finishes) the captured response.
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub key: String,
    pub fingerprint: String,
    pub response: Option<StoredResponse>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Outcome of atomically claiming an idempotency key.
#[derive(Debug)]
pub enum IdempotencyBegin {
    /// Key unseen (or expired): the caller should execute the operation.
    Fresh,
    /// Key and fingerprint match a completed record: return it verbatim.
    Replay(StoredResponse),
    /// Key matches but the fingerprint differs.
    Conflict,
    /// Key matches a request still executing.
    InFlight,
}

/// Store for idempotency records.
///
/// `begin` must be an atomic read-modify-write: under concurrent requests
/// sharing a key, at most one observes `Fresh`.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn begin(
        &self,
        key: &str,
        fingerprint: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<IdempotencyBegin, StoreError>;

    /// Persist the captured response for a key previously claimed via `begin`.
    async fn complete(&self, key: &str, response: StoredResponse) -> Result<(), StoreError>;

    /// Release a claimed key without a response (e.g., body capture failed),
    /// so a retry is not locked out forever.
    async fn abandon(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory implementation of IdempotencyStore.
///
/// A single lock around the map makes begin/complete atomic; a durable
/// deployment backs the same trait with the shared ledger.
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<String, IdempotencyRecord>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn begin(
        &self,
        key: &str,
        fingerprint: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<IdempotencyBegin, StoreError> {
        let mut records = self.records.lock().await;

        if let Some(existing) = records.get(key) {
            if existing.is_live(now) {
                if existing.fingerprint != fingerprint {
                    return Ok(IdempotencyBegin::Conflict);
                }
                return Ok(match &existing.response {
                    Some(response) => IdempotencyBegin::Replay(response.clone()),
                    None => IdempotencyBegin::InFlight,
                });
            }
            // Expired record: the key is free again.
            records.remove(key);
        }

        records.insert(
            key.to_string(),
            IdempotencyRecord {
                key: key.to_string(),
                fingerprint: fingerprint.to_string(),
                response: None,
                created_at: now,
                expires_at: now + ttl,
            },
        );

        Ok(IdempotencyBegin::Fresh)
    }

    async fn complete(&self, key: &str, response: StoredResponse) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(key)
            .ok_or_else(|| StoreError(format!("no in-flight idempotency record for '{}'", key)))?;
        record.response = Some(response);
        Ok(())
    }

    async fn abandon(&self, key: &str) -> Result<(), StoreError> {
        self.records.lock().await.remove(key);
        Ok(())
    }
}

/// Compute the request fingerprint: SHA-256 over method, path and raw body.
pub fn request_fingerprint(method: &Method, path: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(path.as_bytes());
    hasher.update(b"\n");
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Shared state for the idempotency middleware.
#[derive(Clone)]
pub struct IdempotencyLayer {
    store: Arc<dyn IdempotencyStore>,
    ttl: Duration,
}

impl IdempotencyLayer {
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            store,
            ttl: Duration::hours(24),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn store(&self) -> Arc<dyn IdempotencyStore> {
        Arc::clone(&self.store)
    }
}

/// Idempotency middleware.
///
/// Requests without an `Idempotency-Key` header pass straight through.
/// Keyed requests are fingerprinted and checked against the store; replays
/// skip execution entirely and return the stored response.
pub async fn idempotency_middleware(
    State(layer): State<IdempotencyLayer>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = match request
        .headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    {
        Some(k) if !k.is_empty() => k,
        _ => return Ok(next.run(request).await),
    };

    let (parts, body) = request.into_parts();
    let body_bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read request body: {}", e)))?;

    let fingerprint = request_fingerprint(&parts.method, parts.uri.path(), &body_bytes);

    let begin = layer
        .store
        .begin(&key, &fingerprint, Utc::now(), layer.ttl)
        .await
        .map_err(|e| AppError::Internal(format!("Idempotency store error: {}", e)))?;

    match begin {
        IdempotencyBegin::Replay(stored) => {
            tracing::debug!(key = %key, "Replaying stored idempotent response");
            Ok(replay_response(&stored, true))
        }
        IdempotencyBegin::Conflict => Err(AppError::IdempotencyConflict(format!(
            "Idempotency key '{}' was already used with a different request",
            key
        ))),
        IdempotencyBegin::InFlight => Err(AppError::IdempotencyConflict(format!(
            "A request with idempotency key '{}' is still executing",
            key
        ))),
        IdempotencyBegin::Fresh => {
            let request = Request::from_parts(parts, Body::from(body_bytes));
            let response = next.run(request).await;

            let (mut resp_parts, resp_body) = response.into_parts();
            let resp_bytes = match to_bytes(resp_body, MAX_BODY_BYTES).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    // Release the claim rather than wedging the key on a
                    // response we could not capture.
                    tracing::warn!(key = %key, error = %e, "Failed to buffer response for idempotency store");
                    if let Err(e) = layer.store.abandon(&key).await {
                        tracing::warn!(key = %key, error = %e, "Failed to abandon idempotency claim");
                    }
                    return Err(AppError::Internal("Failed to capture response".to_string()));
                }
            };

            let stored = StoredResponse {
                status: resp_parts.status.as_u16(),
                body: resp_bytes.to_vec(),
                content_type: resp_parts
                    .headers
                    .get(axum::http::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
            };

            // Persist before returning to the caller.
            if let Err(e) = layer.store.complete(&key, stored).await {
                tracing::warn!(key = %key, error = %e, "Failed to persist idempotent response");
            }

            resp_parts
                .headers
                .insert(REPLAY_HEADER, HeaderValue::from_static("false"));
            Ok(Response::from_parts(resp_parts, Body::from(resp_bytes)))
        }
    }
}

fn replay_response(stored: &StoredResponse, replayed: bool) -> Response {
    let mut response = (
        axum::http::StatusCode::from_u16(stored.status)
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR),
        stored.body.clone(),
    )
        .into_response();

    if let Some(content_type) = &stored.content_type {
        if let Ok(value) = HeaderValue::from_str(content_type) {
            response
                .headers_mut()
                .insert(axum::http::header::CONTENT_TYPE, value);
        }
    }
    response.headers_mut().insert(
        REPLAY_HEADER,
        HeaderValue::from_static(if replayed { "true" } else { "false" }),
    );
    response
}
