//! Audit logging for security and compliance.
//!
//! Audit events are emitted twice: to the structured log (target `audit`,
//! routable to a separate sink) and to an append-only [`AuditStore`]. The
//! store is write-once: events are never mutated or deleted.

use crate::errors::StoreError;
use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Outcome of an audited action.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    /// Action completed successfully
    Success,
    /// Action failed (e.g., validation error, system error)
    Failure,
    /// Action was denied (e.g., insufficient permissions)
    Denied,
}

/// Structured audit event.
///
/// Use the builder pattern to construct events with optional fields, then
/// call `.log()` to emit to the audit log and/or persist via an AuditStore.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Caller who performed the action (if authenticated)
    pub actor: Option<String>,
    /// Action performed (e.g., "notification.enqueue", "webhook.receive")
    pub action: String,
    /// Kind of resource affected (e.g., "notification", "suppression")
    pub resource_type: Option<String>,
    /// Identifier of the affected resource
    pub resource_id: Option<String>,
    /// Outcome of the action
    pub outcome: AuditOutcome,
    /// Client IP address
    pub ip_address: Option<String>,
    /// User agent string
    pub user_agent: Option<String>,
    /// Timestamp when the event occurred
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    /// Additional details about the event (JSON)
    pub details: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(actor: Option<String>, action: impl Into<String>, outcome: AuditOutcome) -> Self {
        Self {
            actor,
            action: action.into(),
            resource_type: None,
            resource_id: None,
            outcome,
            ip_address: None,
            user_agent: None,
            timestamp: Utc::now(),
            details: None,
        }
    }

    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_ip(mut self, ip: Option<String>) -> Self {
        self.ip_address = ip;
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    /// Add additional details to the audit event (serialized to JSON).
    pub fn with_details(mut self, details: impl Serialize) -> Self {
        self.details = serde_json::to_value(details).ok();
        self
    }

    /// Emit the audit event to the audit log.
    ///
    /// Logs to the "audit" target with structured fields; configure the
    /// logging backend to route these to a dedicated file/system.
    pub fn log(&self) {
        tracing::info!(
            target: "audit",
            actor = self.actor,
            action = %self.action,
            resource_type = self.resource_type,
            resource_id = self.resource_id,
            outcome = ?self.outcome,
            ip = self.ip_address,
            user_agent = self.user_agent,
            timestamp = %self.timestamp,
            details = ?self.details,
            "{}",
            serde_json::to_string(self)
                .unwrap_or_else(|_| "Failed to serialize audit event".to_string())
        );
    }
}

/// Append-only persistence for audit events.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, event: AuditEvent) -> Result<(), StoreError>;
}

/// In-memory append-only audit store.
#[derive(Default)]
pub struct InMemoryAuditStore {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events (for tests and offline inspection).
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, event: AuditEvent) -> Result<(), StoreError> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

/// Audit sink combining the structured log with a persistent store.
///
/// A failure to persist must never fail the audited request; it is logged
/// as a non-fatal warning instead.
#[derive(Clone)]
pub struct AuditSink {
    store: Arc<dyn AuditStore>,
}

impl AuditSink {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, event: AuditEvent) {
        event.log();
        if let Err(e) = self.store.append(event).await {
            tracing::warn!(error = %e, "Failed to persist audit event");
        }
    }
}

/// Audit middleware.
///
/// Writes an audit event after the wrapped operation completes, success or
/// failure. The event carries the caller (when authenticated), method, path,
/// outcome derived from the response status, and the correlation id.
pub async fn audit_middleware(
    axum::extract::State(sink): axum::extract::State<AuditSink>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let actor = request
        .extensions()
        .get::<crate::auth::Claims>()
        .map(|c| c.sub.clone());
    let correlation_id = request
        .extensions()
        .get::<crate::http::CorrelationId>()
        .map(|c| c.0.clone());
    let ip = extract_ip_from_headers(request.headers());
    let user_agent = extract_user_agent(request.headers());

    let response = next.run(request).await;

    let status = response.status();
    let outcome = if status.is_success() || status.is_redirection() {
        AuditOutcome::Success
    } else if status == axum::http::StatusCode::UNAUTHORIZED
        || status == axum::http::StatusCode::FORBIDDEN
    {
        AuditOutcome::Denied
    } else {
        AuditOutcome::Failure
    };

    let event = AuditEvent::new(actor, format!("{} {}", method, path), outcome)
        .with_ip(ip)
        .with_user_agent(user_agent)
        .with_details(serde_json::json!({
            "status": status.as_u16(),
            "correlation_id": correlation_id,
        }));

    sink.record(event).await;
    response
}

/// Extract client IP address from HTTP headers.
///
/// Checks X-Forwarded-For and X-Real-IP headers to get the real client IP
/// when behind a proxy or load balancer.
pub fn extract_ip_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
}

/// Extract user agent string from HTTP headers.
pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("10.0.0.1, 10.0.0.2"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(extract_ip_from_headers(&headers), Some("10.0.0.1".into()));
    }

    #[test]
    fn test_extract_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(extract_ip_from_headers(&headers), Some("10.0.0.9".into()));
    }

    #[tokio::test]
    async fn test_store_is_append_only() {
        let store = InMemoryAuditStore::new();
        store
            .append(AuditEvent::new(
                Some("tester".into()),
                "notification.enqueue",
                AuditOutcome::Success,
            ))
            .await
            .unwrap();
        store
            .append(AuditEvent::new(None, "webhook.receive", AuditOutcome::Failure))
            .await
            .unwrap();

        let events = store.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, "notification.enqueue");
        assert_eq!(events[1].outcome, AuditOutcome::Failure);
    }

    #[test]
    fn test_builder_fields() {
        let event = AuditEvent::new(Some("admin".into()), "suppression.remove", AuditOutcome::Success)
            .with_resource("suppression", "user@example.com")
            .with_details(serde_json::json!({"source": "admin-api"}));
        assert_eq!(event.resource_type.as_deref(), Some("suppression"));
        assert_eq!(event.resource_id.as_deref(), Some("user@example.com"));
        assert!(event.details.is_some());
    }
}
