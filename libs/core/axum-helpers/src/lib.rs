//! # Axum Helpers
//!
//! Request-security middleware and helpers shared by externally invoked
//! operations: every inbound request passes through the same pipeline of
//! CORS, correlation-id propagation, bearer authentication, role
//! authorization, idempotent replay, rate limiting and audit logging, and
//! every error leaves through one uniform envelope.
//!
//! ## Modules
//!
//! - **[`auth`]**: bearer JWT authentication and role authorization
//! - **[`idempotency`]**: idempotency-key replay/conflict handling
//! - **[`rate_limit`]**: fixed-window rate limiting keyed caller+route
//! - **[`audit`]**: audit events, append-only store, audit middleware
//! - **[`errors`]**: `AppError` and the `{"error":{"code","message"}}` envelope
//! - **[`extractors`]**: validated JSON extraction
//! - **[`http`]**: CORS and correlation-id middleware
//! - **[`shutdown`]**: graceful-shutdown coordination

pub mod audit;
pub mod auth;
pub mod errors;
pub mod extractors;
pub mod http;
pub mod idempotency;
pub mod rate_limit;
pub mod shutdown;

// Re-export auth types
pub use auth::{
    auth_middleware, require_role_middleware, AllowedRoles, BearerAuth, Claims, JwtConfig,
    ACCESS_TOKEN_TTL,
};

// Re-export error types
pub use errors::{AppError, ErrorBody, ErrorEnvelope, StoreError};

// Re-export extractors
pub use extractors::ValidatedJson;

// Re-export audit types
pub use audit::{
    audit_middleware, extract_ip_from_headers, extract_user_agent, AuditEvent, AuditOutcome,
    AuditSink, AuditStore, InMemoryAuditStore,
};

// Re-export idempotency types
pub use idempotency::{
    idempotency_middleware, IdempotencyLayer, IdempotencyStore, InMemoryIdempotencyStore,
    IDEMPOTENCY_KEY_HEADER, REPLAY_HEADER,
};

// Re-export rate limit types
pub use rate_limit::{
    rate_limit_middleware, InMemoryRateLimitStore, RateLimitStore, RateLimitWindow, RateLimiter,
    RATE_LIMIT_REMAINING_HEADER,
};

// Re-export HTTP middleware
pub use http::{
    correlation_middleware, create_cors_layer, create_permissive_cors_layer, CorrelationId,
    CORRELATION_ID_HEADER,
};

// Re-export shutdown coordination
pub use shutdown::ShutdownCoordinator;
