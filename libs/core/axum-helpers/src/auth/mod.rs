//! Bearer-token authentication and role authorization.
//!
//! Stateless HS256 JWT verification with claims propagated through request
//! extensions, plus an allowed-role middleware for operations restricted to
//! specific caller roles.

pub mod config;
pub mod jwt;
pub mod middleware;

pub use config::JwtConfig;
pub use jwt::{BearerAuth, Claims, ACCESS_TOKEN_TTL};
pub use middleware::{auth_middleware, require_role_middleware, AllowedRoles};
