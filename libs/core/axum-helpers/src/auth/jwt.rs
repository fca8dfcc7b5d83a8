use super::config::JwtConfig;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default token time-to-live in seconds (1 hour)
pub const ACCESS_TOKEN_TTL: i64 = 3600;

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,        // Subject (caller identity)
    pub roles: Vec<String>, // Caller roles
    pub exp: i64,           // Expiration time
    pub iat: i64,           // Issued at
    pub jti: String,        // Token ID
}

impl Claims {
    /// Check whether the caller holds any of the given roles.
    pub fn has_any_role(&self, allowed: &[String]) -> bool {
        self.roles.iter().any(|r| allowed.contains(r))
    }
}

/// Stateless bearer-token authentication backed by HS256 JWTs.
#[derive(Clone)]
pub struct BearerAuth {
    secret: String,
}

impl BearerAuth {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            secret: config.secret.clone(),
        }
    }

    /// Create a token for the given caller (default TTL).
    pub fn create_token(&self, subject: &str, roles: &[String]) -> jsonwebtoken::errors::Result<String> {
        self.create_token_with_ttl(subject, roles, ACCESS_TOKEN_TTL)
    }

    /// Create a token with an explicit TTL in seconds.
    pub fn create_token_with_ttl(
        &self,
        subject: &str,
        roles: &[String],
        ttl_seconds: i64,
    ) -> jsonwebtoken::errors::Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            roles: roles.to_vec(),
            exp: (now + Duration::seconds(ttl_seconds)).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let header = Header {
            alg: jsonwebtoken::Algorithm::HS256,
            ..Default::default()
        };

        encode(
            &header,
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
    }

    /// Verify token signature and expiry, returning the decoded claims.
    pub fn verify_token(&self, token: &str) -> jsonwebtoken::errors::Result<Claims> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )?;

        Ok(token_data.claims)
    }
}
