//! Environment-driven configuration for the relay API.

use axum_helpers::JwtConfig;
use core_config::server::ServerConfig;
use core_config::{env_optional, env_or_default, ConfigError, Environment, FromEnv};
use domain_notifications::{EmailProviderConfig, SmsProviderConfig};

fn csv(value: String) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_u32(key: &str, default: &str) -> Result<u32, ConfigError> {
    env_or_default(key, default)
        .parse()
        .map_err(|e| ConfigError::ParseError {
            key: key.to_string(),
            details: format!("{}", e),
        })
}

#[derive(Clone, Debug)]
pub struct Config {
    pub environment: Environment,
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    /// Roles allowed on the authenticated API surface.
    pub allowed_roles: Vec<String>,
    /// Roles exempt from rate limiting.
    pub rate_limit_exempt_roles: Vec<String>,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_secs: u32,
    /// Exact origin allowed by CORS; unset means permissive (development).
    pub cors_origin: Option<String>,
    /// Shared secret providers sign callbacks with; unset runs permissive.
    pub webhook_secret: Option<String>,
    /// Public base URL callbacks are signed against.
    pub callback_base_url: String,
    pub email: EmailProviderConfig,
    pub sms: SmsProviderConfig,
}

impl FromEnv for Config {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            environment: Environment::from_env(),
            server: ServerConfig::from_env()?,
            jwt: JwtConfig::from_env()?,
            allowed_roles: csv(env_or_default("API_ALLOWED_ROLES", "staff,admin,scheduler")),
            rate_limit_exempt_roles: csv(env_or_default("RATE_LIMIT_EXEMPT_ROLES", "admin")),
            rate_limit_max_requests: parse_u32("RATE_LIMIT_MAX_REQUESTS", "60")?,
            rate_limit_window_secs: parse_u32("RATE_LIMIT_WINDOW_SECS", "60")?,
            cors_origin: env_optional("CORS_ORIGIN"),
            webhook_secret: env_optional("WEBHOOK_SECRET"),
            callback_base_url: env_or_default("CALLBACK_BASE_URL", "http://localhost:8080"),
            email: EmailProviderConfig::from_env()?,
            sms: SmsProviderConfig::from_env()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JWT: &str = "a-test-secret-that-is-long-enough-123456";

    #[test]
    fn test_config_defaults() {
        temp_env::with_vars(
            [
                ("JWT_SECRET", Some(JWT)),
                ("WEBHOOK_SECRET", None),
                ("CORS_ORIGIN", None),
                ("RATE_LIMIT_MAX_REQUESTS", None),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.rate_limit_max_requests, 60);
                assert_eq!(config.rate_limit_window_secs, 60);
                assert!(config.webhook_secret.is_none());
                assert!(config.cors_origin.is_none());
                assert_eq!(
                    config.allowed_roles,
                    vec!["staff", "admin", "scheduler"]
                );
            },
        );
    }

    #[test]
    fn test_config_requires_jwt_secret() {
        temp_env::with_var_unset("JWT_SECRET", || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn test_config_rejects_bad_rate_limit() {
        temp_env::with_vars(
            [
                ("JWT_SECRET", Some(JWT)),
                ("RATE_LIMIT_MAX_REQUESTS", Some("lots")),
            ],
            || {
                assert!(Config::from_env().is_err());
            },
        );
    }

    #[test]
    fn test_csv_parsing_trims_and_drops_empties() {
        assert_eq!(
            csv("staff, admin,,scheduler ".to_string()),
            vec!["staff", "admin", "scheduler"]
        );
    }
}
