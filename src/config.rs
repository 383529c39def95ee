//! Service Configuration
//! Mission: Load signing, TTL and rate-limit settings from the environment

use crate::middleware::rate_limit::RateLimitConfig;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Minimum accepted HMAC secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("signing key misconfigured: {0}")]
    SigningMisconfigured(String),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub auth_db_path: String,
    pub jwt_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub bcrypt_cost: u32,
    pub global_rate_limit: RateLimitConfig,
    pub auth_rate_limit: RateLimitConfig,
    pub sweep_interval: Duration,
    pub meta_graph_url: String,
}

impl AppConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read configuration through an arbitrary lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("JWT_SECRET").unwrap_or_default();
        validate_secret(&jwt_secret)?;

        let port = parse_or(&lookup, "PORT", 3000u16)?;
        let auth_db_path =
            lookup("AUTH_DB_PATH").unwrap_or_else(|| "gatekeeper_auth.db".to_string());

        let access_secs = parse_or(&lookup, "ACCESS_TOKEN_TTL_SECS", 3600u64)?;
        let refresh_days = parse_or(&lookup, "REFRESH_TOKEN_TTL_DAYS", 30u64)?;
        let refresh_secs = refresh_days
            .checked_mul(24 * 3600)
            .ok_or_else(|| ConfigError::Invalid {
                key: "REFRESH_TOKEN_TTL_DAYS",
                value: refresh_days.to_string(),
            })?;

        let bcrypt_cost = parse_or(&lookup, "BCRYPT_COST", bcrypt::DEFAULT_COST)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::Invalid {
                key: "BCRYPT_COST",
                value: bcrypt_cost.to_string(),
            });
        }

        let global_rate_limit = RateLimitConfig {
            max_requests: parse_or(&lookup, "RATE_LIMIT_MAX", 100u32)?,
            window: Duration::from_millis(parse_or(&lookup, "RATE_LIMIT_WINDOW_MS", 60_000u64)?),
        };
        let auth_rate_limit = RateLimitConfig {
            max_requests: parse_or(&lookup, "AUTH_RATE_LIMIT_MAX", 10u32)?,
            window: Duration::from_millis(parse_or(
                &lookup,
                "AUTH_RATE_LIMIT_WINDOW_MS",
                900_000u64,
            )?),
        };

        let sweep_interval = Duration::from_secs(parse_or(&lookup, "RATE_LIMIT_SWEEP_SECS", 60u64)?);
        let meta_graph_url = lookup("META_GRAPH_URL")
            .unwrap_or_else(|| "https://graph.facebook.com/me".to_string());

        Ok(Self {
            port,
            auth_db_path,
            jwt_secret,
            access_token_ttl: Duration::from_secs(access_secs),
            refresh_token_ttl: Duration::from_secs(refresh_secs),
            bcrypt_cost,
            global_rate_limit,
            auth_rate_limit,
            sweep_interval,
            meta_graph_url,
        })
    }
}

/// Reject missing or short HMAC secrets.
pub fn validate_secret(secret: &str) -> Result<(), ConfigError> {
    if secret.trim().is_empty() {
        return Err(ConfigError::SigningMisconfigured(
            "JWT_SECRET is not set".to_string(),
        ));
    }
    if secret.len() < MIN_SECRET_LEN {
        return Err(ConfigError::SigningMisconfigured(format!(
            "JWT_SECRET must be at least {} bytes",
            MIN_SECRET_LEN
        )));
    }
    Ok(())
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &str = "test-secret-key-with-at-least-32-bytes!";

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&[("JWT_SECRET", SECRET)])).unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.access_token_ttl, Duration::from_secs(3600));
        assert_eq!(config.refresh_token_ttl, Duration::from_secs(30 * 24 * 3600));
        assert_eq!(config.global_rate_limit.max_requests, 100);
        assert_eq!(config.global_rate_limit.window, Duration::from_secs(60));
        assert_eq!(config.auth_rate_limit.max_requests, 10);
        assert_eq!(config.auth_rate_limit.window, Duration::from_secs(15 * 60));
    }

    #[test]
    fn test_missing_secret_is_fatal() {
        let err = AppConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::SigningMisconfigured(_)));

        let err = AppConfig::from_lookup(lookup_from(&[("JWT_SECRET", "short")])).unwrap_err();
        assert!(matches!(err, ConfigError::SigningMisconfigured(_)));
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", SECRET),
            ("RATE_LIMIT_MAX", "10"),
            ("RATE_LIMIT_WINDOW_MS", "1000"),
            ("BCRYPT_COST", "4"),
        ]))
        .unwrap();
        assert_eq!(config.global_rate_limit.max_requests, 10);
        assert_eq!(config.global_rate_limit.window, Duration::from_secs(1));
        assert_eq!(config.bcrypt_cost, 4);

        let err = AppConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", SECRET),
            ("PORT", "not-a-port"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));

        let err = AppConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", SECRET),
            ("BCRYPT_COST", "2"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "BCRYPT_COST", .. }));
    }

    #[test]
    fn test_refresh_ttl_overflow_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", SECRET),
            ("REFRESH_TOKEN_TTL_DAYS", "18446744073709551615"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "REFRESH_TOKEN_TTL_DAYS",
                ..
            }
        ));
    }
}
