//! JWT Token Handler
//! Mission: Sign and validate short-lived access tokens

use crate::auth::errors::TokenError;
use crate::auth::models::{Claims, User};
use crate::clock::SharedClock;
use crate::config::{validate_secret, ConfigError};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::time::Duration;
use tracing::debug;

/// JWT Handler for access token operations (HS256)
pub struct JwtHandler {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
    clock: SharedClock,
}

impl JwtHandler {
    /// Create a handler; rejects missing or short secrets.
    pub fn new(secret: &str, ttl: Duration, clock: SharedClock) -> Result<Self, ConfigError> {
        validate_secret(secret)?;
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
            clock,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Generate an access token for a user
    pub fn generate_token(&self, user: &User) -> Result<(String, Claims), TokenError> {
        let iat = self.clock.now_secs();
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            iat,
            exp: iat + self.ttl.as_secs(),
        };

        debug!(user_id = %user.id, exp = claims.exp, "Generating access token");

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok((token, claims))
    }

    /// Validate an access token and extract claims.
    ///
    /// Expiry is checked against the injected clock rather than the library's
    /// system-time check.
    pub fn validate_token(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;

        let decoded = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|_| TokenError::InvalidToken)?;

        if decoded.claims.exp <= self.clock.now_secs() {
            return Err(TokenError::ExpiredToken);
        }

        Ok(decoded.claims)
    }
}
