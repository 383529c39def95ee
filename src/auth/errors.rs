//! Authentication domain errors

use crate::store::StoreError;
use thiserror::Error;

/// Token issuance, verification and refresh-rotation failures
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    ExpiredToken,

    #[error("Token subject no longer exists")]
    UnknownSubject,

    #[error("Failed to sign token: {0}")]
    Signing(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// Credential store failures
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Email already exists: {email}")]
    EmailAlreadyExists { email: String },

    #[error("Invalid email format: {email}")]
    InvalidEmail { email: String },

    #[error("Failed to hash password: {0}")]
    Hashing(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for CredentialError {
    fn from(e: rusqlite::Error) -> Self {
        CredentialError::Database(e.to_string())
    }
}

impl From<bcrypt::BcryptError> for CredentialError {
    fn from(e: bcrypt::BcryptError) -> Self {
        CredentialError::Hashing(e.to_string())
    }
}
