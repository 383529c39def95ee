//! Refresh Ledger
//! Mission: Track outstanding refresh tokens and enforce single-use rotation
//!
//! Tokens are stored under the SHA-256 digest of their value. Consumption is
//! a single atomic take against the store, so a token is handed out to at
//! most one redeemer even under concurrent replay.

use crate::auth::errors::TokenError;
use crate::clock::SharedClock;
use crate::store::{KeyValueStore, StoreError};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const KEY_PREFIX: &str = "refresh:";

/// How long an expired record survives the periodic store sweep. Until the
/// sweep drops it, redemption reports `ExpiredToken`; afterwards the token is
/// indistinguishable from one never issued.
const EXPIRED_RETENTION: Duration = Duration::from_secs(24 * 3600);

/// Ledger entry for one outstanding refresh token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshRecord {
    pub owner_id: Uuid,
    pub expires_at_ms: u64,
}

pub struct RefreshLedger {
    store: Arc<dyn KeyValueStore>,
    clock: SharedClock,
    ttl: Duration,
}

impl RefreshLedger {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: SharedClock, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Generate a fresh random token (64 hex chars).
    pub fn generate_token() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Mint and record a new refresh token for `owner_id`.
    pub async fn issue(&self, owner_id: Uuid) -> Result<(String, RefreshRecord), TokenError> {
        let token = Self::generate_token();
        let record = RefreshRecord {
            owner_id,
            expires_at_ms: self.clock.now_ms() + self.ttl.as_millis() as u64,
        };
        self.record(&token, &record).await?;
        Ok((token, record))
    }

    pub async fn record(&self, token: &str, record: &RefreshRecord) -> Result<(), TokenError> {
        let value = serde_json::to_string(record).map_err(|e| StoreError::Corrupt {
            key: KEY_PREFIX.to_string(),
            reason: e.to_string(),
        })?;

        let remaining = Duration::from_millis(record.expires_at_ms.saturating_sub(self.clock.now_ms()));
        self.store
            .set(&ledger_key(token), value, Some(remaining + EXPIRED_RETENTION))
            .await?;

        debug!(owner_id = %record.owner_id, "Recorded refresh token");
        Ok(())
    }

    /// Consume a token exactly once and return its owner.
    ///
    /// The entry is gone after this call whatever the outcome. Expiry is
    /// decided here from the record, not by the store TTL.
    pub async fn consume(&self, token: &str) -> Result<Uuid, TokenError> {
        let key = ledger_key(token);
        let raw = self
            .store
            .take(&key)
            .await?
            .ok_or(TokenError::InvalidToken)?;

        let record: RefreshRecord =
            serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                key,
                reason: e.to_string(),
            })?;

        if self.clock.now_ms() > record.expires_at_ms {
            debug!(owner_id = %record.owner_id, "Refresh token expired");
            return Err(TokenError::ExpiredToken);
        }

        Ok(record.owner_id)
    }

    /// Delete a token. Unknown tokens are a no-op.
    pub async fn revoke(&self, token: &str) -> Result<(), TokenError> {
        if self.store.delete(&ledger_key(token)).await? {
            info!("Refresh token revoked");
        }
        Ok(())
    }
}

fn ledger_key(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("{}{}", KEY_PREFIX, hex::encode(digest))
}
