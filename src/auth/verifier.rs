//! External Identity Verification
//! Mission: Confirm a third-party access token belongs to the claimed account

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// True when `token` is a live provider token for account `id`.
    async fn verify_external_identity(&self, token: &str, id: &str) -> bool;
}

/// Verifies tokens against the provider's Graph API `/me` endpoint.
pub struct GraphApiVerifier {
    http_client: reqwest::Client,
    me_url: String,
}

#[derive(Debug, Deserialize)]
struct GraphMeResponse {
    id: String,
}

impl GraphApiVerifier {
    pub fn new(http_client: reqwest::Client, me_url: String) -> Self {
        Self {
            http_client,
            me_url,
        }
    }
}

#[async_trait]
impl IdentityVerifier for GraphApiVerifier {
    async fn verify_external_identity(&self, token: &str, id: &str) -> bool {
        if token.trim().is_empty() || id.trim().is_empty() {
            return false;
        }

        let resp = match self
            .http_client
            .get(&self.me_url)
            .query(&[("fields", "id")])
            .bearer_auth(token)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "External identity lookup failed");
                return false;
            }
        };

        if !resp.status().is_success() {
            debug!(status = %resp.status(), "External identity rejected");
            return false;
        }

        match resp.json::<GraphMeResponse>().await {
            Ok(me) => me.id == id,
            Err(e) => {
                warn!(error = %e, "Malformed external identity response");
                false
            }
        }
    }
}

/// TEST DOUBLE: accepts every token. Never wire this into a production router.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllVerifier;

#[async_trait]
impl IdentityVerifier for AcceptAllVerifier {
    async fn verify_external_identity(&self, _token: &str, _id: &str) -> bool {
        true
    }
}

/// TEST DOUBLE: rejects every token.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectAllVerifier;

#[async_trait]
impl IdentityVerifier for RejectAllVerifier {
    async fn verify_external_identity(&self, _token: &str, _id: &str) -> bool {
        false
    }
}
