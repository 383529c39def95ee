//! Token Issuer
//! Mission: Mint access/refresh pairs and run the refresh rotation protocol

use crate::auth::errors::TokenError;
use crate::auth::jwt::JwtHandler;
use crate::auth::ledger::RefreshLedger;
use crate::auth::models::{Claims, TokenPair, User};
use crate::auth::user_store::CredentialStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct TokenIssuer {
    jwt: JwtHandler,
    ledger: RefreshLedger,
    users: Arc<dyn CredentialStore>,
}

impl TokenIssuer {
    pub fn new(jwt: JwtHandler, ledger: RefreshLedger, users: Arc<dyn CredentialStore>) -> Self {
        Self { jwt, ledger, users }
    }

    pub fn users(&self) -> &Arc<dyn CredentialStore> {
        &self.users
    }

    /// Produce a fresh pair for an authenticated subject and record the
    /// refresh token in the ledger.
    pub async fn issue(&self, user: &User) -> Result<TokenPair, TokenError> {
        let (access_token, _claims) = self.jwt.generate_token(user)?;
        let (refresh_token, _record) = self.ledger.issue(user.id).await?;

        debug!(user_id = %user.id, "Issued token pair");

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.jwt.ttl().as_secs(),
        })
    }

    /// Verify an access token's signature and expiry.
    pub fn verify(&self, access_token: &str) -> Result<Claims, TokenError> {
        self.jwt.validate_token(access_token)
    }

    /// Exchange a refresh token for a new pair. The presented token is
    /// consumed before the owner is resolved, so a replay always fails.
    pub async fn redeem(&self, refresh_token: &str) -> Result<(User, TokenPair), TokenError> {
        let owner_id = self.ledger.consume(refresh_token).await?;

        let user = self.users.find_by_id(owner_id).await?.ok_or_else(|| {
            warn!(user_id = %owner_id, "Refresh token owner no longer exists");
            TokenError::UnknownSubject
        })?;

        let pair = self.issue(&user).await?;
        info!(user_id = %user.id, "Refresh token rotated");

        Ok((user, pair))
    }

    /// Logout: invalidate a refresh token. Access tokens stay valid until expiry.
    pub async fn revoke(&self, refresh_token: &str) -> Result<(), TokenError> {
        self.ledger.revoke(refresh_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ledger::RefreshRecord;
    use crate::auth::user_store::UserStore;
    use crate::clock::{Clock, ManualClock};
    use crate::store::MemoryStore;
    use std::time::Duration;
    use uuid::Uuid;

    const SECRET: &str = "test-secret-key-with-at-least-32-bytes!";
    const HOUR: Duration = Duration::from_secs(3600);
    const THIRTY_DAYS: Duration = Duration::from_secs(30 * 24 * 3600);

    struct Fixture {
        issuer: Arc<TokenIssuer>,
        users: Arc<UserStore>,
        clock: ManualClock,
    }

    fn create_fixture() -> Fixture {
        let clock = ManualClock::new(1_700_000_000_000);
        let shared_clock = Arc::new(clock.clone());
        let store = Arc::new(MemoryStore::new(shared_clock.clone()));
        let users = Arc::new(UserStore::new(":memory:", 4).unwrap());

        let jwt = JwtHandler::new(SECRET, HOUR, shared_clock.clone()).unwrap();
        let ledger = RefreshLedger::new(store, shared_clock, THIRTY_DAYS);
        let issuer = Arc::new(TokenIssuer::new(jwt, ledger, users.clone()));

        Fixture {
            issuer,
            users,
            clock,
        }
    }

    async fn create_user(fixture: &Fixture) -> User {
        fixture
            .users
            .create_user("a@b.com", "password123", None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_issue_access_token_expiry_is_one_hour() {
        let fixture = create_fixture();
        let user = create_user(&fixture).await;

        let pair = fixture.issuer.issue(&user).await.unwrap();
        let claims = fixture.issuer.verify(&pair.access_token).unwrap();

        assert_eq!(claims.iat, fixture.clock.now_secs());
        assert_eq!(claims.exp, claims.iat + 3600);
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.email, "a@b.com");
        assert_eq!(pair.expires_in, 3600);
    }

    #[tokio::test]
    async fn test_refresh_token_lives_thirty_days() {
        let fixture = create_fixture();
        let user = create_user(&fixture).await;

        let pair = fixture.issuer.issue(&user).await.unwrap();
        fixture.clock.advance(THIRTY_DAYS);
        assert!(fixture.issuer.redeem(&pair.refresh_token).await.is_ok());

        let pair = fixture.issuer.issue(&user).await.unwrap();
        fixture.clock.advance(THIRTY_DAYS + Duration::from_millis(1));
        assert!(matches!(
            fixture.issuer.redeem(&pair.refresh_token).await,
            Err(TokenError::ExpiredToken)
        ));
    }

    #[tokio::test]
    async fn test_redeem_rotates_and_rejects_replay() {
        let fixture = create_fixture();
        let user = create_user(&fixture).await;

        let original = fixture.issuer.issue(&user).await.unwrap();
        let (owner, rotated) = fixture.issuer.redeem(&original.refresh_token).await.unwrap();

        assert_eq!(owner.id, user.id);
        assert_ne!(rotated.refresh_token, original.refresh_token);
        assert!(matches!(
            fixture.issuer.redeem(&original.refresh_token).await,
            Err(TokenError::InvalidToken)
        ));

        // The rotated token is itself redeemable
        assert!(fixture.issuer.redeem(&rotated.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_redeem_unknown_subject() {
        let fixture = create_fixture();
        let ghost = Uuid::new_v4();
        let token = RefreshLedger::generate_token();

        let record = RefreshRecord {
            owner_id: ghost,
            expires_at_ms: fixture.clock.now_ms() + 60_000,
        };
        fixture.issuer.ledger.record(&token, &record).await.unwrap();

        assert!(matches!(
            fixture.issuer.redeem(&token).await,
            Err(TokenError::UnknownSubject)
        ));
    }

    #[tokio::test]
    async fn test_revoke_then_redeem_fails() {
        let fixture = create_fixture();
        let user = create_user(&fixture).await;
        let pair = fixture.issuer.issue(&user).await.unwrap();

        fixture.issuer.revoke(&pair.refresh_token).await.unwrap();
        fixture.issuer.revoke(&pair.refresh_token).await.unwrap();
        fixture.issuer.revoke("unknown").await.unwrap();

        assert!(matches!(
            fixture.issuer.redeem(&pair.refresh_token).await,
            Err(TokenError::InvalidToken)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_redeem_single_winner() {
        let fixture = create_fixture();
        let user = create_user(&fixture).await;
        let pair = fixture.issuer.issue(&user).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let issuer = fixture.issuer.clone();
            let token = pair.refresh_token.clone();
            handles.push(tokio::spawn(async move { issuer.redeem(&token).await }));
        }

        let mut successes = 0;
        let mut invalid = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(TokenError::InvalidToken) => invalid += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(invalid, 15);
    }
}
