//! Authentication Module
//! Mission: Issue and rotate tokens, verify credentials and bearer access

pub mod api;
pub mod errors;
pub mod issuer;
pub mod jwt;
pub mod ledger;
pub mod middleware;
pub mod models;
pub mod user_store;
pub mod verifier;

pub use api::AuthState;
pub use errors::{CredentialError, TokenError};
pub use issuer::TokenIssuer;
pub use jwt::JwtHandler;
pub use ledger::RefreshLedger;
pub use middleware::{auth_middleware, optional_auth_middleware};
pub use user_store::{CredentialStore, UserStore};
pub use verifier::{GraphApiVerifier, IdentityVerifier};
