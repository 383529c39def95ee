//! Authentication API Endpoints
//! Mission: Register, log in, rotate refresh tokens and log out

use crate::auth::{
    errors::{CredentialError, TokenError},
    issuer::TokenIssuer,
    middleware::extract_claims,
    models::{
        AuthResponse, LoginRequest, LogoutRequest, MetaLoginRequest, RefreshRequest,
        RegisterRequest, User, UserResponse,
    },
    user_store::CredentialStore,
    verifier::IdentityVerifier,
};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Minimum accepted password length for new accounts.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub issuer: Arc<TokenIssuer>,
    pub verifier: Arc<dyn IdentityVerifier>,
}

impl AuthState {
    pub fn new(issuer: Arc<TokenIssuer>, verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self { issuer, verifier }
    }

    async fn respond_with_tokens(&self, user: &User) -> Result<AuthResponse, AuthApiError> {
        let tokens = self.issuer.issue(user).await?;
        Ok(AuthResponse {
            tokens,
            user: UserResponse::from_user(user),
        })
    }
}

/// Register endpoint - POST /auth/register
pub async fn register(
    State(state): State<AuthState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AuthApiError> {
    if payload.password.len() < MIN_PASSWORD_LEN {
        return Err(AuthApiError::WeakPassword);
    }

    let user = state
        .issuer
        .users()
        .create_user(&payload.email, &payload.password, payload.name)
        .await?;

    info!(user_id = %user.id, "Registration successful");

    let response = state.respond_with_tokens(&user).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Login endpoint - POST /auth/login
pub async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthApiError> {
    let user = state
        .issuer
        .users()
        .verify_credentials(&payload.email, &payload.password)
        .await
        .map_err(|e| {
            error!(error = %e, "Credential check failed");
            AuthApiError::InternalError
        })?
        .ok_or_else(|| {
            warn!("Failed login attempt");
            AuthApiError::InvalidCredentials
        })?;

    info!(user_id = %user.id, "Login successful");

    Ok(Json(state.respond_with_tokens(&user).await?))
}

/// External identity login endpoint - POST /auth/meta
pub async fn meta_login(
    State(state): State<AuthState>,
    Json(payload): Json<MetaLoginRequest>,
) -> Result<Json<AuthResponse>, AuthApiError> {
    let verified = state
        .verifier
        .verify_external_identity(&payload.access_token, &payload.user_id)
        .await;

    if !verified {
        warn!("External identity verification failed");
        return Err(AuthApiError::InvalidCredentials);
    }

    let user = state
        .issuer
        .users()
        .find_or_create_external(&payload.user_id, payload.email, payload.name)
        .await
        .map_err(|e| match e {
            // Do not reveal that the email belongs to another account
            CredentialError::EmailAlreadyExists { .. } => {
                warn!("External login email already registered");
                AuthApiError::InvalidCredentials
            }
            other => other.into(),
        })?;

    info!(user_id = %user.id, "External login successful");

    Ok(Json(state.respond_with_tokens(&user).await?))
}

/// Refresh endpoint - POST /auth/refresh
pub async fn refresh(
    State(state): State<AuthState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, AuthApiError> {
    let (user, tokens) = state.issuer.redeem(&payload.refresh_token).await?;

    Ok(Json(AuthResponse {
        tokens,
        user: UserResponse::from_user(&user),
    }))
}

/// Logout endpoint - POST /auth/logout
///
/// Always succeeds. Only the refresh token is invalidated; an access token
/// already handed out stays valid until it expires.
pub async fn logout(
    State(state): State<AuthState>,
    payload: Option<Json<LogoutRequest>>,
) -> Json<serde_json::Value> {
    let refresh_token = payload.and_then(|Json(body)| body.refresh_token);

    if let Some(token) = refresh_token {
        if let Err(e) = state.issuer.revoke(&token).await {
            warn!(error = %e, "Failed to revoke refresh token on logout");
        }
    }

    Json(json!({ "success": true }))
}

/// Current user - GET /auth/me (requires auth middleware)
pub async fn get_current_user(
    State(state): State<AuthState>,
    req: Request,
) -> Result<Json<UserResponse>, AuthApiError> {
    let claims = extract_claims(&req).ok_or(AuthApiError::Unauthorized)?;
    let user_id = claims.user_id().ok_or(AuthApiError::Unauthorized)?;

    let user = state
        .issuer
        .users()
        .find_by_id(user_id)
        .await?
        .ok_or(AuthApiError::Unauthorized)?;

    Ok(Json(UserResponse::from_user(&user)))
}

/// Auth API errors
#[derive(Debug, PartialEq, Eq)]
pub enum AuthApiError {
    InvalidCredentials,
    InvalidRefreshToken,
    Unauthorized,
    EmailAlreadyExists,
    WeakPassword,
    InvalidEmail,
    InternalError,
}

impl From<TokenError> for AuthApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::InvalidToken | TokenError::ExpiredToken | TokenError::UnknownSubject => {
                AuthApiError::InvalidRefreshToken
            }
            other => {
                error!(error = %other, "Token operation failed");
                AuthApiError::InternalError
            }
        }
    }
}

impl From<CredentialError> for AuthApiError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::EmailAlreadyExists { .. } => AuthApiError::EmailAlreadyExists,
            CredentialError::InvalidEmail { .. } => AuthApiError::InvalidEmail,
            other => {
                error!(error = %other, "Credential store failure");
                AuthApiError::InternalError
            }
        }
    }
}

impl IntoResponse for AuthApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthApiError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "Invalid credentials"),
            AuthApiError::InvalidRefreshToken => {
                (StatusCode::UNAUTHORIZED, "Invalid refresh token")
            }
            AuthApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthApiError::EmailAlreadyExists => (StatusCode::CONFLICT, "Email already exists"),
            AuthApiError::WeakPassword => (
                StatusCode::BAD_REQUEST,
                "Password must be at least 8 characters",
            ),
            AuthApiError::InvalidEmail => (StatusCode::BAD_REQUEST, "Invalid email address"),
            AuthApiError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
