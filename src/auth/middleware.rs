//! Authentication Middleware
//! Mission: Validate bearer access tokens and attach claims to requests

use crate::auth::{issuer::TokenIssuer, models::Claims};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use std::sync::Arc;
use tracing::debug;

fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
}

/// Auth middleware that rejects requests without a valid access token
pub async fn auth_middleware(
    State(issuer): State<Arc<TokenIssuer>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = bearer_token(&req).ok_or(AuthError::MissingToken)?;

    let claims = issuer.verify(&token).map_err(|e| {
        debug!(error = %e, "Rejected access token");
        AuthError::InvalidToken
    })?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Optional auth middleware - allows requests without token but adds claims if present
pub async fn optional_auth_middleware(
    State(issuer): State<Arc<TokenIssuer>>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Some(token) = bearer_token(&req) {
        if let Ok(claims) = issuer.verify(&token) {
            req.extensions_mut().insert(claims);
        }
    }

    next.run(req).await
}

/// Extract claims from request (use after auth middleware)
pub fn extract_claims(req: &Request) -> Option<&Claims> {
    req.extensions().get::<Claims>()
}

/// Auth error types
#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            AuthError::MissingToken => "Missing authorization token",
            AuthError::InvalidToken => "Invalid or expired token",
        };

        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": message })),
        )
            .into_response()
    }
}
