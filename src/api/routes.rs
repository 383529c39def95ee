//! HTTP Routes
//! Mission: Wire token issuance, admission control and logging into one router

use crate::auth::{
    api as auth_api, auth_middleware, optional_auth_middleware, AuthState, CredentialStore,
    IdentityVerifier, JwtHandler, RefreshLedger, TokenIssuer,
};
use crate::clock::SharedClock;
use crate::config::{AppConfig, ConfigError};
use crate::middleware::{rate_limit_middleware, request_logging, RateLimiter};
use crate::store::{KeyValueStore, MemoryStore};
use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Everything the router needs, built once at start-up.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn KeyValueStore>,
    pub issuer: Arc<TokenIssuer>,
    pub auth_state: AuthState,
    pub global_limiter: RateLimiter,
    pub auth_limiter: RateLimiter,
}

impl Services {
    /// Build services over a fresh in-memory store.
    ///
    /// Fails with `SigningMisconfigured` when the JWT secret is unusable.
    pub fn build(
        config: &AppConfig,
        users: Arc<dyn CredentialStore>,
        verifier: Arc<dyn IdentityVerifier>,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new(clock.clone()));
        Self::with_store(config, store, users, verifier, clock)
    }

    /// Build services over a caller-supplied store.
    pub fn with_store(
        config: &AppConfig,
        store: Arc<dyn KeyValueStore>,
        users: Arc<dyn CredentialStore>,
        verifier: Arc<dyn IdentityVerifier>,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        let jwt = JwtHandler::new(&config.jwt_secret, config.access_token_ttl, clock.clone())?;
        let ledger = RefreshLedger::new(store.clone(), clock.clone(), config.refresh_token_ttl);
        let issuer = Arc::new(TokenIssuer::new(jwt, ledger, users));

        let global_limiter = RateLimiter::new(
            "global",
            config.global_rate_limit,
            store.clone(),
            clock.clone(),
        );
        let auth_limiter =
            RateLimiter::new("auth", config.auth_rate_limit, store.clone(), clock);

        Ok(Self {
            store,
            auth_state: AuthState::new(issuer.clone(), verifier),
            issuer,
            global_limiter,
            auth_limiter,
        })
    }
}

/// Build the application router.
///
/// Layer order, outermost first: CORS, request logging, optional bearer
/// authentication (so admission can key on the subject), global admission,
/// then the tighter auth admission on credential endpoints.
pub fn build_router(services: &Services) -> Router {
    let auth_routes = Router::new()
        .route("/auth/register", post(auth_api::register))
        .route("/auth/login", post(auth_api::login))
        .route("/auth/meta", post(auth_api::meta_login))
        .route("/auth/refresh", post(auth_api::refresh))
        .route("/auth/logout", post(auth_api::logout))
        .route_layer(middleware::from_fn_with_state(
            services.auth_limiter.clone(),
            rate_limit_middleware,
        ))
        .with_state(services.auth_state.clone());

    let protected_routes = Router::new()
        .route("/auth/me", get(auth_api::get_current_user))
        .route_layer(middleware::from_fn_with_state(
            services.issuer.clone(),
            auth_middleware,
        ))
        .with_state(services.auth_state.clone());

    let limited_routes = Router::new()
        .route("/health", get(health_check))
        .merge(auth_routes)
        .merge(protected_routes)
        .route_layer(middleware::from_fn_with_state(
            services.global_limiter.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .merge(limited_routes)
        .layer(middleware::from_fn_with_state(
            services.issuer.clone(),
            optional_auth_middleware,
        ))
        .layer(middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
