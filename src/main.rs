//! Gatekeeper - authentication and admission control service
//! Mission: Issue rotating token pairs and keep every client inside its request budget

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use gatekeeper_backend::{
    api::{build_router, Services},
    auth::{GraphApiVerifier, UserStore},
    clock::SystemClock,
    config::AppConfig,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "gatekeeper", about = "Token issuance and rate-limited admission service")]
struct Args {
    /// Port to listen on (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// SQLite path for user accounts (overrides AUTH_DB_PATH)
    #[arg(long)]
    db_path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let args = Args::parse();

    // Signing misconfiguration is fatal here, never per request
    let mut config = AppConfig::from_env().context("Invalid configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(db_path) = args.db_path {
        config.auth_db_path = db_path;
    }

    info!("🚀 Gatekeeper starting");

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    let users = Arc::new(
        UserStore::new(&config.auth_db_path, config.bcrypt_cost)
            .context("Failed to open user store")?,
    );
    let verifier = Arc::new(GraphApiVerifier::new(
        http_client,
        config.meta_graph_url.clone(),
    ));

    let services = Services::build(&config, users, verifier, Arc::new(SystemClock))
        .context("Failed to initialize token services")?;

    info!("🔐 Authentication initialized at: {}", config.auth_db_path);
    info!(
        global_max = config.global_rate_limit.max_requests,
        global_window_ms = config.global_rate_limit.window.as_millis() as u64,
        auth_max = config.auth_rate_limit.max_requests,
        auth_window_ms = config.auth_rate_limit.window.as_millis() as u64,
        "🚦 Admission control active"
    );
    warn!("Refresh tokens and rate-limit windows are process-local and reset on restart");

    // One sweep covers every limiter: they share the store
    let _sweeper = services.global_limiter.spawn_cleanup(config.sweep_interval);

    let app = build_router(&services);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("👋 Gatekeeper stopped");
    Ok(())
}

/// Initialize tracing with env-filter support
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatekeeper_backend=debug,gatekeeper=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // 1) Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // 2) Also try the crate root .env when run with --manifest-path from elsewhere
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
}
