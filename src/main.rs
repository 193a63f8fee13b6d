mod http;
mod notify;
mod protocol;
mod registry;
mod session;
mod telemetry;
mod ticket;

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use notify::Notifier;
use registry::{BootstrapConfig, QueueRegistry};
use session::SessionGateway;
use ticket::TicketEngine;

const DEFAULT_PORT: u16 = 8080;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let config_path: PathBuf = std::env::var("CONFIG_PATH")
        .unwrap_or_else(|_| "lineup.json".to_string())
        .into();
    let bootstrap = if config_path.exists() {
        BootstrapConfig::load(&config_path)?
    } else {
        warn!(path = %config_path.display(), "bootstrap config not found, starting empty");
        BootstrapConfig::default()
    };

    let registry = Arc::new(QueueRegistry::from_bootstrap(&bootstrap));
    let sessions = Arc::new(SessionGateway::new());
    for entry in bootstrap.principals {
        sessions.register_token(entry.token, entry.principal);
    }
    info!(
        businesses = bootstrap.businesses.len(),
        queues = bootstrap.queues.len(),
        tokens = sessions.token_count(),
        "bootstrap config loaded"
    );

    let notifier = Notifier::from_env();
    let engine = match std::env::var("DATABASE_URL") {
        Ok(url) => TicketEngine::with_postgres(Arc::clone(&registry), &url, notifier).await,
        Err(_) => TicketEngine::with_notifier(Arc::clone(&registry), notifier),
    };

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let state = http::AppState {
        engine: Arc::clone(&engine),
        registry,
        sessions,
    };
    let router = http::create_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding HTTP listener on port {port}"))?;
    info!(port, "lineup server listening");

    let shutdown_engine = Arc::clone(&engine);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown_engine.shutdown();
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}
