//! Server binary: loads configuration, wires the stores, and serves the
//! HTTP gateway.

use std::sync::Arc;

use lodestone_kv::MemoryKvStore;
use lodestone_metadata::NameRegistry;
use lodestone_search::MemorySearchStore;
use lodestone_server::gateway::{build_router, AppState};
use lodestone_server::{ServerOptions, SessionManager};
use lodestone_types::config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let session = Arc::new(SessionManager::new(
        Arc::new(MemoryKvStore::new()),
        Arc::new(MemorySearchStore::new()),
        Arc::new(NameRegistry::default()),
        ServerOptions::from_config(&config),
    ));
    session.tenant_manager().ensure_default_namespace().await?;

    let router = build_router(AppState { session });
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "serving");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    match std::env::var("LODESTONE_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(path)?;
            Ok(Config::from_toml(&raw)?)
        }
        Err(_) => Ok(Config::default()),
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to install shutdown signal handler");
    }
}
