use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use reviewer_common::ReviewerSelector;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::{self, AppState};
use crate::config::ServiceConfig;
use crate::store::{MemoryStore, SqliteStore, Store};

/// Which backend the server stores its data in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    Sqlite(PathBuf),
    Memory,
}

/// Configuration for the reviewer server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreKind,
    pub request_timeout: Duration,
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ServiceConfig::default())
    }
}

impl From<&ServiceConfig> for ServerConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            host: config.http.host.clone(),
            port: config.http.port,
            store: StoreKind::Sqlite(config.database.path.clone()),
            request_timeout: config.request_timeout(),
            cors: config.http.cors,
        }
    }
}

/// Build the full application router with request tracing.
pub fn build_router(state: Arc<AppState>, cors: bool) -> Router {
    let app = api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state);
    if cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Open the configured backend, creating the database directory if needed.
pub fn open_store(kind: &StoreKind) -> Result<Arc<dyn Store>> {
    match kind {
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreKind::Sqlite(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
            let store = SqliteStore::open(path)
                .with_context(|| format!("Failed to open database {}", path.display()))?;
            Ok(Arc::new(store))
        }
    }
}

/// Start the reviewer server and run until Ctrl-C or SIGTERM.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let store = open_store(&config.store)?;
    if config.store == StoreKind::Memory {
        warn!("using in-memory store; data is lost on shutdown");
    }

    let state = Arc::new(AppState::new(
        store,
        Arc::new(ReviewerSelector::new()),
        config.request_timeout,
    ));
    let app = build_router(state, config.cors);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(%local_addr, "reviewer service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutting down");
}
