use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use pr_reviewer::config::ServiceConfig;
use pr_reviewer::logging;
use pr_reviewer::server::{self, ServerConfig, StoreKind};
use pr_reviewer::store::ReviewDb;

/// `serve` flags that take precedence over file and environment settings.
pub struct ServeOverrides {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub db_path: Option<PathBuf>,
    pub in_memory: bool,
    pub cors: bool,
}

impl ServeOverrides {
    fn apply(self, config: &mut ServiceConfig) -> StoreKind {
        if let Some(port) = self.port {
            config.http.port = port;
        }
        if let Some(host) = self.host {
            config.http.host = host;
        }
        if let Some(path) = self.db_path {
            config.database.path = path;
        }
        if self.cors {
            config.http.cors = true;
        }
        if self.in_memory {
            StoreKind::Memory
        } else {
            StoreKind::Sqlite(config.database.path.clone())
        }
    }
}

pub async fn cmd_serve(
    mut config: ServiceConfig,
    overrides: ServeOverrides,
    verbose: bool,
) -> Result<()> {
    let store = overrides.apply(&mut config);
    logging::init(&config.logger, verbose)?;

    for warning in config.validate() {
        warn!("{}", warning);
    }
    info!(
        addr = %config.bind_addr(),
        store = ?store,
        request_timeout_secs = config.http.request_timeout_secs,
        "starting reviewer service"
    );

    server::start_server(ServerConfig {
        store,
        ..ServerConfig::from(&config)
    })
    .await
}

pub fn cmd_init_db(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    ReviewDb::new(db_path)?;
    println!("Reviewer database initialized at {}", db_path.display());
    Ok(())
}
