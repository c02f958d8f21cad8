//! Tracing subscriber setup.

use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggerConfig};

/// Build the filter: `RUST_LOG` when set, else the configured level, else
/// `info`. `verbose` forces `debug`.
pub fn env_filter(config: &LoggerConfig, verbose: bool) -> EnvFilter {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    filter_from(rust_log.as_deref(), config, verbose)
}

fn filter_from(rust_log: Option<&str>, config: &LoggerConfig, verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new("debug");
    }
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(&config.level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &LoggerConfig, verbose: bool) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter(config, verbose));
    let installed = match config.format {
        LogFormat::Pretty => builder.with_target(true).try_init(),
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
    };
    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}
