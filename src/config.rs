//! Service configuration.
//!
//! Settings are layered, later layers winning:
//! defaults → TOML file → environment (including `.env`) → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [http]
//! host = "0.0.0.0"
//! port = 8080
//! request_timeout_secs = 10
//! cors = false
//!
//! [database]
//! path = "data/reviewer.db"
//!
//! [logger]
//! level = "info"
//! format = "pretty"
//! ```
//!
//! | Variable               | Overrides                    |
//! |------------------------|------------------------------|
//! | `HTTP_HOST`            | `http.host`                  |
//! | `HTTP_PORT`            | `http.port`                  |
//! | `REQUEST_TIMEOUT_SECS` | `http.request_timeout_secs`  |
//! | `DB_PATH`              | `database.path`              |
//! | `LOG_LEVEL`            | `logger.level`               |
//! | `LOG_FORMAT`           | `logger.format`              |

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "reviewer.toml";

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds before an in-flight request is cancelled.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Attach a permissive CORS layer.
    #[serde(default)]
    pub cors: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
            cors: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/reviewer.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logger: LoggerConfig,
}

impl ServiceConfig {
    /// Load configuration from a specific TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse reviewer.toml")
    }

    /// Load `reviewer.toml` from `dir`, or defaults if it is absent.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join(DEFAULT_CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the file layer then the environment layer. An explicit
    /// `config_path` must exist.
    pub fn resolve(config_path: Option<&Path>) -> Result<Self> {
        accept_dotenv(dotenvy::dotenv())?;

        let mut config = match config_path {
            Some(path) => Self::load(path)?,
            None => Self::load_or_default(Path::new("."))?,
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay values found through `lookup` (normally the process
    /// environment).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("HTTP_HOST") {
            self.http.host = host;
        }
        if let Some(port) = lookup("HTTP_PORT") {
            self.http.port = port
                .parse()
                .with_context(|| format!("Invalid HTTP_PORT '{}'", port))?;
        }
        if let Some(secs) = lookup("REQUEST_TIMEOUT_SECS") {
            self.http.request_timeout_secs = secs
                .parse()
                .with_context(|| format!("Invalid REQUEST_TIMEOUT_SECS '{}'", secs))?;
        }
        if let Some(path) = lookup("DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logger.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logger.format = format.parse()?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.request_timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.http.port == 0 {
            warnings.push("http.port is 0; the OS will pick an ephemeral port".to_string());
        }
        if self.http.request_timeout_secs == 0 {
            warnings.push(
                "http.request_timeout_secs is 0; every request will time out immediately"
                    .to_string(),
            );
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logger.level).is_err() {
            warnings.push(format!(
                "Invalid logger.level '{}'; falling back to 'info'",
                self.logger.level
            ));
        }

        warnings
    }
}

/// Only a missing `.env` is ignored; a file that fails to parse is an error.
fn accept_dotenv<T>(result: dotenvy::Result<T>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(e).context("Failed to load .env file"),
    }
}
