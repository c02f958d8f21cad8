use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "pr-reviewer")]
#[command(version, about = "Pull request reviewer assignment service")]
pub struct Cli {
    /// Log at debug level regardless of configuration
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a TOML config file (default: ./reviewer.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Keep all data in memory instead of SQLite
        #[arg(long, conflicts_with = "db_path")]
        in_memory: bool,

        /// Allow cross-origin requests from any origin
        #[arg(long)]
        cors: bool,
    },
    /// Create the database and apply migrations, then exit
    InitDb {
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the resolved configuration
    Show,
    /// Validate the configuration and print warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cmd::load_config(cli.config.as_deref())?;

    match &cli.command {
        Commands::Serve {
            port,
            host,
            db_path,
            in_memory,
            cors,
        } => {
            let overrides = cmd::ServeOverrides {
                port: *port,
                host: host.clone(),
                db_path: db_path.clone(),
                in_memory: *in_memory,
                cors: *cors,
            };
            cmd::cmd_serve(config, overrides, cli.verbose).await?;
        }
        Commands::InitDb { db_path } => {
            let db_path = db_path.clone().unwrap_or(config.database.path);
            cmd::cmd_init_db(&db_path)?;
        }
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
