use anyhow::{Context, Result};
use std::path::Path;

use crate::ConfigCommands;
use pr_reviewer::config::ServiceConfig;

pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    ServiceConfig::resolve(path).context("Failed to load configuration")
}

pub fn cmd_config(config: &ServiceConfig, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let rendered =
                toml::to_string_pretty(config).context("Failed to serialize configuration")?;
            println!();
            println!("Reviewer Configuration");
            println!("======================");
            println!();
            print!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
        }
    }
    Ok(())
}
