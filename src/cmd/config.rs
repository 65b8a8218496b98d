//! Configuration view and validation commands (`devpulse config`).

use anyhow::Result;
use devpulse::config::{CONFIG_FILE_NAME, DevpulseConfig};
use std::path::PathBuf;
use std::process::ExitCode;

use super::super::{Cli, ConfigCommands};
use super::load_config;

fn print_config(config: &DevpulseConfig) {
    println!("[api]");
    println!("  base_url = \"{}\"", config.api.base_url);
    println!("  timeout_secs = {}", config.api.timeout_secs);
    println!(
        "  session_token = {}",
        if config.api.session_token.is_some() {
            "(set)"
        } else {
            "(not set)"
        }
    );
    println!();
    println!("[watch]");
    println!("  max_wait_secs = {}", config.watch.max_wait_secs);
    println!("  poll_interval_secs = {}", config.watch.poll_interval_secs);
    println!();
    println!("[logging]");
    println!("  filter = \"{}\"", config.logging.filter);
    println!("  format = \"{}\"", config.logging.format);
    println!();
}

pub fn cmd_config(cli: &Cli, command: Option<ConfigCommands>) -> Result<ExitCode> {
    let config_path = cli.config.clone().or_else(DevpulseConfig::discover);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("DevPulse Configuration");
            println!("======================");
            println!();

            match &config_path {
                Some(path) => {
                    println!("Config file: {}", path.display());
                    println!();
                    print_config(&DevpulseConfig::load(path)?);
                }
                None => {
                    println!("No {} found. Using defaults.", CONFIG_FILE_NAME);
                    println!();
                }
            }

            println!("Effective values (with env/CLI overrides):");
            println!();
            print_config(&load_config(cli)?);
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let Some(path) = &config_path else {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE_NAME);
                return Ok(ExitCode::SUCCESS);
            };

            let warnings = DevpulseConfig::load(path)?.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
            if path.exists() {
                println!("{} already exists at {}", CONFIG_FILE_NAME, path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(ExitCode::SUCCESS);
            }

            DevpulseConfig::default().save(&path)?;

            println!("Created {} at {}", CONFIG_FILE_NAME, path.display());
            println!();
            println!("You can now customize:");
            println!("  - [api] base_url, timeout_secs, session_token");
            println!("  - [watch] max_wait_secs, poll_interval_secs");
            println!("  - [logging] filter, format");
            println!();
        }
    }

    Ok(ExitCode::SUCCESS)
}
