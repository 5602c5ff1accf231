//! confstack CLI Binary
//!
//! Command-line interface over the configuration level engine.

use clap::Parser;
use confstack::cli::{map_error, Cli, RunContext};
use confstack::config::SettingsLoader;
use confstack::logging::{init_logging, LoggingConfig};
use std::process;
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();

    let logging_config = match build_logging_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    info!("confstack starting");

    let context = match RunContext::new(cli.workspace.clone(), cli.config.clone()) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Error loading settings: {}", e);
            eprintln!("{}", map_error(&e));
            process::exit(1);
        }
    };

    match context.execute(&cli.command) {
        Ok(output) => {
            info!("Command completed successfully");
            println!("{}", output);
        }
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("{}", map_error(&e));
            process::exit(1);
        }
    }
}

/// Logging settings from the settings files, overridden by CLI arguments.
/// Logging stays off without `--verbose`.
fn build_logging_config(cli: &Cli) -> Result<LoggingConfig, confstack::error::ApiError> {
    if !cli.verbose {
        return Ok(LoggingConfig {
            level: "off".to_string(),
            ..LoggingConfig::default()
        });
    }

    let mut config = SettingsLoader::load_with(&cli.workspace, cli.config.as_deref())
        .map(|s| s.logging)
        .unwrap_or_default();

    if let Some(level) = &cli.log_level {
        config.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.format = format.parse()?;
    }
    if let Some(output) = &cli.log_output {
        config.output = output.parse()?;
    }
    if let Some(file) = &cli.log_file {
        config.file = file.clone();
    }
    Ok(config)
}
