mod cache;
mod filter;
mod filter_config;
mod lookup;

use ferroscreen_core::{ScreenerConfig, ScreenerService};
use serde_json::Value;
use tracing::debug;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Resolves configuration, runs the selected command and returns its JSON result.
pub async fn run(cli: &Cli) -> Result<Value, CliError> {
    let config = resolve_config(cli)?;
    config.ensure_dirs()?;
    debug!(home = %config.home_dir.display(), cache = %config.cache_dir.display(), "configuration resolved");

    match &cli.command {
        Command::Fundamentals(args) => lookup::fundamentals(args, &service(&config)?).await,
        Command::Fs(args) => lookup::financial_statements(args, &service(&config)?).await,
        Command::Filter(args) => filter::run(args, &service(&config)?).await,
        Command::FilterConfig(command) => filter_config::run(command, &config),
        Command::Cache(command) => cache::run(command, &config),
    }
}

fn resolve_config(cli: &Cli) -> Result<ScreenerConfig, CliError> {
    let mut config = ScreenerConfig::from_env()?;
    if let Some(token) = &cli.token {
        config.token = token.clone();
    }
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }
    Ok(config)
}

fn service(config: &ScreenerConfig) -> Result<ScreenerService, CliError> {
    if config.token.trim().is_empty() {
        return Err(CliError::MissingToken);
    }
    Ok(ScreenerService::from_config(config))
}
