use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::prelude::*;

mod channel;
mod config;
mod driver;
mod gateway;
mod terminal;
#[cfg(test)]
mod test_helpers;

use crate::config::WizardConfig;
use crate::driver::Orchestrator;
use crate::terminal::TerminalOptions;
use wizard_core::StepId;

#[derive(Parser)]
#[command(name = "setup-wizard")]
#[command(about = "Sign in, register this device and install the service")]
struct Cli {
    /// Backend base URL (overrides config.toml and WIZARD_BACKEND__URL)
    #[arg(long)]
    url: Option<String>,

    /// Custom config directory (defaults to ~/.setup_wizard)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Do not draw the login QR code
    #[arg(long)]
    no_qr: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout belongs to the wizard.
    let default_directive = if cli.debug {
        "debug"
    } else {
        "setup_wizard=info,wizard_core=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => config::default_config_dir()?,
    };
    let config = WizardConfig::load(&config_dir, cli.url.as_deref())
        .with_context(|| format!("Failed to load config from {}", config_dir.display()))?;

    info!(
        backend = %config.endpoint.base_url(),
        channel = %config.endpoint.ws_url(),
        "starting setup wizard"
    );

    let (orchestrator, handle) = Orchestrator::new(&config)?;
    let wizard = tokio::spawn(orchestrator.run());

    terminal::run(
        handle,
        TerminalOptions {
            show_qr: !cli.no_qr,
        },
    )
    .await?;

    let session = wizard.await.context("Wizard task failed")?;
    if session.is_completed(StepId::Complete) {
        info!("setup complete");
    } else {
        info!(step = %session.current_step(), "wizard closed before completion");
    }

    Ok(())
}
