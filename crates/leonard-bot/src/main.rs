//! Leonard - HipChat bot.
//!
//! Connects with the configured account, joins rooms and answers through the
//! built-in plugins.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod plugins;
mod xmpp;

use crate::xmpp::XmppGateway;

#[derive(Parser)]
#[command(name = "leonard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "leonard.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,leonard={level},leonard_bot={level}")));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = leonard::load_config_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    init_tracing(level);

    info!("Leonard starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let registry = plugins::builtin().context("Failed to register built-in plugins")?;
    let gateway = XmppGateway::new(&config.account)?;

    let result = leonard::run(gateway, config, registry).await;
    if let Err(ref e) = result {
        error!("Session ended: {e}");
    }
    result.context("Session ended")
}
