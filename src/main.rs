//! perpbot - headless autonomous perpetual-futures trading bot.
//!
//! All configuration comes from the environment (see config module);
//! metrics are structured tracing fields on stdout.

use anyhow::Result;
use clap::Parser;
use perpbot::application::Application;
use perpbot::config::Config;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "perpbot", version, about = "Autonomous perpetual futures trading bot")]
struct Args {
    /// Run the whole pipeline without submitting orders.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("perpbot {} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env()?;
    if args.dry_run {
        config.execution.dry_run = true;
    }
    info!(
        "configuration loaded: testnet={}, dry_run={}, max_positions={}",
        config.binance.testnet, config.execution.dry_run, config.risk.max_positions
    );

    let app = Application::build(config).await?;
    app.start().await?;
    info!("trading system running. Press Ctrl+C to shut down.");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    app.stop();
    // Give loops a moment to finish their current iteration.
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    Ok(())
}
