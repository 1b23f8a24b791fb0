//! CLI argument parsing and the daemon's run loop.

pub mod args;

use anyhow::{bail, Context, Result};
use args::Cli;
use clap::Parser;
use dotbit_server::{Config, Server, Services};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Run the daemon until Ctrl-C or a serve failure.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let mut config = Config::load(&cli.conf)
        .with_context(|| format!("loading {}", cli.conf.display()))?;
    cli.apply(&mut config);

    let server = Server::new(config, Services::default())
        .await
        .context("failed to construct server")?;
    let mut failures = server.take_failures()?;
    server.start().await.context("failed to start server")?;

    info!(addr = %server.local_addr(), version = %server.version(), "dotbitd running");

    let failure = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for Ctrl-C")?;
            info!("interrupt received, shutting down");
            None
        }
        failure = failures.recv() => failure,
    };

    server.stop().await;

    if let Some(e) = failure {
        error!(error = %e, "server failed");
        bail!(e);
    }
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `level`.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Ignore a subscriber that is already installed.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
