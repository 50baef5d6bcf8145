//! DabMod Adapt
//!
//! Operator front-end for the engine's remote-control socket.
//!
//! - Reads and writes UHD TX/RX gain and digital gain
//! - Reads and writes arbitrary `module param` settings
//! - Replaces the predistortion coefficients and triggers a reload

mod cli;

use clap::Parser;
use dabmod_control::ControlClient;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.connection.resolve()?;
    tracing::debug!(
        endpoint = %config.endpoint,
        coef_path = %config.coef_path.display(),
        timeout = ?config.timeout,
        "dabmod-adapt starting"
    );

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received SIGINT, aborting");
            let _ = shutdown_tx.send(true);
        }
    });

    let client = ControlClient::new(config).with_shutdown(shutdown_rx);
    let outcome = cli::run(&client, cli.command).await?;
    println!("{}", outcome.render(cli.json));
    Ok(())
}
