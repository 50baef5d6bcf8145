//! Stand-in modulator for local development.
//!
//! Serves a stateful stub engine seeded with typical gain settings until
//! Ctrl-C. Point `dabmod-adapt --port` at it.

use anyhow::{Context, Result};
use dabmod_sim::StubEngine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let mut args = std::env::args().skip(1);
    let mut bind = "127.0.0.1".to_string();
    let mut port: u16 = 9400;
    let mut txgain = "40".to_string();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bind" => {
                bind = args.next().context("missing --bind value")?;
            }
            "--port" => {
                port = args
                    .next()
                    .context("missing --port value")?
                    .parse()
                    .context("invalid --port value")?;
            }
            "--txgain" => {
                txgain = args.next().context("missing --txgain value")?;
            }
            other => {
                tracing::warn!(arg = other, "ignoring unknown argument");
            }
        }
    }

    let engine = StubEngine::builder()
        .param("uhd", "txgain", &txgain)
        .param("uhd", "rxgain", "30")
        .param("gain", "digital", "0.80000")
        .spawn_on(&format!("{bind}:{port}"))
        .await
        .with_context(|| format!("cannot listen on {bind}:{port}"))?;

    tracing::info!(endpoint = %engine.endpoint(), "dummy engine ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!(
        pings = engine.pings(),
        commands = engine.messages().len(),
        "dummy engine stopped"
    );
    Ok(())
}
