//! The `soap-bridge` binary: both bridge roles behind one HTTPS server.

use std::path::PathBuf;

use anyhow::{Context, Result};
use bridge_transport::tls::inbound::acceptor;
use clap::Parser;
use soap_bridge::{Bridge, BridgeConfig, SoapServer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Bridges mutually authenticated SOAP calls over a message bus.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "SOAP_BRIDGE_CONFIG", default_value = "soap-bridge.toml")]
    config: PathBuf,

    /// Log filter, e.g. `info` or `soap_bridge=debug,bridge_core=trace`.
    /// Falls back to `RUST_LOG`.
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match args.log_level {
        Some(ref level) => EnvFilter::try_new(level).context("invalid log level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = BridgeConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    info!(config = %args.config.display(), "configuration loaded");

    let inbound = config.inbound_options().context("inbound tls")?;
    let acceptor = acceptor(&inbound).context("failed to build inbound tls acceptor")?;

    let bridge = Bridge::loopback(&config).context("failed to start bridge")?;
    let server = SoapServer::bind(config.soap.listen, acceptor, bridge.endpoint())
        .await
        .with_context(|| format!("failed to bind {}", config.soap.listen))?
        .with_shutdown(bridge.shutdown_token());

    let token = bridge.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                token.cancel();
            }
            Err(e) => warn!(error = %e, "cannot listen for shutdown signal"),
        }
    });

    server.run().await.context("server failed")?;
    bridge.shutdown().await;

    Ok(())
}
