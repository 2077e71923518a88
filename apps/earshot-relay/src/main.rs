use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use earshot_relay::{RelayState, serve};
use tracing::info;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "earshot-relay", about = "In-memory SDP rendezvous relay for local testing")]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "EARSHOT_RELAY_BIND", default_value = "127.0.0.1:8787")]
    bind: SocketAddr,

    /// Tracing filter used when RUST_LOG is unset.
    #[arg(long, env = "EARSHOT_RELAY_LOG", default_value = "info")]
    log_filter: String,

    /// Refuse to replace a role's description once it is published.
    #[arg(long, env = "EARSHOT_RELAY_SEAL")]
    seal_descriptions: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    Registry::default()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("binding {}", cli.bind))?;

    let state = if cli.seal_descriptions {
        RelayState::new().sealed()
    } else {
        RelayState::new()
    };
    info!(addr = %listener.local_addr()?, sealed = cli.seal_descriptions, "earshot relay listening");

    tokio::select! {
        result = serve(listener, state) => result.context("relay server")?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
