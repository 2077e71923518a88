use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use earshot::config::{Cli, Command};
use earshot::peer::{run_call, run_host, run_join};
use earshot::server::{AnswerService, PeerFactory, serve};
use earshot::telemetry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    telemetry::init(&log_config).context("initializing logging")?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    match cli.command {
        Command::Serve(args) => {
            let config = args.to_config();
            let listener = tokio::net::TcpListener::bind(config.bind)
                .await
                .with_context(|| format!("binding {}", config.bind))?;
            info!(addr = %listener.local_addr()?, "answer endpoint listening");
            let service = AnswerService::new(
                Arc::new(PeerFactory::new(config.peer.clone())),
                config.peer.ice_timeout,
            )
            .with_hold(config.peer.hold);
            serve(listener, service, cancel)
                .await
                .context("answer endpoint")?;
        }
        Command::Call(args) => {
            run_call(&args.server, &args.peer.to_config(), &cancel)
                .await
                .context("call failed")?;
        }
        Command::Host(args) => {
            run_host(
                &args.relay.relay_url,
                args.relay.to_config(),
                &args.peer.to_config(),
                &cancel,
            )
            .await
            .context("hosting failed")?;
        }
        Command::Join(args) => {
            run_join(
                &args.session_id,
                &args.relay.relay_url,
                args.relay.to_config(),
                &args.peer.to_config(),
                &cancel,
            )
            .await
            .with_context(|| format!("joining session {} failed", args.session_id))?;
        }
    }
    Ok(())
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received; shutting down");
                cancel.cancel();
            }
            Err(err) => warn!(error = %err, "cannot listen for ctrl-c"),
        }
    });
}
