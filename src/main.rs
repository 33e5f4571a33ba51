use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use shutterfeed::config::{Cli, Command, PusherArgs, ServerArgs, ServerConfig};
use shutterfeed::pusher::{DirectoryDevice, HttpCatalog, SyncPlanner};
use shutterfeed::server::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shutterfeed=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => run_server(args).await,
        Command::Pusher(args) => run_pusher(args).await,
    }
}

async fn run_server(args: ServerArgs) -> anyhow::Result<()> {
    let config = ServerConfig::from_args(&args).context("unable to resolve photos directory")?;
    tracing::info!(dir = %config.photos_dir.display(), "starting server");

    let server = Server::new(config).context("unable to prepare server")?;
    server
        .run(shutdown_signal())
        .await
        .context("server terminated with an error")?;
    Ok(())
}

async fn run_pusher(args: PusherArgs) -> anyhow::Result<()> {
    tracing::info!(
        device = %args.device_dir.display(),
        server = %args.server_url,
        "starting pusher"
    );

    let device = DirectoryDevice::new(&args.device_dir);
    let remote = HttpCatalog::new(&args.server_url, args.upload_timeout())
        .context("unable to build HTTP client")?;

    SyncPlanner::new(device, remote)
        .run(args.refresh_interval(), shutdown_signal())
        .await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "unable to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
