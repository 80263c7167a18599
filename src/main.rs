use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sd_file_server::{dump_config, ChannelTransport, Config, FileServer, StdStorage};

/// Serve the files of a storage card over HTTP.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host directory acting as the card's mount point.
    #[arg(long)]
    mount: Option<PathBuf>,

    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Allow downloads even if the configuration disables them.
    #[arg(long)]
    enable_download: bool,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(mount) = cli.mount {
        config.mount = mount;
    }
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if cli.enable_download {
        config.enable_download = true;
    }
    config.validate()?;

    let storage = StdStorage::new(&config.mount);
    dump_config(&config, &storage);

    let server = Arc::new(FileServer::new(&config, storage, ChannelTransport::current()));
    let (stop, stopped) = watch::channel(false);
    let driver = tokio::spawn(Arc::clone(&server).drive(stopped));

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("bind {}", config.listen))?;
    axum::serve(listener, server.router())
        .with_graceful_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutting down"),
                Err(e) => warn!(error = %e, "cannot listen for ctrl-c, shutting down"),
            }
        })
        .await?;

    let _ = stop.send(true);
    driver.await?;
    Ok(())
}
