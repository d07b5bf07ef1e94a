//! Fieldbook server - main entry point

use anyhow::{Context, Result};
use clap::Parser;
use fieldbook_server::api;
use fieldbook_server::state::ServerContext;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for fieldbook-server
#[derive(Parser, Debug)]
#[command(name = "fieldbook-server")]
#[command(about = "Local research journal server")]
#[command(version)]
struct Args {
    /// Port to listen on (loopback only)
    #[arg(short, long, env = "FIELDBOOK_PORT")]
    port: Option<u16>,

    /// Data directory holding studies, artifacts, and the API token
    #[arg(short, long, env = "FIELDBOOK_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldbook_server=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = fieldbook_server::config::resolve(args.data_dir, args.port)
        .context("Failed to resolve configuration")?;

    info!("Data directory: {}", config.data_dir.display());
    info!("API token file: {}", config.token_path().display());

    let ctx = Arc::new(
        ServerContext::new(config).context("Failed to initialize server context")?,
    );
    info!(
        "Viewer available at http://127.0.0.1:{}/",
        ctx.config.port
    );

    api::server::serve(ctx).await.context("Server error")?;
    Ok(())
}
