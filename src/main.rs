use clap::Parser;
use limitwatch::application::system::Application;
use limitwatch::config::Config;
use std::path::PathBuf;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "limitwatch", about = "Real-time trading-signal tracking engine")]
struct Args {
    /// Directory holding the JSON configuration files
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// SQLite database URL (e.g. sqlite://data/limitwatch.db)
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    info!("Initializing limitwatch...");

    let mut config = Config::from_env()?;
    if let Some(config_dir) = args.config_dir {
        config.config_dir = config_dir;
    }
    if let Some(database_url) = args.database_url {
        config.database_url = database_url;
    }

    let app = Application::build(config).await?;
    let handle = app.start().await?;

    let mut shutdown_rx = handle.shutdown.subscribe();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received Ctrl+C signal."),
                Err(e) => error!("Unable to listen for shutdown signal: {}", e),
            }
        }
        _ = shutdown_rx.changed() => {
            info!("Shutdown requested via control plane.");
        }
    }

    handle.shutdown.shutdown().await;
    if let Ok(snapshot) = handle.metrics.export() {
        tracing::debug!("Final metrics:\n{}", snapshot);
    }
    info!("Goodbye.");
    Ok(())
}
