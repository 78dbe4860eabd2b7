use anyhow::{Context, Result};
use clap::Parser;
use sitesync::backend::ObjectStoreBackend;
use sitesync::config::Cli;
use sitesync::pipeline::run_sync;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Cli::parse().into_config()?;

    // Backend construction is the only fatal error class; everything past
    // this point degrades to logged, counted per-file failures.
    let backend = ObjectStoreBackend::s3_from_env(&config.bucket)
        .with_context(|| format!("failed to construct backend for bucket {}", config.bucket))?;

    info!(
        "syncing {} to bucket {}",
        config.root.display(),
        config.bucket
    );
    run_sync(config, Arc::new(backend)).await?;

    Ok(())
}
