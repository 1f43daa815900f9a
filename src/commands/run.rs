// ABOUTME: Runs the full delta sync pipeline once or continuously
// ABOUTME: Continuous mode repeats cycles at the configured interval until Ctrl+C

use anyhow::{Context, Result};
use clap::Args;

use super::{write_payload, SettingsArgs};
use crate::delta::{Endpoint, SyncDaemon};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Source connection string (postgresql://... or sqlite:/path)
    #[arg(long, env = "SOURCE_URL")]
    pub source: String,
    /// Destination connection string (postgresql://... or sqlite:/path)
    #[arg(long, env = "TARGET_URL")]
    pub target: String,
    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,
    /// Seconds between cycles in continuous mode
    #[arg(long)]
    pub interval: Option<u64>,
}

pub async fn run(args: RunArgs, settings: &SettingsArgs) -> Result<()> {
    let mut config = settings.resolve()?;
    if let Some(interval) = args.interval {
        config.sync_interval_secs = interval;
        config.validate().context("Invalid sync interval")?;
    }
    let options = settings.connect_options(&config);

    let source = Endpoint::parse(&args.source).context("Invalid source")?;
    let target = Endpoint::parse(&args.target).context("Invalid target")?;
    tracing::info!("Syncing '{}' from {} to {}", config.sync_key, source, target);

    let daemon = SyncDaemon::new(source, target, config, options);
    daemon
        .provision()
        .await
        .context("Failed to provision destination tables")?;

    if args.once {
        let report = daemon.run_sync_cycle().await.context("Sync cycle failed")?;
        tracing::info!(
            "Sync cycle complete: {} rows extracted, {} merged, watermark {} -> {}",
            report.rows_extracted,
            report.outcome.rows_affected(),
            report.watermark_before,
            report.watermark_after
        );
        write_payload(&report, None)?;
        return Ok(());
    }

    tracing::info!(
        "Starting continuous delta sync every {}s, press Ctrl+C to stop",
        daemon.config().sync_interval_secs
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Received shutdown signal");
        let _ = shutdown_tx_clone.send(());
    });

    daemon.run(shutdown_rx).await?;
    Ok(())
}
