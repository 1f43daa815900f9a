// ABOUTME: Independently invocable delta sync steps for an external scheduler
// ABOUTME: Each step reads the previous step's JSON payload and writes its own

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use std::path::PathBuf;

use super::{read_payload, write_payload, SettingsArgs};
use crate::delta::{Endpoint, ExtractedBatch, MergeOutcome, SyncDaemon, WatermarkPayload};

#[derive(Args, Debug)]
pub struct ProvisionArgs {
    /// Destination connection string (postgresql://... or sqlite:/path)
    #[arg(long, env = "TARGET_URL")]
    pub target: String,
}

#[derive(Args, Debug)]
pub struct GetWatermarkArgs {
    #[arg(long, env = "TARGET_URL")]
    pub target: String,
    /// Where to write the watermark payload (stdout if omitted)
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Source connection string (postgresql://... or sqlite:/path)
    #[arg(long, env = "SOURCE_URL")]
    pub source: String,
    /// Watermark payload from get-watermark (`-` for stdin)
    #[arg(long, conflicts_with = "since")]
    pub input: Option<PathBuf>,
    /// Extract rows changed after this RFC 3339 timestamp instead of reading a payload
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,
    /// Where to write the extracted batch (stdout if omitted)
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct UpsertArgs {
    #[arg(long, env = "TARGET_URL")]
    pub target: String,
    /// Batch payload from extract (`-` for stdin)
    #[arg(long, default_value = "-")]
    pub input: PathBuf,
    /// Where to write the merge outcome (stdout if omitted)
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct UpdateWatermarkArgs {
    #[arg(long, env = "TARGET_URL")]
    pub target: String,
    /// Batch payload from extract
    #[arg(long)]
    pub batch: PathBuf,
    /// Outcome payload from upsert
    #[arg(long)]
    pub outcome: PathBuf,
    /// Where to write the advance result (stdout if omitted)
    #[arg(long)]
    pub output: Option<PathBuf>,
}

fn target_daemon(target: &str, settings: &SettingsArgs) -> Result<SyncDaemon> {
    let config = settings.resolve()?;
    let options = settings.connect_options(&config);
    let target = Endpoint::parse(target).context("Invalid target")?;
    Ok(SyncDaemon::for_target(target, config, options))
}

pub async fn provision(args: ProvisionArgs, settings: &SettingsArgs) -> Result<()> {
    let daemon = target_daemon(&args.target, settings)?;
    daemon
        .provision()
        .await
        .context("Failed to provision destination tables")?;
    Ok(())
}

pub async fn get_watermark(args: GetWatermarkArgs, settings: &SettingsArgs) -> Result<()> {
    let daemon = target_daemon(&args.target, settings)?;
    let watermark = daemon
        .read_watermark()
        .await
        .context("Failed to read watermark")?;
    write_payload(&watermark, args.output.as_deref())?;
    Ok(())
}

pub async fn extract(args: ExtractArgs, settings: &SettingsArgs) -> Result<()> {
    let config = settings.resolve()?;
    let options = settings.connect_options(&config);
    let source = Endpoint::parse(&args.source).context("Invalid source")?;

    let watermark = match (args.since, &args.input) {
        (Some(since), _) => WatermarkPayload {
            key: config.sync_key.clone(),
            last_ts: since,
        },
        (None, Some(input)) => read_payload(input)?,
        (None, None) => read_payload(std::path::Path::new("-"))?,
    };
    if watermark.key != config.sync_key {
        tracing::warn!(
            "Watermark payload is for '{}' but the configured key is '{}'",
            watermark.key,
            config.sync_key
        );
    }

    let daemon = SyncDaemon::for_source(source, config, options);
    let batch = daemon
        .extract(&watermark)
        .await
        .context("Failed to extract changes from source")?;
    write_payload(&batch, args.output.as_deref())?;
    Ok(())
}

pub async fn upsert(args: UpsertArgs, settings: &SettingsArgs) -> Result<()> {
    let daemon = target_daemon(&args.target, settings)?;
    let batch: ExtractedBatch = read_payload(&args.input)?;
    let outcome = daemon
        .merge(&batch)
        .await
        .context("Failed to merge changes into destination")?;
    write_payload(&outcome, args.output.as_deref())?;
    Ok(())
}

pub async fn update_watermark(args: UpdateWatermarkArgs, settings: &SettingsArgs) -> Result<()> {
    let daemon = target_daemon(&args.target, settings)?;
    let batch: ExtractedBatch = read_payload(&args.batch)?;
    let outcome: MergeOutcome = read_payload(&args.outcome)?;
    let advanced = daemon
        .advance(&batch, outcome)
        .await
        .context("Failed to update watermark")?;
    write_payload(&advanced, args.output.as_deref())?;
    Ok(())
}
