// ABOUTME: CLI entry point for customer-delta-sync
// ABOUTME: Parses commands and routes to the step and run handlers

use clap::{Parser, Subcommand};
use customer_delta_sync::commands::{self, run::RunArgs, steps, SettingsArgs};

#[derive(Parser)]
#[command(name = "customer-delta-sync")]
#[command(about = "Watermark-driven delta sync of customer status records", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(flatten)]
    settings: SettingsArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the destination and watermark tables if they are missing
    Provision(steps::ProvisionArgs),
    /// Print the stored watermark (epoch when none is recorded)
    GetWatermark(steps::GetWatermarkArgs),
    /// Extract source rows changed after a watermark
    Extract(steps::ExtractArgs),
    /// Merge an extracted batch into the destination table
    Upsert(steps::UpsertArgs),
    /// Advance the watermark after a successful merge
    UpdateWatermark(steps::UpdateWatermarkArgs),
    /// Run every step in order, once or on an interval
    Run(RunArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    // Step payloads go to stdout, so logs go to stderr
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = &cli.settings;
    match cli.command {
        Commands::Provision(args) => steps::provision(args, settings).await,
        Commands::GetWatermark(args) => steps::get_watermark(args, settings).await,
        Commands::Extract(args) => steps::extract(args, settings).await,
        Commands::Upsert(args) => steps::upsert(args, settings).await,
        Commands::UpdateWatermark(args) => steps::update_watermark(args, settings).await,
        Commands::Run(args) => commands::run::run(args, settings).await,
    }
}
