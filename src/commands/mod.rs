// ABOUTME: Command implementations for each delta sync step and the combined run
// ABOUTME: Resolves shared settings and moves step payloads between files, stdin and stdout

pub mod run;
pub mod steps;

use anyhow::{Context, Result};
use clap::Args;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::postgres::ConnectOptions;

/// Settings shared by every subcommand.
#[derive(Args, Clone, Debug, Default)]
pub struct SettingsArgs {
    /// Path to a TOML file with sync settings
    #[arg(long = "config", env = "DELTA_SYNC_CONFIG", global = true)]
    pub config_path: Option<PathBuf>,
    /// Watermark key for this source/destination pair
    #[arg(long, env = "SYNC_KEY", global = true)]
    pub sync_key: Option<String>,
    /// Rows per upsert statement
    #[arg(long, global = true)]
    pub page_size: Option<usize>,
    /// File holding the extraction query (binds the watermark as its only parameter)
    #[arg(long, global = true)]
    pub source_query_file: Option<PathBuf>,
    /// Timeout in seconds for establishing database connections
    #[arg(long, global = true)]
    pub connect_timeout: Option<u64>,
    /// Allow self-signed TLS certificates (insecure - use only for testing)
    #[arg(long = "allow-self-signed-certs", global = true, default_value_t = false)]
    pub allow_self_signed_certs: bool,
}

impl SettingsArgs {
    /// Merge the config file (if any) with command-line overrides and validate.
    pub fn resolve(&self) -> Result<SyncConfig> {
        let mut config = match &self.config_path {
            Some(path) => SyncConfig::load(path)?,
            None => SyncConfig::default(),
        };

        if let Some(key) = &self.sync_key {
            config.sync_key = key.clone();
        }
        if let Some(page_size) = self.page_size {
            config.page_size = page_size;
        }
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout_secs = timeout;
        }
        if let Some(path) = &self.source_query_file {
            config = config.with_source_query_file(path)?;
        }

        config.validate().context("Invalid sync settings")?;
        Ok(config)
    }

    pub fn connect_options(&self, config: &SyncConfig) -> ConnectOptions {
        ConnectOptions {
            connect_timeout: config.connect_timeout(),
            allow_self_signed_certs: self.allow_self_signed_certs,
        }
    }
}

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

/// Read a JSON step payload from `path`, or from stdin when `path` is `-`.
pub fn read_payload<T: DeserializeOwned>(path: &Path) -> crate::error::Result<T> {
    let mut contents = String::new();
    if is_stdio(path) {
        std::io::stdin()
            .read_to_string(&mut contents)
            .map_err(|e| SyncError::payload("Failed to read payload from stdin", e))?;
    } else {
        contents = std::fs::read_to_string(path)
            .map_err(|e| SyncError::payload(format!("Failed to read payload from {:?}", path), e))?;
    }
    serde_json::from_str(&contents)
        .map_err(|e| SyncError::payload(format!("Failed to parse payload from {:?}", path), e))
}

/// Write a JSON step payload to `path`, or to stdout when `path` is absent or `-`.
pub fn write_payload<T: Serialize>(value: &T, path: Option<&Path>) -> crate::error::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| SyncError::payload("Failed to serialize payload", e))?;
    match path {
        Some(path) if !is_stdio(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        SyncError::payload(format!("Failed to create directory {:?}", parent), e)
                    })?;
                }
            }
            std::fs::write(path, json).map_err(|e| {
                SyncError::payload(format!("Failed to write payload to {:?}", path), e)
            })?;
        }
        _ => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", json)
                .map_err(|e| SyncError::payload("Failed to write payload to stdout", e))?;
        }
    }
    Ok(())
}
