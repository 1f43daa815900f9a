// ABOUTME: Configuration for customer delta sync runs
// ABOUTME: Loads optional TOML settings and validates them before any connection is opened

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, SyncError};

/// Watermark key used when none is configured.
pub const DEFAULT_SYNC_KEY: &str = "oracle_clientes_acomp";

/// Rows per upsert statement.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Settings shared by every step of a sync run.
///
/// All fields have defaults, so an empty TOML file is a valid configuration:
///
/// ```toml
/// sync_key = "oracle_clientes_acomp"
/// page_size = 1000
/// epoch = "1970-01-01T00:00:00Z"
/// connect_timeout_secs = 30
/// sync_interval_secs = 3600
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Identifier of the watermark row for this source/destination pair
    pub sync_key: String,
    /// Maximum rows sent in one upsert statement
    pub page_size: usize,
    /// Watermark assumed when none has been persisted yet
    pub epoch: DateTime<Utc>,
    /// Extraction query override; must bind the watermark as its only parameter
    pub source_query: Option<String>,
    /// Transport-level timeout for establishing connections
    pub connect_timeout_secs: u64,
    /// Interval between cycles when running continuously
    pub sync_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_key: DEFAULT_SYNC_KEY.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            epoch: DateTime::<Utc>::default(), // 1970-01-01T00:00:00Z
            source_query: None,
            connect_timeout_secs: 30,
            sync_interval_secs: 3600, // 1 hour
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&contents)
            .map_err(|e| SyncError::Config(format!("{:?}: {}", path, e)))
    }

    pub fn from_toml_str(contents: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Read the extraction query from a file, replacing any configured query.
    pub fn with_source_query_file(mut self, path: &Path) -> Result<Self> {
        let query = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("failed to read source query file {:?}: {}", path, e))
        })?;
        self.source_query = Some(query);
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync_key.trim().is_empty() {
            return Err(SyncError::Config("sync_key cannot be empty".to_string()));
        }
        if self.page_size == 0 {
            return Err(SyncError::Config(
                "page_size must be greater than zero".to_string(),
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(SyncError::Config(
                "connect_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.sync_interval_secs == 0 {
            return Err(SyncError::Config(
                "sync_interval_secs must be greater than zero".to_string(),
            ));
        }
        if let Some(query) = &self.source_query {
            if query.trim().is_empty() {
                return Err(SyncError::Config(
                    "source_query cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sync_config_default() {
        let config = SyncConfig::default();
        assert_eq!(config.sync_key, "oracle_clientes_acomp");
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.epoch.to_rfc3339(), "1970-01-01T00:00:00+00:00");
        assert!(config.source_query.is_none());
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.sync_interval(), Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = SyncConfig::from_toml_str("").unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = SyncConfig::from_toml_str(
            r#"
            sync_key = "crm_status"
            page_size = 250
            epoch = "2020-01-01T00:00:00Z"
            "#,
        )
        .unwrap();
        assert_eq!(config.sync_key, "crm_status");
        assert_eq!(config.page_size, 250);
        assert_eq!(config.epoch.to_rfc3339(), "2020-01-01T00:00:00+00:00");
        assert_eq!(config.connect_timeout_secs, 30);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(SyncConfig::from_toml_str("batch = 10").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SyncConfig {
            page_size: 0,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());

        config.page_size = 10;
        config.sync_key = "  ".to_string();
        assert!(config.validate().is_err());

        config.sync_key = "k".to_string();
        config.source_query = Some(String::new());
        assert!(config.validate().is_err());

        config.source_query = None;
        config.connect_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_and_query_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("sync.toml");
        std::fs::write(&config_path, "page_size = 5\n").unwrap();

        let query_path = dir.path().join("select_delta.sql");
        let mut file = std::fs::File::create(&query_path).unwrap();
        writeln!(file, "SELECT 1 WHERE $1 IS NOT NULL").unwrap();

        let config = SyncConfig::load(&config_path)
            .unwrap()
            .with_source_query_file(&query_path)
            .unwrap();
        assert_eq!(config.page_size, 5);
        assert!(config.source_query.unwrap().starts_with("SELECT 1"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = SyncConfig::load(Path::new("/nonexistent/sync.toml")).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
