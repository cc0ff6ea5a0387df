//! Configuration loading and data folder resolution
//!
//! Missing or absent TOML files never abort startup: the loader logs a
//! warning and falls back to defaults. Every field in the file is optional.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the data folder
pub const DATA_FOLDER_ENV: &str = "NEEDLE_DATA_FOLDER";

/// Config file name looked up in the user's config directory
pub const CONFIG_FILE_NAME: &str = "needle.toml";

/// On-disk TOML configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Folder holding the SQLite store
    pub data_folder: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub enrichment: EnrichmentSection,
    #[serde(default)]
    pub http: HttpSection,
    /// Minimum interval between requests, in milliseconds, keyed by service name
    #[serde(default)]
    pub rate_limits: BTreeMap<String, u64>,
    /// Per-provider credentials and endpoints, keyed by service name
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSection>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Collection sync settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSection {
    pub cooldown_hours: Option<u64>,
    pub page_size: Option<u32>,
}

/// Enrichment pipeline settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentSection {
    pub batch_size: Option<usize>,
    pub concurrency: Option<usize>,
    pub max_batches_per_drain: Option<usize>,
    pub lock_ttl_secs: Option<u64>,
}

/// Outbound HTTP settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpSection {
    pub interactive_timeout_secs: Option<u64>,
    pub slow_timeout_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub user_agent: Option<String>,
}

/// Credentials and endpoint for one upstream provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSection {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

/// Default config file path (`<config dir>/needle/needle.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("needle").join(CONFIG_FILE_NAME))
}

/// Load TOML configuration
///
/// A missing file yields the default configuration with a warning. A file
/// that exists but cannot be parsed is an error: silently ignoring a typo
/// in a rate-limit window would be worse than refusing to start.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "Config file not found, using defaults"
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    debug!(path = %path.display(), "Loaded TOML config");
    Ok(config)
}

/// Write TOML configuration atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Data folder resolution
///
/// Priority order:
/// 1. Command-line argument
/// 2. `NEEDLE_DATA_FOLDER` environment variable
/// 3. `data_folder` from the TOML config
/// 4. OS-dependent default
pub struct DataFolderResolver<'a> {
    cli_arg: Option<&'a Path>,
    toml_config: Option<&'a TomlConfig>,
}

impl<'a> DataFolderResolver<'a> {
    pub fn new() -> Self {
        Self {
            cli_arg: None,
            toml_config: None,
        }
    }

    pub fn with_cli_arg(mut self, path: Option<&'a Path>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml(mut self, config: &'a TomlConfig) -> Self {
        self.toml_config = Some(config);
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = self.cli_arg {
            return path.to_path_buf();
        }

        if let Ok(path) = std::env::var(DATA_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = self.toml_config.and_then(|c| c.data_folder.clone()) {
            return path;
        }

        default_data_folder()
    }
}

impl Default for DataFolderResolver<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// OS-dependent default data folder
pub fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("needle"))
        .unwrap_or_else(|| PathBuf::from("./needle_data"))
}

/// Ensure the data folder exists and return the store database path inside it
pub fn prepare_data_folder(folder: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(folder)?;
    Ok(folder.join("needle.db"))
}
