//! Configuration loading and path resolution
//!
//! Settings come from `wdkp.toml`. Paths resolve in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing config file is not an error: defaults are used and a warning is
//! logged. Values that cannot work (zero capacity) are rejected by
//! [`BotConfig::validate`].

use crate::ingest::{AddonVariant, IngestSettings, DEFAULT_COMMENT_MAX_CHARS};
use crate::lua::{ParserOptions, DEFAULT_MAX_DEPTH};
use crate::time::days_to_seconds;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "WDKP_CONFIG";

/// Environment variable overriding the snapshot directory
pub const SNAPSHOT_DIR_ENV: &str = "WDKP_SNAPSHOT_DIR";

pub const CONFIG_FILE_NAME: &str = "wdkp.toml";

pub const DEFAULT_CAPACITY: usize = 16;

pub const DEFAULT_ACTIVITY_WINDOW_DAYS: u32 = 45;

/// Logging section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Contents of `wdkp.toml`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BotConfig {
    pub snapshot_dir: Option<PathBuf>,
    /// Maximum number of resident tenants
    pub capacity: usize,
    pub variant: AddonVariant,
    pub activity_window_days: u32,
    pub max_nesting_depth: usize,
    pub comment_max_chars: usize,
    pub smart_roles: bool,
    pub logging: LoggingConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: None,
            capacity: DEFAULT_CAPACITY,
            variant: AddonVariant::default(),
            activity_window_days: DEFAULT_ACTIVITY_WINDOW_DAYS,
            max_nesting_depth: DEFAULT_MAX_DEPTH,
            comment_max_chars: DEFAULT_COMMENT_MAX_CHARS,
            smart_roles: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl BotConfig {
    /// Parse TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::Config("capacity must be at least 1".to_string()));
        }
        if self.max_nesting_depth == 0 {
            return Err(Error::Config("max_nesting_depth must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Capacity as the residency manager takes it
    pub fn capacity(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.capacity)
            .ok_or_else(|| Error::Config("capacity must be at least 1".to_string()))
    }

    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            activity_window_secs: days_to_seconds(self.activity_window_days),
            parser: ParserOptions {
                max_depth: self.max_nesting_depth,
            },
            comment_max_chars: self.comment_max_chars,
            smart_roles: self.smart_roles,
        }
    }
}

/// Read the config at `path` without validating it
///
/// `Ok(None)` when the file does not exist. Nothing is logged, so this is
/// safe to call before tracing is installed.
pub fn read_config(path: &Path) -> Result<Option<BotConfig>> {
    match std::fs::read_to_string(path) {
        Ok(text) => BotConfig::from_toml_str(&text).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Load and validate the config at `path`
///
/// A missing file yields defaults with a warning; unreadable or invalid
/// content is an error.
pub fn load_config(path: &Path) -> Result<BotConfig> {
    let config = match read_config(path)? {
        Some(config) => {
            info!(path = %path.display(), "Loaded configuration");
            config
        }
        None => {
            warn!(path = %path.display(), "Config file not found, using defaults");
            BotConfig::default()
        }
    };
    config.validate()?;
    Ok(config)
}

/// Config file path: CLI > `WDKP_CONFIG` > platform config dir
pub fn resolve_config_path(cli_arg: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    default_config_path()
}

/// Snapshot directory: CLI > `WDKP_SNAPSHOT_DIR` > config file > platform default
pub fn resolve_snapshot_dir(cli_arg: Option<&Path>, config: &BotConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(SNAPSHOT_DIR_ENV) {
        return PathBuf::from(path);
    }
    if let Some(path) = &config.snapshot_dir {
        return path.clone();
    }
    default_snapshot_dir()
}

fn default_config_path() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.config/wdkp/wdkp.toml, else /etc/wdkp/wdkp.toml
        let user_config = dirs::config_dir().map(|d| d.join("wdkp").join(CONFIG_FILE_NAME));
        let system_config = PathBuf::from("/etc/wdkp").join(CONFIG_FILE_NAME);
        match user_config {
            Some(path) if path.exists() || !system_config.exists() => path,
            _ => system_config,
        }
    } else {
        dirs::config_dir()
            .map(|d| d.join("wdkp").join(CONFIG_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
    }
}

/// OS-dependent default data folder
pub fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("wdkp"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/wdkp"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("wdkp"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/wdkp"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("wdkp"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\wdkp"))
    } else {
        PathBuf::from("./wdkp_data")
    }
}

pub fn default_snapshot_dir() -> PathBuf {
    default_data_dir().join("snapshots")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = BotConfig::from_toml_str("capacity = 4\nvariant = \"community\"\n").unwrap();
        assert_eq!(config.capacity, 4);
        assert_eq!(config.variant, AddonVariant::Community);
        assert_eq!(config.activity_window_days, DEFAULT_ACTIVITY_WINDOW_DAYS);
        assert_eq!(config.logging.level, "info");
        assert!(config.snapshot_dir.is_none());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = BotConfig {
            capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        assert!(config.capacity().is_err());
    }

    #[test]
    fn test_ingest_settings_mapping() {
        let config = BotConfig {
            activity_window_days: 10,
            max_nesting_depth: 8,
            comment_max_chars: 20,
            smart_roles: true,
            ..Default::default()
        };
        let settings = config.ingest_settings();
        assert_eq!(settings.activity_window_secs, 864_000);
        assert_eq!(settings.parser.max_depth, 8);
        assert_eq!(settings.comment_max_chars, 20);
        assert!(settings.smart_roles);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        assert!(matches!(
            BotConfig::from_toml_str("capacity = \"many\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_default_snapshot_dir_under_data_dir() {
        assert!(default_snapshot_dir().starts_with(default_data_dir()));
        assert!(default_snapshot_dir().ends_with("snapshots"));
    }
}
