//! Configuration management for mailscan.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Main application configuration.
///
/// This is loaded from `~/.config/mailscan/config.toml` (or platform
/// equivalent). If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Database settings
    pub database: DatabaseConfig,
    /// Scan orchestration settings
    pub scan: ScanConfig,
    /// Mail provider / OAuth settings
    pub mail: MailConfig,
    /// Classification settings
    pub classify: ClassifyConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            tracing::debug!("Loading config from {}", config_path.display());
            let contents = fs::read_to_string(&config_path)?;
            let config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `MAILSCAN_DB_PATH`: override the database path
    /// - `MAILSCAN_BATCH_SIZE`: override the scan batch size
    /// - `MAILSCAN_OPENAI_API_KEY`: classification API key
    /// - `MAILSCAN_GOOGLE_CLIENT_SECRET`: OAuth client secret
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;

        if let Ok(val) = std::env::var("MAILSCAN_DB_PATH") {
            if !val.is_empty() {
                config.database.path = PathBuf::from(val);
            }
        }

        if let Ok(val) = std::env::var("MAILSCAN_BATCH_SIZE") {
            if let Ok(size) = val.parse() {
                config.scan.batch_size = size;
                tracing::debug!("Override scan.batch_size from env: {}", size);
            }
        }

        if let Ok(val) = std::env::var("MAILSCAN_OPENAI_API_KEY") {
            if !val.is_empty() {
                config.classify.api_key = Some(val);
            }
        }

        if let Ok(val) = std::env::var("MAILSCAN_GOOGLE_CLIENT_SECRET") {
            if !val.is_empty() {
                config.mail.google_client_secret = Some(val);
            }
        }

        Ok(config)
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "config_path".to_string(),
                reason: "no parent directory".to_string(),
            })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/mailscan/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("com", "mailscan", "mailscan").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/mailscan`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("com", "mailscan", "mailscan").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the `SQLite` database file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("mailscan.db"),
        }
    }
}

/// Scan orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Widest scan window a `prepare` may request, in days
    pub max_days: u32,
    /// Most candidate messages a single scan may cover
    pub max_messages: u32,
    /// Messages processed per batch unit
    pub batch_size: u32,
    /// Lookback applied when no checkpoint exists, in days
    pub default_lookback_days: u32,
    /// Attempts per external call before the scan escalates to error
    pub max_attempts: u32,
    /// Delay between retry attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Timeout budget for each external call in seconds
    pub call_timeout_secs: u64,
    /// Number of batch workers draining the scan queue
    pub workers: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_days: 90,
            max_messages: 2000,
            batch_size: 10,
            default_lookback_days: 21,
            max_attempts: 3,
            retry_delay_ms: 2000,
            call_timeout_secs: 60,
            workers: 4,
        }
    }
}

/// Mail provider / OAuth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// OAuth client ID for the Google token endpoint
    pub google_client_id: String,
    /// OAuth client secret (prefer the environment in production)
    #[serde(skip)]
    pub google_client_secret: Option<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            google_client_id: String::new(),
            google_client_secret: None,
        }
    }
}

/// Classification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifyConfig {
    /// Model identifier for the classification endpoint
    pub model: String,
    /// API key (stored in the environment, not on disk)
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Maximum completion tokens per classification
    pub max_tokens: u32,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            max_tokens: 250,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.scan.max_days, 90);
        assert_eq!(config.scan.max_messages, 2000);
        assert_eq!(config.scan.batch_size, 10);
        assert!(config.scan.max_attempts > 0);
        assert_eq!(config.classify.model, "gpt-4o-mini");
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("parse");
        assert_eq!(parsed.scan.batch_size, config.scan.batch_size);
        assert_eq!(parsed.database.path, config.database.path);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: AppConfig = toml::from_str("[scan]\nbatch_size = 25\n").expect("parse");
        assert_eq!(parsed.scan.batch_size, 25);
        // Untouched sections fall back to defaults.
        assert_eq!(parsed.scan.max_days, 90);
        assert_eq!(parsed.classify.max_tokens, 250);
    }

    #[test]
    fn test_secrets_never_serialized() {
        let mut config = AppConfig::default();
        config.classify.api_key = Some("sk-secret".to_string());
        config.mail.google_client_secret = Some("oauth-secret".to_string());
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        assert!(!toml_str.contains("sk-secret"));
        assert!(!toml_str.contains("oauth-secret"));
    }
}
