use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for threadsync
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// SQLite archive location
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Directory for JSON backups and CSV exports
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// JSON file holding the access token and its expiry
    #[serde(default = "default_token_file")]
    pub token_file: String,

    /// Threads API endpoints and request behavior
    #[serde(default)]
    pub api: ApiConfig,

    /// Token refresh settings
    #[serde(default)]
    pub token: TokenSettings,

    /// Synchronization behavior settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Threads API configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    /// Versioned Graph API root
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Long-lived token refresh endpoint
    #[serde(default = "default_refresh_url")]
    pub refresh_url: String,

    /// Posts requested per page
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,

    /// Timeout for a single HTTP request in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Retry behavior for post listing (paginated and time-range)
    #[serde(default = "default_posts_retry")]
    pub posts_retry: RetryConfig,

    /// Retry behavior for conversation fetches
    #[serde(default = "default_replies_retry")]
    pub replies_retry: RetryConfig,
}

/// Fixed-delay retry settings for HTTP failures
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts before the request is considered failed
    pub max_retries: u32,

    /// Pause between attempts in seconds
    pub delay_secs: u64,
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

/// Token refresh configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TokenSettings {
    /// Refresh once fewer than this many days remain
    #[serde(default = "default_refresh_threshold_days")]
    pub refresh_threshold_days: i64,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Write a JSON backup of fetched posts by default
    #[serde(default = "default_true")]
    pub backup: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact", "full", "pretty"
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_database_path() -> String {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        format!("{}/threadsync/threads.db", data_home)
    } else if let Ok(home) = std::env::var("HOME") {
        format!("{}/.local/share/threadsync/threads.db", home)
    } else {
        "./threads.db".to_string()
    }
}

fn default_output_dir() -> String {
    "./output".to_string()
}

fn default_token_file() -> String {
    config_dir()
        .map(|dir| dir.join("threadsync").join("token.json"))
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_else(|| "./token.json".to_string())
}

fn default_base_url() -> String {
    "https://graph.threads.net/v1.0".to_string()
}

fn default_refresh_url() -> String {
    "https://graph.threads.net/refresh_access_token".to_string()
}

fn default_page_limit() -> u32 {
    50
}

fn default_request_timeout() -> u64 {
    30
}

fn default_posts_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        delay_secs: 5,
    }
}

fn default_replies_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 5,
        delay_secs: 3,
    }
}

fn default_refresh_threshold_days() -> i64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

// Default implementations
impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            refresh_url: default_refresh_url(),
            page_limit: default_page_limit(),
            request_timeout: default_request_timeout(),
            posts_retry: default_posts_retry(),
            replies_retry: default_replies_retry(),
        }
    }
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            refresh_threshold_days: default_refresh_threshold_days(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backup: default_true(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let mut config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;
            config.expand_paths()?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        // Expand environment variables in paths
        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("threadsync").join("config.yml"))
    }

    /// Expand environment variables and `~` in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.database_path = shellexpand::full(&self.database_path)
            .context("Failed to expand database_path")?
            .into_owned();

        self.output_dir = shellexpand::full(&self.output_dir)
            .context("Failed to expand output_dir")?
            .into_owned();

        self.token_file = shellexpand::full(&self.token_file)
            .context("Failed to expand token_file")?
            .into_owned();

        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.database_path)
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.output_dir)
    }

    pub fn token_file_path(&self) -> PathBuf {
        PathBuf::from(&self.token_file)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            output_dir: default_output_dir(),
            token_file: default_token_file(),
            api: ApiConfig::default(),
            token: TokenSettings::default(),
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
