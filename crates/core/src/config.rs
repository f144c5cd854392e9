//! Configuration management
//!
//! This module handles loading, saving, and migrating the stowage configuration file.
//! The configuration file is stored in TOML format at ~/.config/stowage/config.toml,
//! or under `$STOWAGE_CONFIG_DIR` when that variable is set.
//!
//! PROTECTED FILE: Changes to schema_version require migration support.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::alias::Alias;
use crate::error::{Error, Result};

/// Current configuration schema version
///
/// IMPORTANT: Bumping this version requires:
/// 1. Adding a migration step in `ConfigManager::migrate`
/// 2. Updating migration tests
/// 3. Marking the change as BREAKING
pub const SCHEMA_VERSION: u32 = 1;

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "STOWAGE_CONFIG_DIR";

/// Default output format
const DEFAULT_OUTPUT: &str = "human";

/// Default color setting
const DEFAULT_COLOR: &str = "auto";

/// Default bound for request-level retries
pub const DEFAULT_RETRY_MAX: u32 = 5;

/// Default bound for 500/503 retries
pub const DEFAULT_INTERNAL_ERROR_RETRY_MAX: u32 = 5;

/// Default replay buffer for upload streams that cannot seek
pub const DEFAULT_STREAM_RETRY_BUFFER_SIZE: usize = 131_072;

/// Default connect and socket timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Schema version for migration support
    pub schema_version: u32,

    /// Default settings
    #[serde(default)]
    pub defaults: Defaults,

    /// HTTP tuning shared by all aliases
    #[serde(default)]
    pub http: HttpSettings,

    /// Configured aliases
    #[serde(default)]
    pub aliases: Vec<Alias>,
}

/// Default settings for CLI behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    /// Output format: "human" or "json"
    #[serde(default = "default_output")]
    pub output: String,

    /// Color mode: "auto", "always", or "never"
    #[serde(default = "default_color")]
    pub color: String,

    /// Show progress bars
    #[serde(default = "default_true")]
    pub progress: bool,
}

/// HTTP and retry tuning for the REST client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Retries for RequestTimeout, clock skew, spurious PUT NoSuchKey
    /// and transport failures
    #[serde(default = "default_retry_max")]
    pub retry_max: u32,

    /// Retries for 500 and 503 responses
    #[serde(default = "default_internal_error_retry_max")]
    pub internal_error_retry_max: u32,

    /// Bytes retained for replaying forward-only upload streams
    #[serde(default = "default_stream_retry_buffer_size")]
    pub stream_retry_buffer_size: usize,

    /// Process-wide upload rate limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_upload_bytes_per_second: Option<u64>,

    /// Connection timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Read timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub socket_timeout_ms: u64,

    /// Use https for endpoints given without a scheme
    #[serde(default = "default_true")]
    pub https_only: bool,

    /// Always address buckets in the path, never as a subdomain
    #[serde(default)]
    pub disable_dns_buckets: bool,

    /// User-Agent header value
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Storage class applied to uploads that don't name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_storage_class: Option<String>,
}

fn default_output() -> String {
    DEFAULT_OUTPUT.to_string()
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

fn default_true() -> bool {
    true
}

fn default_retry_max() -> u32 {
    DEFAULT_RETRY_MAX
}

fn default_internal_error_retry_max() -> u32 {
    DEFAULT_INTERNAL_ERROR_RETRY_MAX
}

fn default_stream_retry_buffer_size() -> usize {
    DEFAULT_STREAM_RETRY_BUFFER_SIZE
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_user_agent() -> String {
    format!("stowage/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            progress: true,
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            retry_max: DEFAULT_RETRY_MAX,
            internal_error_retry_max: DEFAULT_INTERNAL_ERROR_RETRY_MAX,
            stream_retry_buffer_size: DEFAULT_STREAM_RETRY_BUFFER_SIZE,
            max_upload_bytes_per_second: None,
            connect_timeout_ms: DEFAULT_TIMEOUT_MS,
            socket_timeout_ms: DEFAULT_TIMEOUT_MS,
            https_only: true,
            disable_dns_buckets: false,
            user_agent: default_user_agent(),
            default_storage_class: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            defaults: Defaults::default(),
            http: HttpSettings::default(),
            aliases: Vec::new(),
        }
    }
}

/// Configuration manager handles loading and saving config
#[derive(Debug)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the default config path
    pub fn new() -> Result<Self> {
        let config_dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::config_dir()
                .ok_or_else(|| Error::Config("Could not determine config directory".into()))?
                .join("stowage"),
        };
        let config_path = config_dir.join("config.toml");
        Ok(Self { config_path })
    }

    /// Create a ConfigManager with a custom path (useful for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Load configuration from disk
    ///
    /// If the configuration file doesn't exist, returns a default configuration.
    /// If the schema version doesn't match, attempts migration.
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&self.config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        if config.schema_version < SCHEMA_VERSION {
            config = self.migrate(config)?;
        } else if config.schema_version > SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "Configuration file version {} is newer than supported version {}. Please upgrade stowage.",
                config.schema_version, SCHEMA_VERSION
            )));
        }

        Ok(config)
    }

    /// Save configuration to disk
    ///
    /// Creates parent directories if they don't exist.
    /// Sets file permissions to 600 (owner read/write only).
    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(config)?;
        std::fs::write(&self.config_path, content)?;

        // Credentials live in this file
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.config_path, permissions)?;
        }

        tracing::debug!(path = %self.config_path.display(), "Saved configuration");
        Ok(())
    }

    /// Migrate configuration from older schema version
    fn migrate(&self, config: Config) -> Result<Config> {
        let mut config = config;
        tracing::debug!(
            from = config.schema_version,
            to = SCHEMA_VERSION,
            "Migrating configuration"
        );
        config.schema_version = SCHEMA_VERSION;
        Ok(config)
    }
}
