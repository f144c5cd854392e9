//! Alias management
//!
//! Aliases are named references to S3 or Google Cloud Storage endpoints,
//! including connection details and credentials.

use serde::{Deserialize, Serialize};

use crate::config::{ConfigManager, HttpSettings};
use crate::error::{Error, Result};

/// Access and secret key pair used to sign requests
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Access key ID
    pub access_key: String,

    /// Secret access key
    pub secret_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .finish()
    }
}

/// An alias represents a named storage endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alias {
    /// Unique name for this alias
    pub name: String,

    /// Service endpoint, with or without a scheme
    pub endpoint: String,

    /// Access key ID, empty for anonymous access
    #[serde(default)]
    pub access_key: String,

    /// Secret access key, empty for anonymous access
    #[serde(default)]
    pub secret_key: String,

    /// Service dialect: "s3" or "gcs"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Bucket lookup style: "auto", "path", or "dns"
    #[serde(default = "default_bucket_lookup")]
    pub bucket_lookup: String,

    /// Allow insecure TLS connections
    #[serde(default)]
    pub insecure: bool,

    /// Per-alias HTTP settings replacing the global `[http]` section
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpSettings>,
}

fn default_provider() -> String {
    "s3".to_string()
}

fn default_bucket_lookup() -> String {
    "auto".to_string()
}

impl Alias {
    /// Create a new alias with required fields
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            provider: default_provider(),
            bucket_lookup: default_bucket_lookup(),
            insecure: false,
            http: None,
        }
    }

    /// Signing credentials, or `None` for an anonymous alias
    pub fn credentials(&self) -> Option<Credentials> {
        if self.access_key.is_empty() || self.secret_key.is_empty() {
            return None;
        }
        Some(Credentials {
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
        })
    }

    /// Get the effective HTTP settings given the global defaults
    pub fn http_settings(&self, global: &HttpSettings) -> HttpSettings {
        self.http.clone().unwrap_or_else(|| global.clone())
    }
}

/// Manager for alias operations
pub struct AliasManager {
    config_manager: ConfigManager,
}

impl AliasManager {
    /// Create a new AliasManager with a specific ConfigManager
    pub fn with_config_manager(config_manager: ConfigManager) -> Self {
        Self { config_manager }
    }

    /// Create a new AliasManager using the default config location
    pub fn new() -> Result<Self> {
        let config_manager = ConfigManager::new()?;
        Ok(Self { config_manager })
    }

    /// Global HTTP settings from the configuration file
    pub fn http_settings(&self) -> Result<HttpSettings> {
        Ok(self.config_manager.load()?.http)
    }

    /// List all configured aliases
    pub fn list(&self) -> Result<Vec<Alias>> {
        let config = self.config_manager.load()?;
        Ok(config.aliases)
    }

    /// Get an alias by name
    pub fn get(&self, name: &str) -> Result<Alias> {
        let config = self.config_manager.load()?;
        config
            .aliases
            .into_iter()
            .find(|a| a.name == name)
            .ok_or_else(|| Error::AliasNotFound(name.to_string()))
    }

    /// Add or update an alias
    pub fn set(&self, alias: Alias) -> Result<()> {
        let mut config = self.config_manager.load()?;

        config.aliases.retain(|a| a.name != alias.name);
        config.aliases.push(alias);

        self.config_manager.save(&config)
    }

    /// Remove an alias
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut config = self.config_manager.load()?;
        let original_len = config.aliases.len();

        config.aliases.retain(|a| a.name != name);

        if config.aliases.len() == original_len {
            return Err(Error::AliasNotFound(name.to_string()));
        }

        self.config_manager.save(&config)
    }

    /// Check if an alias exists
    pub fn exists(&self, name: &str) -> Result<bool> {
        let config = self.config_manager.load()?;
        Ok(config.aliases.iter().any(|a| a.name == name))
    }
}
