//! Configuration file parser for ~/.config/readersync/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted but logged, since they are usually typos.
use crate::source::Account;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides the configured password.
pub const PASSWORD_ENV: &str = "READERSYNC_PASSWORD";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Missing {0}: set it in the config file")]
    MissingCredentials(&'static str),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration. Any subset of keys may be given.
///
/// Debug output masks `password`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root URL of the aggregation service.
    pub base_url: String,

    /// Client name sent with every request.
    pub client_id: String,

    pub username: Option<String>,

    /// Account password. `READERSYNC_PASSWORD` takes precedence.
    pub password: Option<String>,

    /// How often `watch` runs an automatic update. 0 disables polling.
    pub poll_interval_minutes: u64,

    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "https://www.inoreader.com".to_string(),
            client_id: "readersync".to_string(),
            username: None,
            password: None,
            poll_interval_minutes: 10,
            request_timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("poll_interval_minutes", &self.poll_interval_minutes)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "base_url",
        "client_id",
        "username",
        "password",
        "poll_interval_minutes",
        "request_timeout_secs",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing or empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), base_url = %config.base_url, "Loaded configuration");
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// `None` when polling is disabled.
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_minutes > 0)
            .then(|| Duration::from_secs(self.poll_interval_minutes.saturating_mul(60)))
    }

    /// Account credentials, with the password taken from `env_password` when given.
    pub fn account(&self, env_password: Option<String>) -> Result<Account, ConfigError> {
        let username = self
            .username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingCredentials("username"))?;
        let password = env_password
            .filter(|p| !p.is_empty())
            .or_else(|| self.password.clone())
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::MissingCredentials("password"))?;

        Ok(Account {
            username: username.to_string(),
            password: SecretString::from(password),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
