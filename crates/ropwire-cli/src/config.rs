//! Configuration file for the ropwire CLI.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ropwire_core::{ClientConfig, DEFAULT_MAX_BUFFER_SIZE, MAX_RESPONSE_BUFFER_SIZE};
use ropwire_server::ServerConfig;
use serde::{Deserialize, Serialize};

/// Smallest buffer that still holds a framed ROP
const MIN_BUFFER_SIZE: usize = 64;

/// ropwire configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Client-side exchange limits
    #[serde(default)]
    pub client: ClientSection,
    /// In-memory server used by `demo`
    #[serde(default)]
    pub server: ServerConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    /// Largest request buffer sent to the server
    #[serde(default = "default_buffer_size")]
    pub max_request_size: usize,
    /// Largest response buffer accepted
    #[serde(default = "default_buffer_size")]
    pub max_response_size: usize,
    /// Retries after RopBackoff before giving up
    #[serde(default = "default_backoff_retries")]
    pub max_backoff_retries: u32,
    /// Cap on a single backoff pause, in milliseconds
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Obfuscate request payloads with XorMagic
    #[serde(default)]
    pub obfuscate: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

// Default values

fn default_buffer_size() -> usize {
    DEFAULT_MAX_BUFFER_SIZE
}

fn default_backoff_retries() -> u32 {
    3
}

fn default_backoff_cap_ms() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            max_request_size: default_buffer_size(),
            max_response_size: default_buffer_size(),
            max_backoff_retries: default_backoff_retries(),
            backoff_cap_ms: default_backoff_cap_ms(),
            obfuscate: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl ClientSection {
    /// Limits handed to [`ropwire_core::Client`]
    #[must_use]
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            max_request_size: self.max_request_size,
            max_response_size: self.max_response_size,
            max_backoff_retries: self.max_backoff_retries,
            backoff_cap: Duration::from_millis(self.backoff_cap_ms),
            obfuscate: self.obfuscate,
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("ropwire/config.toml")
    }

    /// Load `path`, or the default path when it exists, or built-in defaults
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file is missing or any
    /// file that exists cannot be parsed.
    pub fn resolve(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.client.max_request_size < MIN_BUFFER_SIZE
            || self.client.max_request_size > DEFAULT_MAX_BUFFER_SIZE
        {
            anyhow::bail!(
                "client.max_request_size must be between {} and {:#X}",
                MIN_BUFFER_SIZE,
                DEFAULT_MAX_BUFFER_SIZE
            );
        }

        if self.client.max_response_size < MIN_BUFFER_SIZE
            || self.client.max_response_size > MAX_RESPONSE_BUFFER_SIZE
        {
            anyhow::bail!(
                "client.max_response_size must be between {} and {:#X}",
                MIN_BUFFER_SIZE,
                MAX_RESPONSE_BUFFER_SIZE
            );
        }

        if self.client.backoff_cap_ms == 0 {
            anyhow::bail!("client.backoff_cap_ms must be positive");
        }

        self.server.validate()?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}
