//! Configuration management with file persistence

use crate::domain::signing::generator::{DEFAULT_BYTE_LENGTH, validate_byte_length};
use crate::storage::default_database_path;
use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Default retention window for expired, inactive keys (30 days)
pub const DEFAULT_RETENTION_HOURS: u64 = 24 * 30;

/// Keymint configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub registry: RegistryConfig,
    pub database: DatabaseSettings,
}

/// Settings handed to `KeyRegistry` at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Random bytes per generated signature
    pub byte_length: usize,
    /// How long expired, inactive keys are kept before `purge_expired` removes them
    pub retention_hours: u64,
    pub rate_limit: RateLimitConfig,
}

/// Verification rate limiting, off by default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Attempts allowed per signature within one period
    pub max_requests: usize,
    pub period_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite file; falls back to the platform data directory
    pub path: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            byte_length: DEFAULT_BYTE_LENGTH,
            retention_hours: DEFAULT_RETENTION_HOURS,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_requests: 10,
            period_secs: 3600,
        }
    }
}

impl RegistryConfig {
    /// Config with a custom byte length and all other defaults
    pub fn with_byte_length(byte_length: usize) -> Self {
        Self {
            byte_length,
            ..Default::default()
        }
    }

    /// Enable rate limiting with the given budget
    pub fn rate_limited(mut self, max_requests: usize, period_secs: u64) -> Self {
        self.rate_limit = RateLimitConfig {
            enabled: true,
            max_requests,
            period_secs,
        };
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        validate_byte_length(self.byte_length).map_err(|e| anyhow!(e))?;
        self.rate_limit.validate()
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled && (self.max_requests == 0 || self.period_secs == 0) {
            return Err(anyhow!(
                "Rate limiting needs max_requests and period_secs greater than zero"
            ));
        }
        Ok(())
    }
}

impl DatabaseSettings {
    /// Configured path, or the platform default
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_database_path)
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("KEYMINT_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("keymint")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or return defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.registry.validate()
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "registry.byte_length" => Ok(self.registry.byte_length.to_string()),
            "registry.retention_hours" => Ok(self.registry.retention_hours.to_string()),

            "rate_limit.enabled" => Ok(self.registry.rate_limit.enabled.to_string()),
            "rate_limit.max_requests" => Ok(self.registry.rate_limit.max_requests.to_string()),
            "rate_limit.period_secs" => Ok(self.registry.rate_limit.period_secs.to_string()),

            "database.path" => Ok(self.database.resolved_path().display().to_string()),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `keymint config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "registry.byte_length" => {
                let length: usize = value
                    .parse()
                    .with_context(|| format!("Invalid byte_length value: {}", value))?;
                validate_byte_length(length).map_err(|e| anyhow!(e))?;
                self.registry.byte_length = length;
            }
            "registry.retention_hours" => {
                self.registry.retention_hours = value
                    .parse()
                    .with_context(|| format!("Invalid retention_hours value: {}", value))?;
            }

            "rate_limit.enabled" => {
                self.registry.rate_limit.enabled = value
                    .parse()
                    .with_context(|| format!("Invalid enabled value: {} (use true or false)", value))?;
            }
            "rate_limit.max_requests" => {
                let max: usize = value
                    .parse()
                    .with_context(|| format!("Invalid max_requests value: {}", value))?;
                if max == 0 {
                    return Err(anyhow!("max_requests must be greater than zero"));
                }
                self.registry.rate_limit.max_requests = max;
            }
            "rate_limit.period_secs" => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid period_secs value: {}", value))?;
                if secs == 0 {
                    return Err(anyhow!("period_secs must be greater than zero"));
                }
                self.registry.rate_limit.period_secs = secs;
            }

            "database.path" => {
                self.database.path = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `keymint config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "registry.byte_length",
            "registry.retention_hours",
            "rate_limit.enabled",
            "rate_limit.max_requests",
            "rate_limit.period_secs",
            "database.path",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}
