//! Configuration management with validation and defaults
//!
//! Values come from built-in defaults, an optional TOML file, then
//! `SPINLEDGER_*` environment variables, in that order.

use crate::errors::{ConfigResult, ConfigurationError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Top-level engine configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub game: GameConfig,
}

/// Repository call limits
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Deadline applied to every repository call
    pub operation_timeout_ms: u64,
    /// Compare-and-swap retries before a balance conflict is surfaced
    pub max_conflict_retries: u32,
}

impl StorageConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 5_000,
            max_conflict_retries: 3,
        }
    }
}

/// Deployment environment, which picks the log level and format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Dev,
    Prod,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Environment::Local),
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub environment: Environment,
    /// Filter directive used when `RUST_LOG` is not set
    pub filter: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Largest accepted stake; unbounded when absent
    pub max_wager: Option<Decimal>,
    /// Seed for a reproducible random source
    pub rng_seed: Option<u64>,
}

/// Configuration loader with environment variable support
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> ConfigResult<EngineConfig> {
        let mut config = match &self.config_path {
            Some(path) => Self::load_from_file(path)?,
            None => EngineConfig::default(),
        };

        Self::apply_overrides(&mut config, |key| env::var(key).ok())?;
        Self::validate(&config)?;

        Ok(config)
    }

    fn load_from_file(path: &Path) -> ConfigResult<EngineConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path.display(), e))
        })?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)))
    }

    /// Apply overrides from a key lookup (the process environment in `load`)
    fn apply_overrides(
        config: &mut EngineConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ConfigResult<()> {
        if let Some(value) = lookup("SPINLEDGER_STORAGE_TIMEOUT_MS") {
            config.storage.operation_timeout_ms =
                parse_field("SPINLEDGER_STORAGE_TIMEOUT_MS", value)?;
        }
        if let Some(value) = lookup("SPINLEDGER_CONFLICT_RETRIES") {
            config.storage.max_conflict_retries =
                parse_field("SPINLEDGER_CONFLICT_RETRIES", value)?;
        }
        if let Some(value) = lookup("SPINLEDGER_ENV") {
            config.logging.environment = parse_field("SPINLEDGER_ENV", value)?;
        }
        if let Some(value) = lookup("SPINLEDGER_LOG") {
            config.logging.filter = Some(value);
        }
        if let Some(value) = lookup("SPINLEDGER_MAX_WAGER") {
            config.game.max_wager = Some(parse_field("SPINLEDGER_MAX_WAGER", value)?);
        }
        if let Some(value) = lookup("SPINLEDGER_RNG_SEED") {
            config.game.rng_seed = Some(parse_field("SPINLEDGER_RNG_SEED", value)?);
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(config: &EngineConfig) -> ConfigResult<()> {
        if config.storage.operation_timeout_ms == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "storage.operation_timeout_ms".to_string(),
                value: "0".to_string(),
                reason: "Timeout cannot be zero".to_string(),
            });
        }

        if let Some(max) = config.game.max_wager {
            if max <= Decimal::ZERO {
                return Err(ConfigurationError::InvalidValue {
                    field: "game.max_wager".to_string(),
                    value: max.to_string(),
                    reason: "Maximum wager must be positive".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, config: &EngineConfig, path: P) -> ConfigResult<()> {
        let path = path.as_ref();
        let toml_string = toml::to_string_pretty(config).map_err(|e| {
            ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, toml_string).map_err(|e| {
            ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path.display(), e))
        })
    }
}

fn parse_field<T: FromStr>(field: &str, value: String) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| ConfigurationError::InvalidValue {
        field: field.to_string(),
        value,
        reason: format!("Cannot parse as {}", std::any::type_name::<T>()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.storage.operation_timeout(), Duration::from_secs(5));
        assert_eq!(config.storage.max_conflict_retries, 3);
        assert_eq!(config.logging.environment, Environment::Local);
        assert!(config.game.max_wager.is_none());
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_overrides() {
        let mut config = EngineConfig::default();
        ConfigLoader::apply_overrides(
            &mut config,
            lookup(&[
                ("SPINLEDGER_STORAGE_TIMEOUT_MS", "250"),
                ("SPINLEDGER_ENV", "prod"),
                ("SPINLEDGER_MAX_WAGER", "100.50"),
                ("SPINLEDGER_RNG_SEED", "42"),
            ]),
        )
        .unwrap();

        assert_eq!(config.storage.operation_timeout_ms, 250);
        assert_eq!(config.logging.environment, Environment::Prod);
        assert_eq!(config.game.max_wager, Some(dec!(100.50)));
        assert_eq!(config.game.rng_seed, Some(42));
    }

    #[test]
    fn test_bad_override_is_reported() {
        let mut config = EngineConfig::default();
        let overrides = lookup(&[("SPINLEDGER_CONFLICT_RETRIES", "many")]);
        let err = ConfigLoader::apply_overrides(&mut config, overrides).unwrap_err();

        match err {
            ConfigurationError::InvalidValue { field, .. } => {
                assert_eq!(field, "SPINLEDGER_CONFLICT_RETRIES")
            }
            other => panic!("expected invalid value, got {:?}", other),
        }
    }

    #[test]
    fn test_validation() {
        let mut config = EngineConfig::default();
        config.storage.operation_timeout_ms = 0;
        assert!(ConfigLoader::validate(&config).is_err());

        let mut config = EngineConfig::default();
        config.game.max_wager = Some(dec!(0));
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: EngineConfig = toml::from_str("[game]\nmax_wager = \"20\"\n").unwrap();
        assert_eq!(config.game.max_wager, Some(dec!(20)));
        assert_eq!(config.storage, StorageConfig::default());
    }

    #[test]
    fn test_save_and_load_config() -> ConfigResult<()> {
        let temp_file = NamedTempFile::new().unwrap();

        let mut original = EngineConfig::default();
        original.storage.operation_timeout_ms = 1_500;
        original.game.rng_seed = Some(7);

        let loader = ConfigLoader::new();
        loader.save(&original, temp_file.path())?;
        let loaded = ConfigLoader::load_from_file(temp_file.path())?;

        assert_eq!(loaded, original);
        Ok(())
    }
}
