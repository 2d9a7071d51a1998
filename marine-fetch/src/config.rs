use crate::cache::CacheConfig;
use crate::deduplication::DeduplicationConfig;
use crate::error::ConfigError;
use crate::retry::{RetryConfig, RetryPolicy};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Base URLs of the upstream providers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub marine_url: String,
    pub forecast_url: String,
    pub geocoding_url: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            marine_url: "https://marine-api.open-meteo.com/v1/marine".to_string(),
            forecast_url: "https://api.open-meteo.com/v1/forecast".to_string(),
            geocoding_url: "https://geocoding-api.open-meteo.com/v1/search".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub retry: RetryConfig,
    pub dedup: DeduplicationConfig,
    pub cache: CacheConfig,
    pub providers: ProviderConfig,
}

impl Config {
    /// Built-in defaults, then the YAML file at `path` if given, then
    /// `MARINE_` environment variables (`__` separates nested keys, e.g.
    /// `MARINE_CACHE__MAX_CAPACITY_BYTES`).
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed("MARINE_").split("__"))
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Config = Self::figment(path).extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        RetryPolicy::from(&self.retry)
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.cache.max_capacity_bytes == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_capacity_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
