use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BACK_DAYS, DEFAULT_FANOUT, DEFAULT_MAX_RESULTS, DEFAULT_QUERY_TIMEOUT_SECS,
    DEFAULT_RADIUS_KM, DEFAULT_SUMMARY_CAP, EBIRD_API_BASE, MAX_BACK_DAYS, MAX_RADIUS_KM,
    MAX_INITIAL_BACKOFF_MS, MAX_RESULTS, MAX_RETRIES, NOMINATIM_API_BASE,
};
use crate::error::{BirdingError, Result};

/// eBird API key. Never printed, not even through `Debug`.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub defaults: DefaultsConfig,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub geocoder: GeocoderConfig,
}

/// Observational-data provider binding and its hard limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: ApiKey,
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub max_back_days: u32,
    pub max_radius_km: u32,
    pub max_results: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: ApiKey::default(),
            base_url: EBIRD_API_BASE.to_string(),
            request_timeout_secs: 10,
            max_back_days: MAX_BACK_DAYS,
            max_radius_km: MAX_RADIUS_KM,
            max_results: MAX_RESULTS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub back_days: u32,
    pub max_results: u32,
    pub radius_km: u32,
    pub summary_cap: usize,
    /// Number of hotspots queried per fan-out
    pub fanout: usize,
    /// Deadline for a whole query, retries included
    pub query_timeout_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            back_days: DEFAULT_BACK_DAYS,
            max_results: DEFAULT_MAX_RESULTS,
            radius_km: DEFAULT_RADIUS_KM,
            summary_cap: DEFAULT_SUMMARY_CAP,
            fanout: DEFAULT_FANOUT,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_per_sec: 5.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    pub base_url: String,
    pub min_confidence: f64,
    pub cache_ttl_secs: u64,
    pub cache_capacity: u64,
    /// Nominatim's usage policy allows one request per second
    pub rate_limit: RateLimitConfig,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: NOMINATIM_API_BASE.to_string(),
            min_confidence: 0.0,
            cache_ttl_secs: 24 * 60 * 60,
            cache_capacity: 10_000,
            rate_limit: RateLimitConfig {
                capacity: 1,
                refill_per_sec: 1.0,
            },
        }
    }
}

impl Config {
    /// Loads configuration from the TOML file named by `BIRDING_CONFIG`
    /// (if set), then applies environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("BIRDING_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|e| BirdingError::Config {
                message: format!("cannot read {}: {}", path.as_ref().display(), e),
            })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| BirdingError::Config {
            message: format!("TOML parsing error: {}", e),
        })
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("EBIRD_API_KEY") {
            self.provider.api_key = ApiKey::new(key);
        }
        if let Ok(base) = std::env::var("EBIRD_API_BASE") {
            self.provider.base_url = base;
        }
        if let Ok(base) = std::env::var("GEOCODER_BASE") {
            self.geocoder.base_url = base;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.provider.api_key.is_empty() {
            return Err(config_error("provider.api_key is not set (EBIRD_API_KEY)"));
        }
        let positive = [
            ("provider.max_back_days", self.provider.max_back_days as u64),
            ("provider.max_radius_km", self.provider.max_radius_km as u64),
            ("provider.max_results", self.provider.max_results as u64),
            ("provider.request_timeout_secs", self.provider.request_timeout_secs),
            ("defaults.summary_cap", self.defaults.summary_cap as u64),
            ("defaults.fanout", self.defaults.fanout as u64),
            ("defaults.query_timeout_secs", self.defaults.query_timeout_secs),
            ("rate_limit.capacity", self.rate_limit.capacity as u64),
            ("geocoder.rate_limit.capacity", self.geocoder.rate_limit.capacity as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(config_error(format!("{} must be positive", field)));
            }
        }
        let refills = [
            ("rate_limit.refill_per_sec", self.rate_limit.refill_per_sec),
            ("geocoder.rate_limit.refill_per_sec", self.geocoder.rate_limit.refill_per_sec),
        ];
        for (field, refill) in refills {
            if !refill.is_finite() || refill <= 0.0 {
                return Err(config_error(format!("{} must be positive", field)));
            }
        }
        if self.retry.max_retries > MAX_RETRIES {
            return Err(config_error(format!(
                "retry.max_retries must be at most {}",
                MAX_RETRIES
            )));
        }
        if self.retry.initial_backoff_ms > MAX_INITIAL_BACKOFF_MS {
            return Err(config_error(format!(
                "retry.initial_backoff_ms must be at most {}",
                MAX_INITIAL_BACKOFF_MS
            )));
        }
        if self.defaults.back_days == 0 || self.defaults.back_days > self.provider.max_back_days {
            return Err(config_error("defaults.back_days must be within provider limits"));
        }
        if self.defaults.radius_km == 0 || self.defaults.radius_km > self.provider.max_radius_km {
            return Err(config_error("defaults.radius_km must be within provider limits"));
        }
        if self.defaults.max_results == 0 || self.defaults.max_results > self.provider.max_results
        {
            return Err(config_error("defaults.max_results must be within provider limits"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.provider.request_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.defaults.query_timeout_secs)
    }
}

fn config_error(message: impl Into<String>) -> BirdingError {
    BirdingError::Config {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [provider]
            api_key = "secret"
            max_back_days = 20

            [retry]
            max_retries = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.provider.max_back_days, 20);
        assert_eq!(config.provider.max_radius_km, 50);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.initial_backoff_ms, 500);
        assert_eq!(config.defaults.summary_cap, 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_api_key_fails_validation() {
        let config = Config::default();
        assert!(matches!(
            config.validate(),
            Err(BirdingError::Config { .. })
        ));
    }

    #[test]
    fn default_back_beyond_provider_limit_is_rejected() {
        let mut config = Config::default();
        config.provider.api_key = ApiKey::new("k");
        config.defaults.back_days = 45;
        assert!(config.validate().is_err());
    }

    #[test]
    fn retry_settings_have_upper_bounds() {
        let mut config = Config::default();
        config.provider.api_key = ApiKey::new("k");
        config.retry.max_retries = 1_000;
        assert!(config.validate().is_err());

        config.retry.max_retries = 2;
        config.retry.initial_backoff_ms = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn geocoder_has_its_own_rate_limit() {
        let config = Config::from_toml_str(
            r#"
            [provider]
            api_key = "secret"

            [geocoder.rate_limit]
            capacity = 2
            refill_per_sec = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.geocoder.rate_limit.capacity, 2);
        assert_eq!(config.geocoder.rate_limit.refill_per_sec, 0.5);
        assert_eq!(config.rate_limit.refill_per_sec, 5.0);
        assert!(config.validate().is_ok());

        let defaults = GeocoderConfig::default();
        assert_eq!(defaults.rate_limit.capacity, 1);
        assert_eq!(defaults.rate_limit.refill_per_sec, 1.0);
    }

    #[test]
    fn api_key_is_redacted_in_debug_output() {
        let mut config = Config::default();
        config.provider.api_key = ApiKey::new("super-secret-key");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret-key"));
        assert!(rendered.contains("<redacted>"));
    }
}
