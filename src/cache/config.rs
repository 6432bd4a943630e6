//! Configuration for the insight cache
//!
//! Defaults follow the volatility of each analysis category: single-student
//! quick insights expire after 15 minutes, cohort pattern reports after two
//! hours. All values can be overridden through the builder or environment
//! variables (see [`CacheConfig::from_env`]).

use crate::cache::category::AnalysisCategory;
use crate::cache::health::HealthThresholds;
use crate::cache::key::{DEFAULT_KEY_HASH_LEN, MAX_KEY_HASH_LEN, MIN_KEY_HASH_LEN};
use crate::cache::policy::PolicyRegistry;
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable prefix used by [`CacheConfig::from_env`]
pub const ENV_PREFIX: &str = "INSIGHT_CACHE_";

/// Configuration for the analysis cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries held at once
    pub capacity: usize,

    /// Hex characters kept from the SHA-256 digest in each key
    pub key_hash_len: usize,

    /// Per-category TTL and canonicalization policy
    pub policies: PolicyRegistry,

    /// Run a background sweep of expired entries
    pub enable_auto_sweep: bool,

    /// Interval between background sweeps
    pub sweep_interval: Duration,

    /// Health classification thresholds
    pub health: HealthThresholds,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            key_hash_len: DEFAULT_KEY_HASH_LEN,
            policies: PolicyRegistry::default(),
            enable_auto_sweep: true,
            // Sweep every 5 minutes
            sweep_interval: Duration::from_secs(300),
            health: HealthThresholds::default(),
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(CacheError::InvalidConfig(
                "capacity must be greater than 0".to_string(),
            ));
        }

        if !(MIN_KEY_HASH_LEN..=MAX_KEY_HASH_LEN).contains(&self.key_hash_len) {
            return Err(CacheError::InvalidConfig(format!(
                "key_hash_len must be between {} and {}",
                MIN_KEY_HASH_LEN, MAX_KEY_HASH_LEN
            )));
        }

        if self.enable_auto_sweep && self.sweep_interval.is_zero() {
            return Err(CacheError::InvalidConfig(
                "sweep_interval must be greater than 0 when auto sweep is enabled".to_string(),
            ));
        }

        self.health.validate()
    }

    /// Load configuration from the environment (and a `.env` file if present)
    ///
    /// Recognized variables, all optional:
    /// - `INSIGHT_CACHE_CAPACITY`
    /// - `INSIGHT_CACHE_KEY_HASH_LEN`
    /// - `INSIGHT_CACHE_SWEEP_INTERVAL_SECS` (0 disables the background sweep)
    /// - `INSIGHT_CACHE_HIGH_UTILIZATION`, `INSIGHT_CACHE_LOW_HIT_RATE`,
    ///   `INSIGHT_CACHE_MIN_SAMPLES`
    /// - `INSIGHT_CACHE_TTL_<CATEGORY>_MINUTES`, e.g.
    ///   `INSIGHT_CACHE_TTL_QUICK_INSIGHT_MINUTES` (0 disables the category)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(capacity) = parse_var::<i64, _>(&lookup, "CAPACITY")? {
            if capacity <= 0 {
                return Err(CacheError::InvalidConfig(format!(
                    "capacity must be greater than 0, got {}",
                    capacity
                )));
            }
            config.capacity = capacity as usize;
        }

        if let Some(len) = parse_var::<usize, _>(&lookup, "KEY_HASH_LEN")? {
            config.key_hash_len = len;
        }

        if let Some(secs) = parse_var::<u64, _>(&lookup, "SWEEP_INTERVAL_SECS")? {
            config.enable_auto_sweep = secs > 0;
            config.sweep_interval = Duration::from_secs(secs);
        }

        if let Some(ratio) = parse_var::<f64, _>(&lookup, "HIGH_UTILIZATION")? {
            config.health.high_utilization = ratio;
        }

        if let Some(rate) = parse_var::<f64, _>(&lookup, "LOW_HIT_RATE")? {
            config.health.low_hit_rate = rate;
        }

        if let Some(samples) = parse_var::<u64, _>(&lookup, "MIN_SAMPLES")? {
            config.health.min_samples = samples;
        }

        for category in AnalysisCategory::ALL {
            let suffix = format!("TTL_{}_MINUTES", category.as_str().to_ascii_uppercase());
            if let Some(minutes) = parse_var::<i64, _>(&lookup, &suffix)? {
                let secs = u64::try_from(minutes)
                    .ok()
                    .and_then(|minutes| minutes.checked_mul(60))
                    .ok_or_else(|| CacheError::InvalidEnvVar {
                        name: format!("{}{}", ENV_PREFIX, suffix),
                        value: minutes.to_string(),
                    })?;
                config.policies.set_ttl(category, Duration::from_secs(secs));
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, suffix: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let name = format!("{}{}", ENV_PREFIX, suffix);
    match lookup(&name) {
        None => Ok(None),
        Some(raw) => {
            let parsed = raw.trim().parse::<T>();
            match parsed {
                Ok(value) => Ok(Some(value)),
                Err(_) => Err(CacheError::InvalidEnvVar { name, value: raw }),
            }
        }
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    capacity: Option<usize>,
    key_hash_len: Option<usize>,
    policies: Option<PolicyRegistry>,
    category_ttls: Vec<(AnalysisCategory, Duration)>,
    enable_auto_sweep: Option<bool>,
    sweep_interval: Option<Duration>,
    health: Option<HealthThresholds>,
}

impl CacheConfigBuilder {
    /// Set maximum number of cache entries
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Set digest prefix length of derived keys
    pub fn key_hash_len(mut self, len: usize) -> Self {
        self.key_hash_len = Some(len);
        self
    }

    /// Replace the whole policy registry
    pub fn policies(mut self, policies: PolicyRegistry) -> Self {
        self.policies = Some(policies);
        self
    }

    /// Set the TTL of one category (applied on top of `policies`)
    pub fn category_ttl(mut self, category: AnalysisCategory, ttl: Duration) -> Self {
        self.category_ttls.push((category, ttl));
        self
    }

    /// Enable or disable the background sweep
    pub fn enable_auto_sweep(mut self, enable: bool) -> Self {
        self.enable_auto_sweep = Some(enable);
        self
    }

    /// Set the background sweep interval
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Set health thresholds
    pub fn health(mut self, health: HealthThresholds) -> Self {
        self.health = Some(health);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        let mut policies = self.policies.unwrap_or(defaults.policies);
        for (category, ttl) in self.category_ttls {
            policies.set_ttl(category, ttl);
        }

        CacheConfig {
            capacity: self.capacity.unwrap_or(defaults.capacity),
            key_hash_len: self.key_hash_len.unwrap_or(defaults.key_hash_len),
            policies,
            enable_auto_sweep: self.enable_auto_sweep.unwrap_or(defaults.enable_auto_sweep),
            sweep_interval: self.sweep_interval.unwrap_or(defaults.sweep_interval),
            health: self.health.unwrap_or(defaults.health),
        }
    }
}

/// Preset configurations
impl CacheConfig {
    /// Single-classroom deployment
    pub fn small() -> Self {
        Self {
            capacity: 200,
            sweep_interval: Duration::from_secs(120),
            ..Default::default()
        }
    }

    /// District-wide deployment
    pub fn large() -> Self {
        Self {
            capacity: 5_000,
            sweep_interval: Duration::from_secs(600),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.capacity, 1_000);
        assert_eq!(config.key_hash_len, 16);
        assert!(config.enable_auto_sweep);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut invalid_config = CacheConfig::default();
        invalid_config.capacity = 0;
        assert!(matches!(
            invalid_config.validate(),
            Err(CacheError::InvalidConfig(_))
        ));

        let mut invalid_config = CacheConfig::default();
        invalid_config.key_hash_len = 4;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = CacheConfig::default();
        invalid_config.sweep_interval = Duration::ZERO;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = CacheConfig::default();
        invalid_config.health.high_utilization = 1.5;
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::builder()
            .capacity(50)
            .key_hash_len(24)
            .category_ttl(AnalysisCategory::QuickInsight, Duration::from_secs(60))
            .enable_auto_sweep(false)
            .build();

        assert_eq!(config.capacity, 50);
        assert_eq!(config.key_hash_len, 24);
        assert!(!config.enable_auto_sweep);
        assert_eq!(
            config.policies.ttl(AnalysisCategory::QuickInsight),
            Duration::from_secs(60)
        );
        assert_eq!(
            config.policies.ttl(AnalysisCategory::CohortPatterns),
            Duration::from_secs(120 * 60)
        );
    }

    #[test]
    fn test_from_lookup_empty_uses_defaults() {
        let config = CacheConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.capacity, CacheConfig::default().capacity);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            ("INSIGHT_CACHE_CAPACITY", "250"),
            ("INSIGHT_CACHE_SWEEP_INTERVAL_SECS", "0"),
            ("INSIGHT_CACHE_TTL_QUICK_INSIGHT_MINUTES", "5"),
            ("INSIGHT_CACHE_TTL_NARRATIVE_REPORT_MINUTES", "0"),
            ("INSIGHT_CACHE_MIN_SAMPLES", "10"),
        ]))
        .unwrap();

        assert_eq!(config.capacity, 250);
        assert!(!config.enable_auto_sweep);
        assert_eq!(config.health.min_samples, 10);
        assert_eq!(
            config.policies.ttl(AnalysisCategory::QuickInsight),
            Duration::from_secs(300)
        );
        assert!(config.policies.policy(AnalysisCategory::NarrativeReport).is_disabled());
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let result = CacheConfig::from_lookup(lookup_from(&[("INSIGHT_CACHE_CAPACITY", "0")]));
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));

        let result = CacheConfig::from_lookup(lookup_from(&[("INSIGHT_CACHE_CAPACITY", "lots")]));
        assert!(matches!(result, Err(CacheError::InvalidEnvVar { .. })));

        let result = CacheConfig::from_lookup(lookup_from(&[(
            "INSIGHT_CACHE_TTL_COHORT_PATTERNS_MINUTES",
            "-10",
        )]));
        match result {
            Err(CacheError::InvalidEnvVar { name, .. }) => {
                assert_eq!(name, "INSIGHT_CACHE_TTL_COHORT_PATTERNS_MINUTES")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_from_lookup_rejects_overflowing_ttl() {
        let result = CacheConfig::from_lookup(lookup_from(&[(
            "INSIGHT_CACHE_TTL_QUICK_INSIGHT_MINUTES",
            "9223372036854775807",
        )]));
        assert!(matches!(
            result,
            Err(CacheError::InvalidEnvVar { ref name, .. })
                if name == "INSIGHT_CACHE_TTL_QUICK_INSIGHT_MINUTES"
        ));

        // Largest representable value still loads
        let max_minutes = (u64::MAX / 60).min(i64::MAX as u64).to_string();
        let config = CacheConfig::from_lookup(lookup_from(&[(
            "INSIGHT_CACHE_TTL_QUICK_INSIGHT_MINUTES",
            max_minutes.as_str(),
        )]))
        .unwrap();
        assert_eq!(
            config.policies.ttl(AnalysisCategory::QuickInsight),
            Duration::from_secs(u64::MAX / 60 * 60)
        );
    }

    #[test]
    fn test_preset_configs() {
        assert_eq!(CacheConfig::small().capacity, 200);
        assert_eq!(CacheConfig::large().capacity, 5_000);
        assert!(CacheConfig::small().validate().is_ok());
        assert!(CacheConfig::large().validate().is_ok());
    }
}
