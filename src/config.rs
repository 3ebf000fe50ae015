//! Runtime configuration: every cache, search, registration, and lock
//! tunable, with the documented defaults and a `validate()` pass.

use crate::error::{GeoBankError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    pub l1_size: u64,
    pub l1_ttl_sec: u64,
    pub l2_ttl_sec: u64,
    pub early_expiration_factor: f64,
    pub auto_renewal_sec: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_size: 10_000,
            l1_ttl_sec: 300,
            l2_ttl_sec: 3_600,
            early_expiration_factor: 0.10,
            auto_renewal_sec: 900,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchConfig {
    pub default_radius_km: f64,
    pub max_radius_km: f64,
    pub default_max_results: usize,
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_radius_km: 10.0,
            max_radius_km: 100.0,
            default_max_results: 10,
            max_results: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationConfig {
    pub min_inter_branch_km: f64,
    pub saturation_radius_km: f64,
    pub saturation_count: usize,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            min_inter_branch_km: 0.5,
            saturation_radius_km: 5.0,
            saturation_count: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockConfig {
    pub acquisition_timeout_sec: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquisition_timeout_sec: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    pub cache: CacheConfig,
    pub search: SearchConfig,
    pub registration: RegistrationConfig,
    pub lock: LockConfig,
}

impl Config {
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_search(mut self, search: SearchConfig) -> Self {
        self.search = search;
        self
    }

    pub fn with_registration(mut self, registration: RegistrationConfig) -> Self {
        self.registration = registration;
        self
    }

    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    /// Sanity-check every tunable's ordering constraint (default ≤ max,
    /// positive radii/counts, a probability in `[0, 1]`).
    pub fn validate(&self) -> Result<()> {
        let mut violations = Vec::new();

        if self.cache.l1_size == 0 {
            violations.push(("cache.l1.size", "must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.cache.early_expiration_factor) {
            violations.push(("cache.earlyExpirationFactor", "must be within [0, 1]"));
        }
        if self.search.default_radius_km <= 0.0 {
            violations.push(("search.defaultRadiusKm", "must be greater than zero"));
        }
        if self.search.max_radius_km < self.search.default_radius_km {
            violations.push(("search.maxRadiusKm", "must be at least defaultRadiusKm"));
        }
        if self.search.default_max_results == 0 {
            violations.push(("search.defaultMaxResults", "must be greater than zero"));
        }
        if self.search.max_results < self.search.default_max_results {
            violations.push(("search.maxResults", "must be at least defaultMaxResults"));
        }
        if self.registration.min_inter_branch_km < 0.0 {
            violations.push(("registration.minInterBranchKm", "must be non-negative"));
        }
        if self.registration.saturation_radius_km <= 0.0 {
            violations.push(("registration.saturationRadiusKm", "must be greater than zero"));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(GeoBankError::InvalidInput(
                violations
                    .into_iter()
                    .map(|(field, constraint)| crate::error::FieldViolation::new(field, constraint))
                    .collect(),
            ))
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| GeoBankError::Serialization(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| GeoBankError::Serialization(e.to_string()))
    }

    #[cfg(feature = "toml")]
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| GeoBankError::Serialization(e.to_string()))
    }

    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| GeoBankError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_table() {
        let config = Config::default();
        assert_eq!(config.cache.l1_size, 10_000);
        assert_eq!(config.cache.l1_ttl_sec, 300);
        assert_eq!(config.cache.l2_ttl_sec, 3_600);
        assert_eq!(config.cache.early_expiration_factor, 0.10);
        assert_eq!(config.cache.auto_renewal_sec, 900);
        assert_eq!(config.search.default_radius_km, 10.0);
        assert_eq!(config.search.max_radius_km, 100.0);
        assert_eq!(config.registration.min_inter_branch_km, 0.5);
        assert_eq!(config.registration.saturation_radius_km, 5.0);
        assert_eq!(config.registration.saturation_count, 10);
        assert_eq!(config.lock.acquisition_timeout_sec, 10);
    }

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_max_radius_below_default() {
        let config = Config::default().with_search(SearchConfig {
            max_radius_km: 5.0,
            ..SearchConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_early_expiration_factor_outside_unit_interval() {
        let config = Config::default().with_cache(CacheConfig {
            early_expiration_factor: 1.5,
            ..CacheConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let config = Config::default();
        let json = config.to_json().unwrap();
        let parsed = Config::from_json(&json).unwrap();
        assert_eq!(config, parsed);
    }
}
