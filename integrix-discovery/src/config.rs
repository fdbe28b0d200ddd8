//! Coordinator configuration
//!
//! Loaded from a JSON/TOML file, a [`ConfigManager`], or `INTEGRIX_*`
//! environment variables:
//!
//! ```toml
//! event_capacity = 512
//!
//! [circuit_breaker]
//! failure_threshold = 3
//! reset_timeout_ms = 30000
//! success_threshold = 1
//!
//! [health_check]
//! probe_timeout_ms = 2000
//! ```
//!
//! The flat keys `failure_threshold`, `reset_timeout_ms`, `success_threshold`
//! and `probe_timeout_ms` override the nested tables, so
//! `INTEGRIX_FAILURE_THRESHOLD=3` works without a file.

use crate::circuit_breaker::CircuitBreakerConfig;
use integrix_config::{ConfigManager, ConfigValidator, Validate};
use integrix_registry::{CircuitBreakerPolicy, duration_to_millis};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_event_capacity() -> usize {
    256
}

/// Settings for the default HTTP health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckSettings {
    pub probe_timeout_ms: u64,
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl HealthCheckSettings {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Discovery coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Breaker settings for services without their own policy
    pub circuit_breaker: CircuitBreakerPolicy,
    pub health_check: HealthCheckSettings,
    /// Buffer size of the coordinator's event channel
    pub event_capacity: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerPolicy::default(),
            health_check: HealthCheckSettings::default(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl DiscoveryConfig {
    /// Load from a JSON, TOML or .env file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let manager = ConfigManager::new();
        manager.load_file(path)?;
        Self::from_manager(&manager)
    }

    /// Load from `INTEGRIX_*` environment variables
    pub fn from_env() -> crate::Result<Self> {
        let manager = ConfigManager::with_prefix("INTEGRIX");
        manager.load_env()?;
        Self::from_manager(&manager)
    }

    /// Build from the values held by a configuration manager
    pub fn from_manager(manager: &ConfigManager) -> crate::Result<Self> {
        let mut config = Self::default();

        if let Some(policy) = manager.get_opt::<CircuitBreakerPolicy>("circuit_breaker")? {
            config.circuit_breaker = policy;
        }
        if let Some(settings) = manager.get_opt::<HealthCheckSettings>("health_check")? {
            config.health_check = settings;
        }
        if let Some(capacity) = manager.get_opt("event_capacity")? {
            config.event_capacity = capacity;
        }

        if let Some(threshold) = manager.get_opt("failure_threshold")? {
            config.circuit_breaker.failure_threshold = threshold;
        }
        if let Some(timeout) = manager.get_opt("reset_timeout_ms")? {
            config.circuit_breaker.reset_timeout_ms = timeout;
        }
        if let Some(threshold) = manager.get_opt("success_threshold")? {
            config.circuit_breaker.success_threshold = threshold;
        }
        if let Some(timeout) = manager.get_opt("probe_timeout_ms")? {
            config.health_check.probe_timeout_ms = timeout;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_circuit_breaker(mut self, policy: CircuitBreakerPolicy) -> Self {
        self.circuit_breaker = policy;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.health_check.probe_timeout_ms = duration_to_millis(timeout);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Breaker configuration used for services without an override
    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::from(&self.circuit_breaker)
    }
}

impl Validate for DiscoveryConfig {
    fn validate(&self) -> integrix_config::Result<()> {
        ConfigValidator::positive(
            self.circuit_breaker.failure_threshold,
            "circuit_breaker.failure_threshold",
        )?;
        ConfigValidator::positive(
            self.circuit_breaker.success_threshold,
            "circuit_breaker.success_threshold",
        )?;
        ConfigValidator::positive(
            self.circuit_breaker.reset_timeout_ms,
            "circuit_breaker.reset_timeout_ms",
        )?;
        ConfigValidator::positive(
            self.health_check.probe_timeout_ms,
            "health_check.probe_timeout_ms",
        )?;
        ConfigValidator::positive(self.event_capacity, "event_capacity")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiscoveryError;
    use integrix_config::ConfigError;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.reset_timeout_ms, 60_000);
        assert_eq!(config.circuit_breaker.success_threshold, 2);
        assert_eq!(config.health_check.probe_timeout(), Duration::from_secs(5));
        assert_eq!(config.event_capacity, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
event_capacity = 64

[circuit_breaker]
failure_threshold = 3
reset_timeout_ms = 1000

[health_check]
probe_timeout_ms = 250
"#
        )
        .unwrap();

        let config = DiscoveryConfig::from_file(file.path()).unwrap();
        assert_eq!(config.event_capacity, 64);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.reset_timeout_ms, 1000);
        // Unset keys keep their defaults
        assert_eq!(config.circuit_breaker.success_threshold, 2);
        assert_eq!(config.health_check.probe_timeout_ms, 250);
    }

    #[test]
    fn test_flat_overrides_from_manager() {
        let manager = ConfigManager::new();
        manager.set("failure_threshold", "7").unwrap();
        manager.set("probe_timeout_ms", 100).unwrap();

        let config = DiscoveryConfig::from_manager(&manager).unwrap();
        assert_eq!(config.circuit_breaker.failure_threshold, 7);
        assert_eq!(config.health_check.probe_timeout_ms, 100);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let manager = ConfigManager::new();
        manager.set("success_threshold", 0).unwrap();
        let err = DiscoveryConfig::from_manager(&manager).unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::Config(ConfigError::ValidationError(_))
        ));

        let config = DiscoveryConfig::default().with_event_capacity(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_probe_timeout_rounds_up_to_millis() {
        let config = DiscoveryConfig::default().with_probe_timeout(Duration::from_micros(300));
        assert_eq!(config.health_check.probe_timeout_ms, 1);
        assert!(config.validate().is_ok());

        let config = DiscoveryConfig::default().with_probe_timeout(Duration::from_millis(1500));
        assert_eq!(config.health_check.probe_timeout_ms, 1500);
    }

    #[test]
    fn test_circuit_breaker_config() {
        let config = DiscoveryConfig::default().with_circuit_breaker(CircuitBreakerPolicy {
            failure_threshold: 2,
            reset_timeout_ms: 500,
            success_threshold: 1,
        });

        let breaker = config.circuit_breaker_config();
        assert_eq!(breaker.failure_threshold, 2);
        assert_eq!(breaker.reset_timeout, Duration::from_millis(500));
    }
}
