//! Discovery errors

use integrix_config::ConfigError;
use integrix_registry::RegistryError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the discovery coordinator.
///
/// A missing, unhealthy or instance-less service is not an error; discovery
/// returns `Ok(None)` for those.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Circuit breaker is open for service {service}")]
    CircuitOpen {
        service: String,
        /// Time left before a trial request is admitted, when known
        retry_after: Option<Duration>,
    },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl DiscoveryError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
