//! Registry contract consumed by the discovery coordinator

use crate::event::RegistryEvent;
use crate::service::{RegisteredService, RequestOutcome};
use async_trait::async_trait;
use integrix_config::ConfigError;
use thiserror::Error;
use tokio::sync::broadcast;

/// Service registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Instance {url} not found for service {service}")]
    InstanceNotFound { service: String, url: String },

    #[error("Invalid definition for service '{service}': {reason}")]
    InvalidDefinition { service: String, reason: String },

    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Store of service definitions and live health.
///
/// Lookups return registration order. Implementations publish
/// [`RegistryEvent`]s to every receiver handed out by [`subscribe`].
///
/// [`subscribe`]: ServiceRegistry::subscribe
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Look up a service by name
    async fn get_service(&self, name: &str) -> Result<Option<RegisteredService>, RegistryError>;

    /// Names of all registered services
    async fn list_services(&self) -> Result<Vec<String>, RegistryError>;

    /// Services declaring the capability
    async fn discover_by_capability(
        &self,
        capability: &str,
    ) -> Result<Vec<RegisteredService>, RegistryError>;

    /// Services declaring the feature
    async fn discover_by_feature(
        &self,
        feature: &str,
    ) -> Result<Vec<RegisteredService>, RegistryError>;

    /// Store the latest health-check result for a service
    async fn update_health_status(
        &self,
        name: &str,
        healthy: bool,
        details: serde_json::Value,
    ) -> Result<(), RegistryError>;

    /// Record the outcome of a request dispatched to a service
    async fn record_request(&self, name: &str, outcome: RequestOutcome) -> Result<(), RegistryError>;

    /// Subscribe to lifecycle events
    fn subscribe(&self) -> broadcast::Receiver<RegistryEvent>;
}
