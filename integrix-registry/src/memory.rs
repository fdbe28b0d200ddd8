//! In-memory service registry

use crate::event::RegistryEvent;
use crate::registry::{RegistryError, ServiceRegistry};
use crate::service::{RegisteredService, RequestOutcome, ServiceDefinition};
use async_trait::async_trait;
use chrono::Utc;
use integrix_config::ConfigLoader;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Shape of a services file: `services = [ ... ]`
#[derive(Debug, Deserialize)]
struct ServicesFile {
    #[serde(default)]
    services: Vec<ServiceDefinition>,
}

/// In-memory service registry (single process deployments, testing)
#[derive(Clone)]
pub struct InMemoryRegistry {
    // Vec keeps registration order for fan-out queries
    services: Arc<RwLock<Vec<RegisteredService>>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl InMemoryRegistry {
    /// Create new in-memory registry
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a registry whose event channel buffers `capacity` events per subscriber
    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            services: Arc::new(RwLock::new(Vec::new())),
            events,
        }
    }

    /// Register a service, replacing any existing definition with the same name.
    ///
    /// Re-registration keeps the service's position and resets its live state.
    pub async fn register(&self, definition: ServiceDefinition) -> Result<(), RegistryError> {
        definition.validate()?;

        let name = definition.name.clone();
        let replaced = {
            let mut services = self.services.write().await;
            match services.iter_mut().find(|s| s.definition.name == name) {
                Some(existing) => {
                    *existing = RegisteredService::new(definition.clone());
                    true
                }
                None => {
                    services.push(RegisteredService::new(definition.clone()));
                    false
                }
            }
        };

        info!(
            service = %name,
            instances = definition.routing.instances.len(),
            replaced,
            "Service registered"
        );

        self.publish(RegistryEvent::Registered {
            service: name,
            definition,
        });
        Ok(())
    }

    /// Remove a service
    pub async fn deregister(&self, name: &str) -> Result<(), RegistryError> {
        {
            let mut services = self.services.write().await;
            let position = services
                .iter()
                .position(|s| s.definition.name == name)
                .ok_or_else(|| RegistryError::ServiceNotFound(name.to_string()))?;
            services.remove(position);
        }

        info!(service = %name, "Service deregistered");
        self.publish(RegistryEvent::Deregistered {
            service: name.to_string(),
        });
        Ok(())
    }

    /// Mark a single instance healthy or unhealthy
    pub async fn set_instance_health(
        &self,
        name: &str,
        url: &str,
        healthy: bool,
    ) -> Result<(), RegistryError> {
        let current_health = {
            let mut services = self.services.write().await;
            let service = services
                .iter_mut()
                .find(|s| s.definition.name == name)
                .ok_or_else(|| RegistryError::ServiceNotFound(name.to_string()))?;

            let instance = service
                .definition
                .routing
                .instances
                .iter_mut()
                .find(|i| i.url == url)
                .ok_or_else(|| RegistryError::InstanceNotFound {
                    service: name.to_string(),
                    url: url.to_string(),
                })?;

            if instance.healthy == healthy {
                return Ok(());
            }
            instance.healthy = healthy;
            service.state.is_healthy
        };

        debug!(service = %name, instance = %url, healthy, "Instance health changed");
        self.publish(RegistryEvent::HealthChanged {
            service: name.to_string(),
            current_health,
        });
        Ok(())
    }

    /// Register every definition listed in a JSON or TOML services file
    pub async fn load_definitions(&self, path: impl AsRef<Path>) -> Result<usize, RegistryError> {
        let path = path.as_ref();
        let file: ServicesFile = ConfigLoader::auto(path)?.load_typed(path)?;
        let count = file.services.len();

        for definition in file.services {
            self.register(definition).await?;
        }

        info!(path = %path.display(), count, "Loaded service definitions");
        Ok(count)
    }

    /// Remove all services without publishing events
    pub async fn clear(&self) {
        self.services.write().await.clear();
    }

    /// Get count of registered services
    pub async fn count(&self) -> usize {
        self.services.read().await.len()
    }

    fn publish(&self, event: RegistryEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    async fn matching<P>(&self, predicate: P) -> Vec<RegisteredService>
    where
        P: Fn(&ServiceDefinition) -> bool,
    {
        self.services
            .read()
            .await
            .iter()
            .filter(|s| predicate(&s.definition))
            .cloned()
            .collect()
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceRegistry for InMemoryRegistry {
    async fn get_service(&self, name: &str) -> Result<Option<RegisteredService>, RegistryError> {
        Ok(self
            .services
            .read()
            .await
            .iter()
            .find(|s| s.definition.name == name)
            .cloned())
    }

    async fn list_services(&self) -> Result<Vec<String>, RegistryError> {
        Ok(self
            .services
            .read()
            .await
            .iter()
            .map(|s| s.definition.name.clone())
            .collect())
    }

    async fn discover_by_capability(
        &self,
        capability: &str,
    ) -> Result<Vec<RegisteredService>, RegistryError> {
        Ok(self.matching(|d| d.has_capability(capability)).await)
    }

    async fn discover_by_feature(
        &self,
        feature: &str,
    ) -> Result<Vec<RegisteredService>, RegistryError> {
        Ok(self.matching(|d| d.has_feature(feature)).await)
    }

    async fn update_health_status(
        &self,
        name: &str,
        healthy: bool,
        details: serde_json::Value,
    ) -> Result<(), RegistryError> {
        let changed = {
            let mut services = self.services.write().await;
            let service = services
                .iter_mut()
                .find(|s| s.definition.name == name)
                .ok_or_else(|| RegistryError::ServiceNotFound(name.to_string()))?;

            let changed = service.state.is_healthy != healthy;
            service.state.is_healthy = healthy;
            service.state.health_details = details;
            service.state.last_health_check = Some(Utc::now());
            changed
        };

        if changed {
            info!(service = %name, healthy, "Service health changed");
            self.publish(RegistryEvent::HealthChanged {
                service: name.to_string(),
                current_health: healthy,
            });
        }
        Ok(())
    }

    async fn record_request(&self, name: &str, outcome: RequestOutcome) -> Result<(), RegistryError> {
        let mut services = self.services.write().await;
        let service = services
            .iter_mut()
            .find(|s| s.definition.name == name)
            .ok_or_else(|| RegistryError::ServiceNotFound(name.to_string()))?;

        service.state.metrics.record(&outcome);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }
}
