//! Service discovery coordinator
//!
//! Owns the per-service load-balancer, circuit-breaker and health-monitor
//! state, and keeps it in step with the registry through its event stream.

use crate::circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerConfig, Rejection, Transition};
use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, Result};
use crate::events::DiscoveryEvent;
use crate::health::{HealthMonitor, HttpHealthProbe, MonitorStats};
use crate::load_balancer::LoadBalancerState;
use crate::status::{BreakerStatus, MonitorStatus, ServiceDiscoveryStatus};
use dashmap::DashMap;
use futures::future::join_all;
use integrix_registry::{
    HealthProbe, Instance, RegisteredService, RegistryEvent, RequestOutcome, ServiceDefinition,
    ServiceRegistry,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A routable answer to a discovery query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredService {
    pub service: String,
    pub instance: Instance,
    pub base_url: String,
    pub capabilities: Vec<String>,
    pub metadata: HashMap<String, String>,
}

/// Routes discovery queries through per-service resilience state.
///
/// Construct one per process (or per test) and share it behind an `Arc`.
/// Several coordinators over different registries never share state.
///
/// ```rust,ignore
/// let registry = Arc::new(InMemoryRegistry::new());
/// let coordinator = Arc::new(ServiceDiscoveryCoordinator::with_http_probe(
///     registry.clone(),
///     DiscoveryConfig::default(),
/// ));
/// coordinator.start().await?;
///
/// if let Some(found) = coordinator.discover_service("billing").await? {
///     // call found.instance.url, then report the outcome
///     coordinator.record_success("billing").await;
/// }
/// ```
pub struct ServiceDiscoveryCoordinator {
    registry: Arc<dyn ServiceRegistry>,
    config: DiscoveryConfig,
    default_probe: Arc<dyn HealthProbe>,
    load_balancers: DashMap<String, LoadBalancerState>,
    circuit_breakers: DashMap<String, CircuitBreaker>,
    health_monitors: DashMap<String, HealthMonitor>,
    events: broadcast::Sender<DiscoveryEvent>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceDiscoveryCoordinator {
    /// Create a coordinator with an explicit default health probe.
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        config: DiscoveryConfig,
        default_probe: Arc<dyn HealthProbe>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            registry,
            config,
            default_probe,
            load_balancers: DashMap::new(),
            circuit_breakers: DashMap::new(),
            health_monitors: DashMap::new(),
            events,
            event_loop: Mutex::new(None),
        }
    }

    /// Create a coordinator probing services over HTTP.
    pub fn with_http_probe(registry: Arc<dyn ServiceRegistry>, config: DiscoveryConfig) -> Self {
        let probe = HttpHealthProbe::new(config.health_check.probe_timeout());
        Self::new(registry, config, Arc::new(probe))
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn ServiceRegistry> {
        &self.registry
    }

    /// Subscribe to circuit-breaker events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    /// Initialize state for every registered service and follow registry events.
    ///
    /// Subscribes before reading the registry so no registration is missed in
    /// between. Calling `start` again resets all state and replaces the
    /// event loop.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut events = self.registry.subscribe();
        self.bootstrap().await?;

        let coordinator: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                let received = events.recv().await;
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };

                match received {
                    Ok(event) => coordinator.handle_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Registry event stream lagged, resynchronizing");
                        if let Err(e) = coordinator.reconcile().await {
                            warn!(error = %e, "Failed to resynchronize with registry");
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Registry event stream closed");
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.event_loop.lock().replace(handle) {
            previous.abort();
        }

        info!(services = self.load_balancers.len(), "Service discovery started");
        Ok(())
    }

    /// Stop following the registry and abort every health monitor.
    pub fn shutdown(&self) {
        if let Some(handle) = self.event_loop.lock().take() {
            handle.abort();
        }
        for entry in self.health_monitors.iter() {
            entry.value().stop();
        }
        self.health_monitors.clear();
        info!("Service discovery stopped");
    }

    /// Apply one registry event.
    pub async fn handle_event(&self, event: RegistryEvent) {
        debug!(event = event.event_name(), service = %event.service(), "Registry event");

        match event {
            RegistryEvent::Registered { definition, .. } => self.on_service_registered(&definition),
            RegistryEvent::Deregistered { service } => self.on_service_deregistered(&service),
            RegistryEvent::HealthChanged {
                service,
                current_health,
            } => {
                info!(service = %service, healthy = current_health, "Service health changed");
                match self.registry.get_service(&service).await {
                    Ok(Some(registered)) => {
                        if let Some(mut lb) = self.load_balancers.get_mut(&service) {
                            lb.refresh(&registered.definition);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(service = %service, error = %e, "Failed to refresh instances"),
                }
            }
        }
    }

    /// Create fresh state for a (re-)registered service.
    pub fn on_service_registered(&self, definition: &ServiceDefinition) {
        let name = definition.name.clone();

        self.load_balancers
            .insert(name.clone(), LoadBalancerState::new(definition));

        let breaker_config = definition
            .circuit_breaker
            .as_ref()
            .map(CircuitBreakerConfig::from)
            .unwrap_or_else(|| self.config.circuit_breaker_config());
        self.circuit_breakers
            .insert(name.clone(), CircuitBreaker::new(breaker_config));

        if definition.health_check.enabled {
            self.start_health_monitoring(definition);
        } else if let Some((_, monitor)) = self.health_monitors.remove(&name) {
            monitor.stop();
        }

        info!(
            service = %name,
            strategy = %definition.routing.strategy,
            instances = definition.routing.instances.len(),
            health_check = definition.health_check.enabled,
            "Service registered with discovery"
        );
    }

    /// Drop all state for a service. Unknown names are ignored.
    pub fn on_service_deregistered(&self, name: &str) {
        if let Some((_, monitor)) = self.health_monitors.remove(name) {
            monitor.stop();
        }
        self.load_balancers.remove(name);
        self.circuit_breakers.remove(name);

        info!(service = %name, "Service deregistered from discovery");
    }

    /// Start (or restart) the health monitor for a service.
    ///
    /// The definition's own handler wins over the coordinator's default probe.
    pub fn start_health_monitoring(&self, definition: &ServiceDefinition) {
        let probe = definition
            .health_check
            .handler
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.default_probe));

        let monitor = HealthMonitor::spawn(Arc::clone(&self.registry), definition.clone(), probe);
        if let Some(previous) = self.health_monitors.insert(definition.name.clone(), monitor) {
            previous.stop();
        }
    }

    /// Resolve a service to one routable instance.
    ///
    /// Returns `Ok(None)` when the service is unknown, unhealthy, or has no
    /// healthy instance, and `Err(CircuitOpen)` while its breaker rejects
    /// traffic.
    pub async fn discover_service(&self, name: &str) -> Result<Option<DiscoveredService>> {
        let Some(service) = self.registry.get_service(name).await? else {
            warn!(service = %name, "Service not found in registry");
            return Ok(None);
        };

        let admission = self.admit(name)?;

        if !service.is_healthy() {
            self.release(name, admission);
            warn!(service = %name, "Service is unhealthy");
            return Ok(None);
        }

        let Some(instance) = self.select_instance(&service.definition) else {
            self.release(name, admission);
            warn!(service = %name, "No healthy instance available");
            return Ok(None);
        };

        let RegisteredService { definition, .. } = service;
        Ok(Some(DiscoveredService {
            service: definition.name,
            instance,
            base_url: definition.base_url,
            capabilities: definition.capabilities,
            metadata: definition.metadata,
        }))
    }

    /// Discover every service declaring `capability`, in registry order.
    pub async fn discover_by_capability(&self, capability: &str) -> Vec<DiscoveredService> {
        match self.registry.discover_by_capability(capability).await {
            Ok(services) => self.discover_all(services).await,
            Err(e) => {
                warn!(capability, error = %e, "Capability lookup failed");
                Vec::new()
            }
        }
    }

    /// Discover every service declaring `feature`, in registry order.
    pub async fn discover_by_feature(&self, feature: &str) -> Vec<DiscoveredService> {
        match self.registry.discover_by_feature(feature).await {
            Ok(services) => self.discover_all(services).await,
            Err(e) => {
                warn!(feature, error = %e, "Feature lookup failed");
                Vec::new()
            }
        }
    }

    async fn discover_all(&self, services: Vec<RegisteredService>) -> Vec<DiscoveredService> {
        let results = join_all(services.iter().map(|s| self.discover_service(s.name()))).await;

        services
            .iter()
            .zip(results)
            .filter_map(|(service, result)| match result {
                Ok(found) => found,
                Err(e) => {
                    warn!(service = %service.name(), error = %e, "Skipping service");
                    None
                }
            })
            .collect()
    }

    /// Pick an instance without consulting the circuit breaker.
    ///
    /// Falls back to the service's base URL when no balancer state exists.
    pub async fn get_service_instance(&self, name: &str) -> Result<Option<Instance>> {
        if let Some(selected) = self.load_balancers.get_mut(name).map(|mut lb| lb.select()) {
            return Ok(selected);
        }

        Ok(self
            .registry
            .get_service(name)
            .await?
            .map(|service| Instance::new(service.definition.base_url)))
    }

    /// Report a successful request to `name`.
    pub async fn record_success(&self, name: &str) {
        let transition = self
            .circuit_breakers
            .get_mut(name)
            .map(|mut breaker| breaker.record_success());

        if let Some(Transition::Closed) = transition {
            info!(service = %name, "Circuit breaker closed");
            self.emit(DiscoveryEvent::CircuitBreakerClosed {
                service: name.to_string(),
            });
        }

        self.forward(name, RequestOutcome::success()).await;
    }

    /// Report a failed request to `name`.
    pub async fn record_failure(&self, name: &str, error: &str) {
        let now = Instant::now();
        let transition = self
            .circuit_breakers
            .get_mut(name)
            .map(|mut breaker| breaker.record_failure(now));

        match transition {
            Some(Transition::Opened { failures }) => {
                warn!(service = %name, failures, error, "Circuit breaker opened");
                self.emit(DiscoveryEvent::CircuitBreakerOpened {
                    service: name.to_string(),
                    failures,
                });
            }
            Some(Transition::Reopened) => {
                warn!(service = %name, error, "Circuit breaker trial failed, reopening");
            }
            _ => debug!(service = %name, error, "Request failure recorded"),
        }

        self.forward(name, RequestOutcome::failure(error)).await;
    }

    /// Count a request starting on one of the service's instances.
    pub fn connection_started(&self, name: &str, url: &str) -> bool {
        self.load_balancers
            .get_mut(name)
            .map(|mut lb| lb.connection_started(url))
            .unwrap_or(false)
    }

    /// Count a request finishing on one of the service's instances.
    pub fn connection_finished(&self, name: &str, url: &str) -> bool {
        self.load_balancers
            .get_mut(name)
            .map(|mut lb| lb.connection_finished(url))
            .unwrap_or(false)
    }

    /// Snapshot of every known service, keyed by name.
    pub async fn get_discovery_status(&self) -> Result<BTreeMap<String, ServiceDiscoveryStatus>> {
        let mut names: BTreeSet<String> = self.registry.list_services().await?.into_iter().collect();
        names.extend(self.load_balancers.iter().map(|e| e.key().clone()));
        names.extend(self.circuit_breakers.iter().map(|e| e.key().clone()));
        names.extend(self.health_monitors.iter().map(|e| e.key().clone()));

        let mut status = BTreeMap::new();
        for name in names {
            let service = self.registry.get_service(&name).await?;

            let instances = self
                .load_balancers
                .get(&name)
                .map(|lb| lb.instances().len())
                .or_else(|| service.as_ref().map(|s| s.definition.routing.instances.len()))
                .unwrap_or(0);

            let circuit_breaker = self
                .circuit_breakers
                .get(&name)
                .map(|breaker| BreakerStatus::from(&*breaker));

            let health_monitor = self
                .health_monitors
                .get(&name)
                .map(|monitor| MonitorStatus::new(true, &monitor.stats()));

            status.insert(
                name,
                ServiceDiscoveryStatus {
                    registered: service.is_some(),
                    healthy: service.as_ref().is_some_and(|s| s.is_healthy()),
                    circuit_breaker,
                    instances,
                    health_monitor,
                },
            );
        }

        Ok(status)
    }

    /// Copy of a service's breaker
    pub fn circuit_breaker(&self, name: &str) -> Option<CircuitBreaker> {
        self.circuit_breakers.get(name).map(|b| b.clone())
    }

    /// Copy of a service's balancer state
    pub fn load_balancer(&self, name: &str) -> Option<LoadBalancerState> {
        self.load_balancers.get(name).map(|lb| lb.clone())
    }

    pub fn has_health_monitor(&self, name: &str) -> bool {
        self.health_monitors.contains_key(name)
    }

    pub fn health_monitor_stats(&self, name: &str) -> Option<MonitorStats> {
        self.health_monitors.get(name).map(|m| m.stats())
    }

    // Fresh state for every registered service, dropping anything else
    async fn bootstrap(&self) -> Result<()> {
        self.load_balancers.clear();
        self.circuit_breakers.clear();
        for entry in self.health_monitors.iter() {
            entry.value().stop();
        }
        self.health_monitors.clear();

        for service in self.registered_services().await? {
            self.on_service_registered(&service.definition);
        }
        Ok(())
    }

    // Catch up after missed events without resetting surviving breakers
    async fn reconcile(&self) -> Result<()> {
        let services = self.registered_services().await?;
        let live: BTreeSet<&str> = services.iter().map(|s| s.name()).collect();

        let stale: Vec<String> = self
            .load_balancers
            .iter()
            .map(|e| e.key().clone())
            .filter(|name| !live.contains(name.as_str()))
            .collect();
        for name in stale {
            self.on_service_deregistered(&name);
        }

        for service in &services {
            let refreshed = self
                .load_balancers
                .get_mut(service.name())
                .map(|mut lb| lb.refresh(&service.definition))
                .is_some();
            if !refreshed {
                self.on_service_registered(&service.definition);
            }
        }
        Ok(())
    }

    async fn registered_services(&self) -> Result<Vec<RegisteredService>> {
        let mut services = Vec::new();
        for name in self.registry.list_services().await? {
            if let Some(service) = self.registry.get_service(&name).await? {
                services.push(service);
            }
        }
        Ok(services)
    }

    // Breaker check and transition under the service's entry lock
    fn admit(&self, name: &str) -> Result<Admission> {
        let Some(mut breaker) = self.circuit_breakers.get_mut(name) else {
            return Ok(Admission::Allowed);
        };

        match breaker.try_acquire(Instant::now()) {
            Ok(Admission::Trial) => {
                debug!(service = %name, "Circuit breaker half-open, admitting trial request");
                Ok(Admission::Trial)
            }
            Ok(admission) => Ok(admission),
            Err(Rejection::Open { retry_after }) => Err(DiscoveryError::CircuitOpen {
                service: name.to_string(),
                retry_after: Some(retry_after),
            }),
            Err(Rejection::TrialInFlight) => Err(DiscoveryError::CircuitOpen {
                service: name.to_string(),
                retry_after: None,
            }),
        }
    }

    fn release(&self, name: &str, admission: Admission) {
        if admission != Admission::Trial {
            return;
        }
        if let Some(mut breaker) = self.circuit_breakers.get_mut(name) {
            breaker.release_trial();
        }
    }

    fn select_instance(&self, definition: &ServiceDefinition) -> Option<Instance> {
        match self.load_balancers.get_mut(&definition.name) {
            Some(mut lb) => lb.select(),
            None => LoadBalancerState::new(definition).select(),
        }
    }

    fn emit(&self, event: DiscoveryEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn forward(&self, name: &str, outcome: RequestOutcome) {
        if let Err(e) = self.registry.record_request(name, outcome).await {
            warn!(service = %name, error = %e, "Failed to record request outcome");
        }
    }
}

impl Drop for ServiceDiscoveryCoordinator {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for ServiceDiscoveryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDiscoveryCoordinator")
            .field("config", &self.config)
            .field("services", &self.load_balancers.len())
            .field("health_monitors", &self.health_monitors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use integrix_registry::{FnHealthProbe, HealthCheckError, HealthReport, InMemoryRegistry};
    use std::time::Duration;

    fn healthy_probe() -> Arc<dyn HealthProbe> {
        Arc::new(FnHealthProbe::new(|_name: &str| async {
            Ok::<_, HealthCheckError>(HealthReport::healthy())
        }))
    }

    fn coordinator(registry: &InMemoryRegistry) -> Arc<ServiceDiscoveryCoordinator> {
        Arc::new(ServiceDiscoveryCoordinator::new(
            Arc::new(registry.clone()),
            DiscoveryConfig::default(),
            healthy_probe(),
        ))
    }

    #[tokio::test]
    async fn test_registration_creates_state() {
        let registry = InMemoryRegistry::new();
        let coordinator = coordinator(&registry);

        let definition = ServiceDefinition::new("billing", "http://billing.internal")
            .with_instance(Instance::new("http://billing-1.internal"))
            .with_circuit_breaker(integrix_registry::CircuitBreakerPolicy {
                failure_threshold: 2,
                ..Default::default()
            });
        coordinator.on_service_registered(&definition);

        let breaker = coordinator.circuit_breaker("billing").unwrap();
        assert_eq!(breaker.config().failure_threshold, 2);
        assert_eq!(breaker.failures(), 0);
        assert_eq!(coordinator.load_balancer("billing").unwrap().instances().len(), 1);
        assert!(!coordinator.has_health_monitor("billing"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_monitor_keeps_running() {
        let registry = InMemoryRegistry::new();
        let coordinator = coordinator(&registry);

        let mut definition = ServiceDefinition::new("sms", "http://sms.internal");
        definition.health_check.enabled = true;
        definition.health_check.interval_ms = 0;
        coordinator.on_service_registered(&definition);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(coordinator.has_health_monitor("sms"));
        let stats = coordinator.health_monitor_stats("sms").unwrap();
        assert_eq!(stats.total_checks, 1);

        let status = coordinator.get_discovery_status().await.unwrap();
        let monitor = status["sms"].health_monitor.as_ref().unwrap();
        assert!(monitor.last_check.is_some());
    }

    #[tokio::test]
    async fn test_unknown_service_is_none() {
        let registry = InMemoryRegistry::new();
        let coordinator = coordinator(&registry);

        assert!(coordinator.discover_service("ghost").await.unwrap().is_none());
        assert!(coordinator.get_service_instance("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_base_url_fallback_without_state() {
        let registry = InMemoryRegistry::new();
        registry
            .register(ServiceDefinition::new("fax", "http://fax.internal"))
            .await
            .unwrap();
        let coordinator = coordinator(&registry);

        let instance = coordinator.get_service_instance("fax").await.unwrap().unwrap();
        assert_eq!(instance.url, "http://fax.internal");

        let found = coordinator.discover_service("fax").await.unwrap().unwrap();
        assert_eq!(found.instance.url, "http://fax.internal");
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_released_when_service_unhealthy() {
        let registry = InMemoryRegistry::new();
        let definition = ServiceDefinition::new("fax", "http://fax.internal")
            .with_circuit_breaker(integrix_registry::CircuitBreakerPolicy {
                failure_threshold: 1,
                reset_timeout_ms: 1_000,
                success_threshold: 1,
            });
        registry.register(definition.clone()).await.unwrap();
        let coordinator = coordinator(&registry);
        coordinator.on_service_registered(&definition);

        coordinator.record_failure("fax", "boom").await;
        tokio::time::advance(Duration::from_millis(1_500)).await;

        registry
            .update_health_status("fax", false, serde_json::Value::Null)
            .await
            .unwrap();
        assert!(coordinator.discover_service("fax").await.unwrap().is_none());

        // The trial slot went back, so the next caller is admitted
        registry
            .update_health_status("fax", true, serde_json::Value::Null)
            .await
            .unwrap();
        assert!(coordinator.discover_service("fax").await.unwrap().is_some());
        assert!(coordinator.discover_service("fax").await.unwrap_err().is_circuit_open());
    }

    #[tokio::test]
    async fn test_outcomes_forwarded_to_registry() {
        let registry = InMemoryRegistry::new();
        let definition = ServiceDefinition::new("billing", "http://billing.internal");
        registry.register(definition.clone()).await.unwrap();
        let coordinator = coordinator(&registry);
        coordinator.on_service_registered(&definition);

        coordinator.record_success("billing").await;
        coordinator.record_failure("billing", "timeout").await;
        // Unknown services are logged, not returned
        coordinator.record_failure("ghost", "timeout").await;

        let metrics = registry.get_service("billing").await.unwrap().unwrap().state.metrics;
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_status_includes_orphaned_state() {
        let registry = InMemoryRegistry::new();
        let coordinator = coordinator(&registry);
        coordinator.on_service_registered(&ServiceDefinition::new("legacy", "http://legacy.internal"));

        let status = coordinator.get_discovery_status().await.unwrap();
        let legacy = &status["legacy"];
        assert!(!legacy.registered);
        assert!(!legacy.healthy);
        assert!(legacy.circuit_breaker.is_some());
        assert!(legacy.health_monitor.is_none());
    }
}
