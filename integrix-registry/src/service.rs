//! Service definitions and live registry state

use crate::probe::HealthProbe;
use crate::registry::RegistryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Load balancing strategy declared by a service's routing policy.
///
/// Parsing never fails: an unknown name falls back to round-robin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LoadBalancingStrategy {
    /// Rotate through healthy instances in registration order
    #[default]
    RoundRobin,
    /// Uniform pick among healthy instances
    Random,
    /// Pick proportionally to instance weight
    Weighted,
    /// Pick the healthy instance with the fewest active connections
    LeastConnections,
}

impl LoadBalancingStrategy {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().replace('_', "-").as_str() {
            "random" => Self::Random,
            "weighted" => Self::Weighted,
            "least-connections" => Self::LeastConnections,
            _ => Self::RoundRobin,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round-robin",
            Self::Random => "random",
            Self::Weighted => "weighted",
            Self::LeastConnections => "least-connections",
        }
    }
}

impl From<String> for LoadBalancingStrategy {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<LoadBalancingStrategy> for String {
    fn from(value: LoadBalancingStrategy) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_weight() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// A concrete endpoint serving a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Endpoint URL
    pub url: String,

    /// Relative share for weighted balancing
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Whether the instance may receive traffic
    #[serde(default = "default_true")]
    pub healthy: bool,

    /// Open connections, when tracked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_connections: Option<u32>,
}

impl Instance {
    /// Create a healthy instance with weight 1
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            weight: 1,
            healthy: true,
            active_connections: None,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_connections(mut self, connections: u32) -> Self {
        self.active_connections = Some(connections);
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Active connections, counting an untracked instance as idle
    pub fn connections(&self) -> u32 {
        self.active_connections.unwrap_or(0)
    }
}

/// How requests for a service are spread across its instances.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    #[serde(default)]
    pub strategy: LoadBalancingStrategy,

    #[serde(default)]
    pub instances: Vec<Instance>,
}

fn default_interval_ms() -> u64 {
    30_000
}

/// Health-check policy for a service.
#[derive(Clone, Serialize, Deserialize)]
pub struct HealthCheckPolicy {
    #[serde(default)]
    pub enabled: bool,

    /// Milliseconds between checks
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Path (or absolute URL) probed by the HTTP health probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Custom check used instead of the coordinator's default probe
    #[serde(skip)]
    pub handler: Option<Arc<dyn HealthProbe>>,
}

/// Whole milliseconds in `duration`, rounded up.
///
/// Policies store millisecond counts, so any non-zero duration maps to at
/// least 1ms. Saturates at `u64::MAX`.
pub fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

impl HealthCheckPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for HealthCheckPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: default_interval_ms(),
            endpoint: None,
            handler: None,
        }
    }
}

impl std::fmt::Debug for HealthCheckPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheckPolicy")
            .field("enabled", &self.enabled)
            .field("interval_ms", &self.interval_ms)
            .field("endpoint", &self.endpoint)
            .field("handler", &self.handler.as_ref().map(|_| "<custom>"))
            .finish()
    }
}

/// Per-service circuit-breaker settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerPolicy {
    /// Consecutive failures that open a closed breaker
    pub failure_threshold: u32,
    /// Milliseconds an open breaker waits before admitting a trial
    pub reset_timeout_ms: u64,
    /// Half-open successes needed to close the breaker
    pub success_threshold: u32,
}

impl Default for CircuitBreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerPolicy {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Static description of a service, owned by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,

    pub base_url: String,

    #[serde(default)]
    pub capabilities: Vec<String>,

    #[serde(default)]
    pub features: Vec<String>,

    #[serde(default)]
    pub routing: RoutingPolicy,

    #[serde(default)]
    pub health_check: HealthCheckPolicy,

    /// Overrides the coordinator's default breaker settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerPolicy>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ServiceDefinition {
    /// Create a definition with no instances and health checks disabled
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            capabilities: Vec::new(),
            features: Vec::new(),
            routing: RoutingPolicy::default(),
            health_check: HealthCheckPolicy::default(),
            circuit_breaker: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        let capability = capability.into();
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        let feature = feature.into();
        if !self.features.contains(&feature) {
            self.features.push(feature);
        }
        self
    }

    pub fn with_strategy(mut self, strategy: LoadBalancingStrategy) -> Self {
        self.routing.strategy = strategy;
        self
    }

    pub fn with_instance(mut self, instance: Instance) -> Self {
        self.routing.instances.push(instance);
        self
    }

    /// Enable health checks at the given interval
    pub fn with_health_check(mut self, interval: Duration) -> Self {
        self.health_check.enabled = true;
        self.health_check.interval_ms = duration_to_millis(interval);
        self
    }

    pub fn with_health_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.health_check.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_health_handler(mut self, handler: Arc<dyn HealthProbe>) -> Self {
        self.health_check.handler = Some(handler);
        self
    }

    pub fn with_circuit_breaker(mut self, policy: CircuitBreakerPolicy) -> Self {
        self.circuit_breaker = Some(policy);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }

    /// Check the definition can be routed to
    pub fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: String| RegistryError::InvalidDefinition {
            service: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("service name cannot be empty".to_string()));
        }

        check_http_url(&self.base_url).map_err(|e| invalid(format!("base_url: {}", e)))?;

        for instance in &self.routing.instances {
            check_http_url(&instance.url)
                .map_err(|e| invalid(format!("instance {}: {}", instance.url, e)))?;
            if instance.weight == 0 {
                return Err(invalid(format!("instance {} has zero weight", instance.url)));
            }
        }

        if self.health_check.enabled && self.health_check.interval_ms == 0 {
            return Err(invalid("health check interval must be positive".to_string()));
        }

        Ok(())
    }
}

fn check_http_url(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported scheme {}", other)),
    }
}

/// Outcome of one request dispatched to a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RequestOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Request counters kept by the registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub last_error: Option<String>,
    pub last_request_at: Option<DateTime<Utc>>,
}

impl RequestMetrics {
    pub fn record(&mut self, outcome: &RequestOutcome) {
        self.total_requests += 1;
        if outcome.success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
            self.last_error = outcome.error.clone();
        }
        self.last_request_at = Some(Utc::now());
    }

    /// Fraction of successful requests (1.0 when nothing was recorded)
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}

/// Live state the registry keeps next to each definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceState {
    pub is_healthy: bool,
    pub last_health_check: Option<DateTime<Utc>>,
    pub health_details: serde_json::Value,
    pub metrics: RequestMetrics,
}

impl Default for ServiceState {
    fn default() -> Self {
        Self {
            is_healthy: true,
            last_health_check: None,
            health_details: serde_json::Value::Null,
            metrics: RequestMetrics::default(),
        }
    }
}

/// A definition together with its live state, as returned by lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredService {
    pub definition: ServiceDefinition,
    pub state: ServiceState,
}

impl RegisteredService {
    pub fn new(definition: ServiceDefinition) -> Self {
        Self {
            definition,
            state: ServiceState::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn is_healthy(&self) -> bool {
        self.state.is_healthy
    }
}
