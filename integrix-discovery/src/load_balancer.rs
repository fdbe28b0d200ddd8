//! Instance selection
//!
//! Each service gets a [`LoadBalancerState`] holding a cached copy of its
//! instances and a round-robin cursor.
//!
//! # Strategies
//!
//! - **Round Robin**: Rotation through healthy instances in registration order
//! - **Random**: Uniform pick among healthy instances
//! - **Weighted**: Pick proportional to instance weight
//! - **Least Connections**: Fewest active connections, first one on ties
//!
//! A service without instances resolves to its base URL.

use integrix_registry::{Instance, LoadBalancingStrategy, ServiceDefinition};
use rand::Rng;

/// Load balancer state for one service.
#[derive(Debug, Clone)]
pub struct LoadBalancerState {
    strategy: LoadBalancingStrategy,
    current_index: usize,
    instances: Vec<Instance>,
    base_url: String,
}

impl LoadBalancerState {
    /// Seed state from a service definition.
    pub fn new(definition: &ServiceDefinition) -> Self {
        Self {
            strategy: definition.routing.strategy,
            current_index: 0,
            instances: definition.routing.instances.clone(),
            base_url: definition.base_url.clone(),
        }
    }

    pub fn strategy(&self) -> LoadBalancingStrategy {
        self.strategy
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replace the cached instances with the registry's current view.
    ///
    /// The cursor is kept, so a health flip does not restart the rotation.
    /// Tracked connection counts survive for instances that are still listed.
    pub fn refresh(&mut self, definition: &ServiceDefinition) {
        let previous = std::mem::take(&mut self.instances);

        self.strategy = definition.routing.strategy;
        self.base_url = definition.base_url.clone();
        self.instances = definition
            .routing
            .instances
            .iter()
            .map(|instance| {
                let mut instance = instance.clone();
                if instance.active_connections.is_none() {
                    instance.active_connections = previous
                        .iter()
                        .find(|p| p.url == instance.url)
                        .and_then(|p| p.active_connections);
                }
                instance
            })
            .collect();
    }

    /// Select an instance using the thread-local RNG.
    pub fn select(&mut self) -> Option<Instance> {
        self.select_with(&mut rand::rng())
    }

    /// Select an instance using the given RNG for the randomized strategies.
    ///
    /// Returns `None` when instances are configured but none is healthy.
    pub fn select_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Instance> {
        if self.instances.is_empty() {
            return Some(Instance::new(self.base_url.clone()));
        }

        let healthy: Vec<&Instance> = self.instances.iter().filter(|i| i.healthy).collect();
        if healthy.is_empty() {
            return None;
        }

        let selected = match self.strategy {
            LoadBalancingStrategy::RoundRobin => {
                let idx = self.current_index % healthy.len();
                self.current_index = (self.current_index + 1) % healthy.len();
                healthy[idx]
            }
            LoadBalancingStrategy::Random => healthy[rng.random_range(0..healthy.len())],
            LoadBalancingStrategy::Weighted => select_weighted(&healthy, rng),
            LoadBalancingStrategy::LeastConnections => healthy
                .iter()
                .copied()
                .min_by_key(|i| i.connections())
                .unwrap_or(healthy[0]),
        };

        Some(selected.clone())
    }

    /// Note a request starting on `url`. Returns false for an unknown instance.
    pub fn connection_started(&mut self, url: &str) -> bool {
        match self.instances.iter_mut().find(|i| i.url == url) {
            Some(instance) => {
                instance.active_connections = Some(instance.connections().saturating_add(1));
                true
            }
            None => false,
        }
    }

    /// Note a request finishing on `url`. Returns false for an unknown instance.
    pub fn connection_finished(&mut self, url: &str) -> bool {
        match self.instances.iter_mut().find(|i| i.url == url) {
            Some(instance) => {
                instance.active_connections = Some(instance.connections().saturating_sub(1));
                true
            }
            None => false,
        }
    }
}

/// Weighted pick: draw in `[0, total)` and walk the list subtracting weights.
fn select_weighted<'a, R: Rng + ?Sized>(healthy: &[&'a Instance], rng: &mut R) -> &'a Instance {
    let total: u64 = healthy.iter().map(|i| u64::from(i.weight)).sum();
    if total == 0 {
        return healthy[0];
    }

    let mut cursor = rng.random_range(0.0..total as f64);
    for instance in healthy {
        cursor -= f64::from(instance.weight);
        if cursor <= 0.0 {
            return instance;
        }
    }

    // Floating point leftovers land on the last instance
    healthy[healthy.len() - 1]
}
