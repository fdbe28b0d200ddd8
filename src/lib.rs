// Integrix - service discovery with load balancing, circuit breaking and health monitoring
//
// This library bundles the registry contract and the discovery coordinator,
// with configuration and logging helpers behind features.

// Re-export the registry contract and data model
pub use integrix_registry::*;

// Re-export the coordinator
pub use integrix_discovery::*;

// Re-export optional crates
#[cfg(feature = "config")]
pub use integrix_config;

#[cfg(feature = "log")]
pub use integrix_log;

pub use integrix_discovery;
pub use integrix_registry;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        CircuitBreakerPolicy, CircuitState, DiscoveredService, DiscoveryConfig, DiscoveryError,
        DiscoveryEvent, HealthProbe, HealthReport, HttpHealthProbe, InMemoryRegistry, Instance,
        LoadBalancingStrategy, RegistryEvent, ServiceDefinition, ServiceDiscoveryCoordinator,
        ServiceRegistry,
    };
}
