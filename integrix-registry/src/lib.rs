//! Service Registry for Integrix
//!
//! This crate defines the registry contract the discovery coordinator
//! consumes, the service data model, and an in-memory registry.
//!
//! ## Features
//!
//! - **Service Definitions** - Capabilities, features, routing and health-check policy
//! - **Live State** - Health status and request metrics per service
//! - **Lifecycle Events** - Typed `Registered` / `Deregistered` / `HealthChanged` events
//! - **Health Probes** - Pluggable health checks via [`HealthProbe`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use integrix_registry::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = InMemoryRegistry::new();
//!     let mut events = registry.subscribe();
//!
//!     let billing = ServiceDefinition::new("billing", "http://billing.internal:8080")
//!         .with_capability("invoicing")
//!         .with_strategy(LoadBalancingStrategy::RoundRobin)
//!         .with_instance(Instance::new("http://billing-1:8080"))
//!         .with_instance(Instance::new("http://billing-2:8080"));
//!
//!     registry.register(billing).await?;
//!
//!     let event = events.recv().await?;
//!     assert_eq!(event.event_name(), "service:registered");
//!
//!     Ok(())
//! }
//! ```
//!
//! ### Loading Definitions From a File
//!
//! ```rust,ignore
//! let registry = InMemoryRegistry::new();
//! registry.load_definitions("config/services.toml").await?;
//! ```

pub mod event;
pub mod memory;
pub mod probe;
pub mod registry;
pub mod service;

pub use event::RegistryEvent;
pub use memory::InMemoryRegistry;
pub use probe::{FnHealthProbe, HealthCheckError, HealthProbe, HealthReport};
pub use registry::{RegistryError, ServiceRegistry};
pub use service::{
    CircuitBreakerPolicy, HealthCheckPolicy, Instance, LoadBalancingStrategy, RegisteredService,
    RequestMetrics, RequestOutcome, RoutingPolicy, ServiceDefinition, ServiceState,
    duration_to_millis,
};
