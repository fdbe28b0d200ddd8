//! Service Discovery Coordinator for Integrix
//!
//! Sits between callers and an [`integrix_registry::ServiceRegistry`] and
//! turns "which service?" into "which instance, right now?".
//!
//! ## Features
//!
//! - **Load Balancing** - Round-robin, random, weighted and least-connections
//! - **Circuit Breaking** - Closed / open / half-open with a single trial in flight
//! - **Health Monitoring** - Periodic probes pushed back into the registry
//! - **Capability Discovery** - Fan-out queries by capability or feature
//! - **Status** - Serializable per-service snapshots
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use integrix_discovery::*;
//! use integrix_registry::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = InMemoryRegistry::new();
//!     let coordinator = Arc::new(ServiceDiscoveryCoordinator::with_http_probe(
//!         Arc::new(registry.clone()),
//!         DiscoveryConfig::from_env()?,
//!     ));
//!     coordinator.start().await?;
//!
//!     registry
//!         .register(
//!             ServiceDefinition::new("billing", "http://billing.internal")
//!                 .with_instance(Instance::new("http://billing-1.internal"))
//!                 .with_instance(Instance::new("http://billing-2.internal")),
//!         )
//!         .await?;
//!
//!     match coordinator.discover_service("billing").await {
//!         Ok(Some(found)) => println!("routing to {}", found.instance.url),
//!         Ok(None) => println!("billing is unavailable"),
//!         Err(e) if e.is_circuit_open() => println!("billing is cooling down"),
//!         Err(e) => return Err(e.into()),
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod health;
pub mod load_balancer;
pub mod status;

pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState, Rejection, Transition,
};
pub use config::{DiscoveryConfig, HealthCheckSettings};
pub use coordinator::{DiscoveredService, ServiceDiscoveryCoordinator};
pub use error::{DiscoveryError, Result};
pub use events::DiscoveryEvent;
pub use health::{DEFAULT_HEALTH_ENDPOINT, HealthMonitor, HttpHealthProbe, MonitorStats};
pub use load_balancer::LoadBalancerState;
pub use status::{BreakerStatus, MonitorStatus, ServiceDiscoveryStatus};
