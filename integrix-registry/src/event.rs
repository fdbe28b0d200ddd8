//! Registry lifecycle events

use crate::service::ServiceDefinition;

/// Lifecycle notifications published by a registry.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A service was registered, or re-registered with a new definition
    Registered {
        service: String,
        definition: ServiceDefinition,
    },

    /// A service was removed
    Deregistered { service: String },

    /// The health of a service (or one of its instances) changed
    HealthChanged {
        service: String,
        current_health: bool,
    },
}

impl RegistryEvent {
    /// Event name, as used in logs
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "service:registered",
            Self::Deregistered { .. } => "service:deregistered",
            Self::HealthChanged { .. } => "service:health-changed",
        }
    }

    /// Name of the service the event is about
    pub fn service(&self) -> &str {
        match self {
            Self::Registered { service, .. }
            | Self::Deregistered { service }
            | Self::HealthChanged { service, .. } => service,
        }
    }
}
