//! Coordinator events

use serde::Serialize;

/// Notifications published by the discovery coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DiscoveryEvent {
    /// A closed breaker reached its failure threshold
    CircuitBreakerOpened { service: String, failures: u32 },

    /// A half-open breaker recovered
    CircuitBreakerClosed { service: String },
}

impl DiscoveryEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::CircuitBreakerOpened { .. } => "circuit-breaker:opened",
            Self::CircuitBreakerClosed { .. } => "circuit-breaker:closed",
        }
    }

    pub fn service(&self) -> &str {
        match self {
            Self::CircuitBreakerOpened { service, .. } | Self::CircuitBreakerClosed { service } => {
                service
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let opened = DiscoveryEvent::CircuitBreakerOpened {
            service: "fax".to_string(),
            failures: 5,
        };
        assert_eq!(opened.event_name(), "circuit-breaker:opened");
        assert_eq!(opened.service(), "fax");

        let json = serde_json::to_value(&opened).unwrap();
        assert_eq!(json["event"], "circuit_breaker_opened");
        assert_eq!(json["failures"], 5);
    }
}
