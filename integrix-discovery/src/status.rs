//! Status snapshots for dashboards

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::health::MonitorStats;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Breaker summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerStatus {
    pub state: CircuitState,
    pub failures: u32,
}

impl From<&CircuitBreaker> for BreakerStatus {
    fn from(breaker: &CircuitBreaker) -> Self {
        Self {
            state: breaker.state(),
            failures: breaker.failures(),
        }
    }
}

/// Health monitor summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorStatus {
    pub enabled: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl MonitorStatus {
    pub fn new(enabled: bool, stats: &MonitorStats) -> Self {
        Self {
            enabled,
            last_check: stats.last_check,
            consecutive_failures: stats.consecutive_failures,
        }
    }
}

/// Per-service entry of `ServiceDiscoveryCoordinator::get_discovery_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDiscoveryStatus {
    /// Whether the registry still knows the service
    pub registered: bool,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<BreakerStatus>,
    /// Number of instances configured for the service
    pub instances: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_monitor: Option<MonitorStatus>,
}
