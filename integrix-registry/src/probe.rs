//! Health probe contract

use crate::service::ServiceDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Result of a completed health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    #[serde(default)]
    pub details: Value,
}

impl HealthReport {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            details: Value::Object(Default::default()),
        }
    }

    pub fn unhealthy() -> Self {
        Self {
            healthy: false,
            details: Value::Object(Default::default()),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if !self.details.is_object() {
            self.details = Value::Object(Default::default());
        }
        if let Value::Object(map) = &mut self.details {
            map.insert(key.into(), value.into());
        }
        self
    }
}

/// Reasons a health check could not produce a report.
#[derive(Debug, Error)]
pub enum HealthCheckError {
    #[error("Health request failed: {0}")]
    Request(String),

    #[error("Health check timed out after {0:?}")]
    Timeout(Duration),

    #[error("Health endpoint is invalid: {0}")]
    InvalidEndpoint(String),

    #[error("Health handler failed: {0}")]
    Handler(String),
}

/// Checks whether a service is able to take traffic.
///
/// The coordinator holds a default probe and lets a definition override it
/// through `HealthCheckPolicy::handler`.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, service: &ServiceDefinition) -> Result<HealthReport, HealthCheckError>;
}

/// Adapts an async closure into a [`HealthProbe`].
///
/// ```rust,ignore
/// let probe = FnHealthProbe::new(|name: &str| {
///     let name = name.to_string();
///     async move { Ok(HealthReport::healthy().with_detail("service", name)) }
/// });
/// ```
pub struct FnHealthProbe<F> {
    check: F,
}

impl<F> FnHealthProbe<F> {
    pub fn new(check: F) -> Self {
        Self { check }
    }
}

#[async_trait]
impl<F, Fut> HealthProbe for FnHealthProbe<F>
where
    F: Fn(&str) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HealthReport, HealthCheckError>> + Send,
{
    async fn check(&self, service: &ServiceDefinition) -> Result<HealthReport, HealthCheckError> {
        (self.check)(&service.name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_details() {
        let report = HealthReport::unhealthy()
            .with_detail("status", 503)
            .with_detail("endpoint", "/health");

        assert!(!report.healthy);
        assert_eq!(report.details["status"], 503);
        assert_eq!(report.details["endpoint"], "/health");
    }

    #[tokio::test]
    async fn test_fn_probe() {
        let probe = FnHealthProbe::new(|name: &str| {
            let healthy = name == "billing";
            async move {
                if healthy {
                    Ok(HealthReport::healthy())
                } else {
                    Err(HealthCheckError::Handler("database unreachable".to_string()))
                }
            }
        });

        let billing = ServiceDefinition::new("billing", "http://billing.internal");
        let fax = ServiceDefinition::new("fax", "http://fax.internal");

        assert!(probe.check(&billing).await.unwrap().healthy);
        assert!(matches!(
            probe.check(&fax).await,
            Err(HealthCheckError::Handler(_))
        ));
    }
}
