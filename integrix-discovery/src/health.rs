//! Periodic health monitoring
//!
//! A [`HealthMonitor`] owns one background task per service. Every tick it
//! runs a [`HealthProbe`] and pushes the result to the registry. Nothing that
//! happens inside a tick stops the loop: probe errors and panics are recorded
//! as an unhealthy result, registry errors are logged.
//!
//! [`HttpHealthProbe`] is the default probe: `GET base_url + endpoint`, healthy
//! on any 2xx status.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use integrix_registry::{
    HealthCheckError, HealthCheckPolicy, HealthProbe, HealthReport, ServiceDefinition,
    ServiceRegistry, duration_to_millis,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use url::Url;

/// Endpoint probed when a definition names none
pub const DEFAULT_HEALTH_ENDPOINT: &str = "/health";

/// HTTP health probe backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// Use an existing client (shared connection pool, custom TLS)
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve the URL probed for a service.
    ///
    /// An absolute endpoint is used as is; a relative one is joined onto the
    /// service's base URL.
    pub fn health_url(service: &ServiceDefinition) -> Result<Url, HealthCheckError> {
        let endpoint = service
            .health_check
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_HEALTH_ENDPOINT);

        if let Ok(url) = Url::parse(endpoint) {
            return Ok(url);
        }

        Url::parse(&service.base_url)
            .and_then(|base| base.join(endpoint))
            .map_err(|e| HealthCheckError::InvalidEndpoint(format!("{}: {}", endpoint, e)))
    }
}

impl Default for HttpHealthProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self, service: &ServiceDefinition) -> Result<HealthReport, HealthCheckError> {
        let url = Self::health_url(service)?;

        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HealthCheckError::Timeout(self.timeout)
                } else {
                    HealthCheckError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        let report = if status.is_success() {
            HealthReport::healthy()
        } else {
            HealthReport::unhealthy()
        };

        Ok(report
            .with_detail("status", status.as_u16())
            .with_detail("endpoint", url.as_str()))
    }
}

/// Counters kept by a running monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    pub last_check: Option<DateTime<Utc>>,
    /// Probe errors since the last completed check
    pub consecutive_failures: u32,
    pub total_checks: u64,
}

/// Background health-check task for one service.
///
/// Dropping the monitor aborts its task.
#[derive(Debug)]
pub struct HealthMonitor {
    service: String,
    interval: Duration,
    handle: JoinHandle<()>,
    stats: Arc<Mutex<MonitorStats>>,
}

impl HealthMonitor {
    /// Start checking `definition` every `health_check.interval_ms`.
    ///
    /// The first check runs immediately. A zero interval falls back to the
    /// default policy interval. Must be called within a tokio runtime.
    pub fn spawn(
        registry: Arc<dyn ServiceRegistry>,
        definition: ServiceDefinition,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        let service = definition.name.clone();
        let mut interval = definition.health_check.interval();
        if interval.is_zero() {
            interval = HealthCheckPolicy::default().interval();
            warn!(
                service = %service,
                interval_ms = duration_to_millis(interval),
                "Health check interval is zero, using default"
            );
        }
        let stats = Arc::new(Mutex::new(MonitorStats::default()));

        let task_stats = Arc::clone(&stats);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                run_check(registry.as_ref(), &definition, probe.as_ref(), &task_stats).await;
            }
        });

        debug!(service = %service, interval_ms = duration_to_millis(interval), "Health monitor started");

        Self {
            service,
            interval,
            handle,
            stats,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Snapshot of the monitor's counters
    pub fn stats(&self) -> MonitorStats {
        self.stats.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Abort the background task
    pub fn stop(&self) {
        if !self.handle.is_finished() {
            debug!(service = %self.service, "Health monitor stopped");
        }
        self.handle.abort();
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run_check(
    registry: &dyn ServiceRegistry,
    definition: &ServiceDefinition,
    probe: &dyn HealthProbe,
    stats: &Mutex<MonitorStats>,
) {
    let name = definition.name.as_str();
    let outcome = AssertUnwindSafe(probe.check(definition)).catch_unwind().await;

    let (healthy, details) = {
        let mut stats = stats.lock();
        stats.total_checks += 1;
        stats.last_check = Some(Utc::now());

        match outcome {
            Ok(Ok(report)) => {
                stats.consecutive_failures = 0;
                (report.healthy, report.details)
            }
            Ok(Err(e)) => {
                stats.consecutive_failures += 1;
                warn!(
                    service = %name,
                    consecutive_failures = stats.consecutive_failures,
                    error = %e,
                    "Health check failed"
                );
                (false, json!({ "error": e.to_string() }))
            }
            Err(_) => {
                stats.consecutive_failures += 1;
                warn!(
                    service = %name,
                    consecutive_failures = stats.consecutive_failures,
                    "Health probe panicked"
                );
                (false, json!({ "error": "health probe panicked" }))
            }
        }
    };

    if let Err(e) = registry.update_health_status(name, healthy, details).await {
        warn!(service = %name, error = %e, "Failed to store health status");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use integrix_registry::{FnHealthProbe, InMemoryRegistry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn counting_probe(counter: Arc<AtomicUsize>, healthy: bool) -> Arc<dyn HealthProbe> {
        Arc::new(FnHealthProbe::new(move |_name: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                let report = if healthy {
                    HealthReport::healthy()
                } else {
                    HealthReport::unhealthy().with_detail("reason", "draining")
                };
                Ok::<_, HealthCheckError>(report)
            }
        }))
    }

    #[test]
    fn test_health_url_resolution() {
        let service = ServiceDefinition::new("billing", "http://billing.internal:8080");
        assert_eq!(
            HttpHealthProbe::health_url(&service).unwrap().as_str(),
            "http://billing.internal:8080/health"
        );

        let custom = service.clone().with_health_endpoint("/status/ready");
        assert_eq!(
            HttpHealthProbe::health_url(&custom).unwrap().as_str(),
            "http://billing.internal:8080/status/ready"
        );

        let absolute = service.with_health_endpoint("http://sidecar:9000/healthz");
        assert_eq!(
            HttpHealthProbe::health_url(&absolute).unwrap().as_str(),
            "http://sidecar:9000/healthz"
        );
    }

    #[tokio::test]
    async fn test_http_probe_healthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let service = ServiceDefinition::new("billing", server.uri());
        let report = HttpHealthProbe::default().check(&service).await.unwrap();

        assert!(report.healthy);
        assert_eq!(report.details["status"], 200);
    }

    #[tokio::test]
    async fn test_http_probe_unhealthy_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ready"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let service = ServiceDefinition::new("billing", server.uri()).with_health_endpoint("/ready");
        let report = HttpHealthProbe::default().check(&service).await.unwrap();

        assert!(!report.healthy);
        assert_eq!(report.details["status"], 503);
    }

    #[tokio::test]
    async fn test_http_probe_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let service = ServiceDefinition::new("billing", server.uri());
        let probe = HttpHealthProbe::new(Duration::from_millis(50));

        assert!(matches!(
            probe.check(&service).await,
            Err(HealthCheckError::Timeout(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_ticks_on_interval() {
        let registry = InMemoryRegistry::new();
        let definition = ServiceDefinition::new("billing", "http://billing.internal")
            .with_health_check(Duration::from_secs(10));
        registry.register(definition.clone()).await.unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let monitor = HealthMonitor::spawn(
            Arc::new(registry.clone()),
            definition,
            counting_probe(counter.clone(), true),
        );

        // Ticks at 0s, 10s and 20s
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        let stats = monitor.stats();
        assert_eq!(stats.total_checks, 3);
        assert_eq!(stats.consecutive_failures, 0);
        assert!(stats.last_check.is_some());

        monitor.stop();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(!monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_report_reaches_registry() {
        let registry = InMemoryRegistry::new();
        let definition = ServiceDefinition::new("fax", "http://fax.internal")
            .with_health_check(Duration::from_secs(5));
        registry.register(definition.clone()).await.unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let monitor = HealthMonitor::spawn(
            Arc::new(registry.clone()),
            definition,
            counting_probe(counter, false),
        );
        tokio::time::sleep(Duration::from_secs(1)).await;

        let service = registry.get_service("fax").await.unwrap().unwrap();
        assert!(!service.is_healthy());
        assert_eq!(service.state.health_details["reason"], "draining");
        // A completed check is not a probe failure
        assert_eq!(monitor.stats().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_errors_and_panics_keep_the_loop_alive() {
        let registry = InMemoryRegistry::new();
        let definition = ServiceDefinition::new("fax", "http://fax.internal")
            .with_health_check(Duration::from_secs(5));
        registry.register(definition.clone()).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let probe_calls = calls.clone();
        let probe: Arc<dyn HealthProbe> = Arc::new(FnHealthProbe::new(move |_name: &str| {
            let call = probe_calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 1 {
                    panic!("probe exploded");
                }
                Err::<HealthReport, _>(HealthCheckError::Handler("modem offline".to_string()))
            }
        }));

        let monitor = HealthMonitor::spawn(Arc::new(registry.clone()), definition, probe);
        tokio::time::sleep(Duration::from_secs(12)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(monitor.is_running());
        assert_eq!(monitor.stats().consecutive_failures, 3);

        let service = registry.get_service("fax").await.unwrap().unwrap();
        assert!(!service.is_healthy());
        assert!(
            service.state.health_details["error"]
                .as_str()
                .unwrap()
                .contains("modem offline")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_uses_default() {
        let registry = InMemoryRegistry::new();
        let mut definition = ServiceDefinition::new("sms", "http://sms.internal");
        definition.health_check.enabled = true;
        definition.health_check.interval_ms = 0;

        let counter = Arc::new(AtomicUsize::new(0));
        let monitor = HealthMonitor::spawn(
            Arc::new(registry),
            definition,
            counting_probe(counter.clone(), true),
        );
        assert_eq!(monitor.interval(), HealthCheckPolicy::default().interval());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(monitor.is_running());
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        tokio::time::sleep(monitor.interval()).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(monitor.stats().total_checks, 2);
    }
}
