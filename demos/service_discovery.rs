//! Service Discovery Example
//!
//! Demonstrates registration, load-balanced discovery, circuit breaking and
//! health monitoring against an in-memory registry.

use integrix::prelude::*;
use integrix::{FnHealthProbe, HealthCheckError};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    integrix::integrix_log::init();

    println!("\n=== Service Discovery Example ===\n");

    let registry = InMemoryRegistry::new();

    // Health checks in this example are answered locally instead of over HTTP
    let probe: Arc<dyn HealthProbe> = Arc::new(FnHealthProbe::new(|name: &str| {
        let name = name.to_string();
        async move { Ok::<_, HealthCheckError>(HealthReport::healthy().with_detail("service", name)) }
    }));

    let config = DiscoveryConfig::from_env()?;
    let coordinator = Arc::new(ServiceDiscoveryCoordinator::new(
        Arc::new(registry.clone()),
        config,
        probe,
    ));
    coordinator.start().await?;

    // 1. Register services
    println!("1. Registering Services:");

    registry
        .register(
            ServiceDefinition::new("billing", "http://billing.internal:8080")
                .with_capability("invoicing")
                .with_strategy(LoadBalancingStrategy::RoundRobin)
                .with_instance(Instance::new("http://10.0.0.10:8080"))
                .with_instance(Instance::new("http://10.0.0.11:8080"))
                .with_instance(Instance::new("http://10.0.0.12:8080"))
                .with_health_check(Duration::from_secs(15))
                .with_metadata("region", "us-east"),
        )
        .await?;

    registry
        .register(
            ServiceDefinition::new("fax", "http://fax.internal:9000")
                .with_capability("messaging")
                .with_circuit_breaker(CircuitBreakerPolicy {
                    failure_threshold: 3,
                    reset_timeout_ms: 2_000,
                    success_threshold: 1,
                }),
        )
        .await?;

    registry
        .register(
            ServiceDefinition::new("sms", "http://sms.internal:9100")
                .with_capability("messaging")
                .with_strategy(LoadBalancingStrategy::Weighted)
                .with_instance(Instance::new("http://10.0.1.10:9100").with_weight(3))
                .with_instance(Instance::new("http://10.0.1.11:9100").with_weight(1)),
        )
        .await?;

    // Let the coordinator pick up the registrations
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("   ✅ Registered billing, fax and sms");
    println!();

    // 2. Round-robin discovery
    println!("2. Round-Robin Discovery:");
    for _ in 0..4 {
        if let Some(found) = coordinator.discover_service("billing").await? {
            println!("   → billing routed to {}", found.instance.url);
        }
    }
    println!();

    // 3. Capability discovery
    println!("3. Discovering 'messaging' Services:");
    for found in coordinator.discover_by_capability("messaging").await {
        println!("   → {} at {}", found.service, found.instance.url);
    }
    println!();

    // 4. Circuit breaking
    println!("4. Circuit Breaking:");
    let mut events = coordinator.subscribe();
    for _ in 0..3 {
        coordinator.record_failure("fax", "connection refused").await;
    }
    if let Ok(event) = events.try_recv() {
        println!("   ⚡ {} ({})", event.event_name(), event.service());
    }
    match coordinator.discover_service("fax").await {
        Err(e) if e.is_circuit_open() => println!("   ❌ {}", e),
        other => println!("   unexpected: {:?}", other),
    }

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    if coordinator.discover_service("fax").await?.is_some() {
        println!("   ↻ fax admitted a trial request");
        coordinator.record_success("fax").await;
    }
    if let Some(breaker) = coordinator.circuit_breaker("fax") {
        println!("   ✅ fax circuit is now {}", breaker.state());
    }
    println!();

    // 5. Status
    println!("5. Discovery Status:");
    let status = coordinator.get_discovery_status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    coordinator.shutdown();
    println!("\n=== Example Complete ===\n");
    Ok(())
}
