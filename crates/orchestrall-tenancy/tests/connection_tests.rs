// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection manager behaviour: caching, eviction, isolation, teardown
//! races, and health-driven eviction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orchestrall_core::{
    ConnectionFactory, ConnectionTarget, HealthState, IsolationMode, OrchestrallError, TenantId,
};
use orchestrall_tenancy::{
    ConnectionManager, ConnectionSettings, IsolationStrategy, SqliteConnectionFactory,
    TenantConnectionHandle,
};
use orchestrall_test_utils::MockConnectionFactory;

fn tenant(id: &str) -> TenantId {
    TenantId::parse(id).unwrap()
}

fn settings(max_pools: usize) -> ConnectionSettings {
    ConnectionSettings {
        max_dedicated_pools: max_pools,
        connect_timeout: Duration::from_secs(1),
        idle_timeout: Duration::from_secs(300),
        health_interval: None,
    }
}

fn dedicated(factory: &MockConnectionFactory, settings: ConnectionSettings) -> ConnectionManager {
    ConnectionManager::initialize(
        IsolationMode::DedicatedDatabase,
        settings,
        Arc::new(factory.clone()),
    )
}

#[tokio::test]
async fn lru_handle_is_evicted_before_establishing_a_third() {
    let factory = MockConnectionFactory::new();
    let manager = dedicated(&factory, settings(2));
    let (a, b, c) = (tenant("tenant-a"), tenant("tenant-b"), tenant("tenant-c"));

    let handle_a = manager.resolve(&a).await.unwrap();
    let handle_b = manager.resolve(&b).await.unwrap();
    drop(handle_a);
    drop(handle_b);
    // A becomes the most recently used.
    drop(manager.resolve(&a).await.unwrap());

    let handle_c = manager.resolve(&c).await.unwrap();

    assert_eq!(manager.live_tenants(), vec![a.clone(), c.clone()]);
    assert_eq!(handle_c.tenant(), &c);
    let connections = factory.connections();
    assert_eq!(connections.len(), 3);
    assert_eq!(connections[1].target(), &ConnectionTarget::Dedicated(b.clone()));
    assert!(connections[1].is_closed(), "evicted connection must be closed before C connects");
    assert!(!connections[0].is_closed());

    // B re-establishes on its next resolve, evicting A.
    manager.resolve(&b).await.unwrap();
    assert_eq!(factory.connect_count(), 4);
    assert_eq!(manager.live_tenants(), vec![b, c]);
}

#[tokio::test]
async fn busy_handles_are_not_evicted() {
    let factory = MockConnectionFactory::new();
    let manager = dedicated(&factory, settings(1));

    let held = manager.resolve(&tenant("acme")).await.unwrap();
    let err = manager.resolve(&tenant("globex")).await.unwrap_err();

    match err {
        OrchestrallError::ConnectionUnavailable { tenant, message } => {
            assert_eq!(tenant, "globex");
            assert!(message.contains("pool exhausted"), "message: {message}");
        }
        other => panic!("expected ConnectionUnavailable, got {other}"),
    }
    assert!(held.connection().is_ok());

    drop(held);
    assert!(manager.resolve(&tenant("globex")).await.is_ok());
}

#[tokio::test]
async fn distinct_tenants_never_share_a_handle() {
    for mode in [IsolationMode::SharedSchema, IsolationMode::DedicatedDatabase] {
        let factory = MockConnectionFactory::new();
        let manager = ConnectionManager::initialize(mode, settings(4), Arc::new(factory.clone()));

        let a = manager.resolve(&tenant("acme")).await.unwrap();
        let b = manager.resolve(&tenant("globex")).await.unwrap();

        assert!(!Arc::ptr_eq(&a, &b), "{mode}");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.tenant().as_str(), "acme");
        assert_eq!(b.tenant().as_str(), "globex");
        assert_eq!(a.mode(), mode);
        match mode {
            IsolationMode::SharedSchema => {
                assert_eq!(factory.connect_count(), 1);
                assert_eq!(a.discriminator().unwrap().value(), "acme");
                assert_eq!(b.discriminator().unwrap().value(), "globex");
            }
            IsolationMode::DedicatedDatabase => {
                assert_eq!(factory.connect_count(), 2);
                assert!(a.discriminator().is_none());
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_resolves_of_one_tenant_connect_once() {
    let factory = MockConnectionFactory::new().with_connect_delay(Duration::from_millis(50));
    let manager = dedicated(&factory, settings(4));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.resolve(&tenant("acme")).await })
        })
        .collect();
    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().unwrap());
    }

    assert_eq!(factory.connect_count(), 1);
    assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[tokio::test(start_paused = true)]
async fn different_tenants_connect_concurrently() {
    let factory = MockConnectionFactory::new().with_connect_delay(Duration::from_millis(100));
    let manager = dedicated(&factory, settings(4));
    let started = tokio::time::Instant::now();

    let acme = tenant("acme");
    let globex = tenant("globex");
    let (a, b) = tokio::join!(manager.resolve(&acme), manager.resolve(&globex));

    assert!(a.is_ok() && b.is_ok());
    assert!(started.elapsed() < Duration::from_millis(150));
}

#[tokio::test(start_paused = true)]
async fn slow_connect_times_out_without_caching() {
    let factory = MockConnectionFactory::new().with_connect_delay(Duration::from_secs(5));
    let manager = dedicated(&factory, settings(1));

    let err = manager.resolve(&tenant("acme")).await.unwrap_err();

    assert!(matches!(err, OrchestrallError::ConnectionUnavailable { ref message, .. } if message.contains("timed out")));
    assert_eq!(manager.handle_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn teardown_wins_over_in_flight_resolve() {
    let factory = MockConnectionFactory::new().with_connect_delay(Duration::from_millis(100));
    let manager = dedicated(&factory, settings(4));
    let acme = tenant("acme");

    let resolving = {
        let manager = manager.clone();
        let acme = acme.clone();
        tokio::spawn(async move { manager.resolve(&acme).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!manager.teardown(&acme).await, "nothing cached yet");

    let result = resolving.await.unwrap();
    assert!(matches!(result, Err(OrchestrallError::ConnectionUnavailable { .. })));
    assert!(manager.live_tenants().is_empty());
    assert_eq!(factory.connect_count(), 1);
    assert_eq!(factory.open_count(), 0, "discarded connection is closed");

    // A resolve that starts after the teardown succeeds.
    assert!(manager.resolve(&acme).await.is_ok());
}

#[tokio::test]
async fn teardown_invalidates_outstanding_handles() {
    let factory = MockConnectionFactory::new();
    let manager = dedicated(&factory, settings(4));
    let acme = tenant("acme");
    let handle = manager.resolve(&acme).await.unwrap();

    assert!(manager.teardown(&acme).await);

    assert!(!handle.is_valid());
    assert!(handle.connection().is_err());
    let fresh = manager.resolve(&acme).await.unwrap();
    assert_ne!(fresh.id(), handle.id());
}

#[tokio::test]
async fn failed_probe_evicts_and_next_resolve_reconnects() {
    let factory = MockConnectionFactory::new();
    let manager = dedicated(&factory, settings(4));
    let acme = tenant("acme");
    let handle = manager.resolve(&acme).await.unwrap();

    let healthy = manager.health_check(&acme).await;
    assert_eq!(healthy.status, HealthState::Healthy);

    factory.set_unhealthy(&ConnectionTarget::Dedicated(acme.clone()), true);
    let result = manager.health_check(&acme).await;

    assert_eq!(result.status, HealthState::Unhealthy);
    assert_eq!(handle.health(), HealthState::Unhealthy);
    assert!(!handle.is_valid());
    assert!(manager.live_tenants().is_empty());
    assert_eq!(manager.last_health(&acme).unwrap().status, HealthState::Unhealthy);

    factory.set_unhealthy(&ConnectionTarget::Dedicated(acme.clone()), false);
    let fresh = manager.resolve(&acme).await.unwrap();
    assert_ne!(fresh.id(), handle.id());
    assert_eq!(factory.connect_count(), 2);
}

#[tokio::test]
async fn failed_shared_probe_evicts_every_tenant_on_that_connection() {
    let factory = MockConnectionFactory::new();
    let manager = ConnectionManager::initialize(
        IsolationMode::SharedSchema,
        settings(4),
        Arc::new(factory.clone()),
    );
    let (acme, globex) = (tenant("acme"), tenant("globex"));
    drop(manager.resolve(&acme).await.unwrap());
    let stale_globex = manager.resolve(&globex).await.unwrap();

    factory.set_unhealthy(&ConnectionTarget::Shared, true);
    let result = manager.health_check(&acme).await;
    assert_eq!(result.status, HealthState::Unhealthy);

    assert!(manager.live_tenants().is_empty());
    assert!(!stale_globex.is_valid());
    assert!(factory.connections()[0].is_closed());

    factory.set_unhealthy(&ConnectionTarget::Shared, false);
    let fresh_globex = manager.resolve(&globex).await.unwrap();
    assert_ne!(fresh_globex.id(), stale_globex.id());
    assert_eq!(
        fresh_globex.execute("INSERT INTO audit (tenant_id) VALUES (?1)", Vec::new()).await.unwrap(),
        1
    );
    let fresh_acme = manager.resolve(&acme).await.unwrap();
    assert_eq!(fresh_acme.execute("SELECT ?1", Vec::new()).await.unwrap(), 1);
    assert_eq!(factory.connect_count(), 2, "both tenants share the reconnected database");
}

#[tokio::test(start_paused = true)]
async fn monitor_task_evicts_unhealthy_connection() {
    let factory = MockConnectionFactory::new();
    let manager = dedicated(
        &factory,
        ConnectionSettings {
            health_interval: Some(Duration::from_secs(10)),
            ..settings(4)
        },
    );
    let acme = tenant("acme");
    drop(manager.resolve(&acme).await.unwrap());

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(manager.live_tenants(), vec![acme.clone()]);

    factory.set_unhealthy(&ConnectionTarget::Dedicated(acme.clone()), true);
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(manager.live_tenants().is_empty());
    assert_eq!(manager.last_health(&acme).unwrap().status, HealthState::Unhealthy);
}

#[tokio::test]
async fn reap_idle_skips_borrowed_handles() {
    let factory = MockConnectionFactory::new();
    let manager = dedicated(
        &factory,
        ConnectionSettings {
            idle_timeout: Duration::ZERO,
            ..settings(4)
        },
    );
    drop(manager.resolve(&tenant("acme")).await.unwrap());
    let held = manager.resolve(&tenant("globex")).await.unwrap();

    let reaped = manager.reap_idle().await;

    assert_eq!(reaped, vec![tenant("acme")]);
    assert_eq!(manager.live_tenants(), vec![tenant("globex")]);
    assert!(held.is_valid());
}

/// Hands out handles bound to the wrong tenant.
struct MisroutingStrategy;

#[async_trait]
impl IsolationStrategy for MisroutingStrategy {
    fn mode(&self) -> IsolationMode {
        IsolationMode::DedicatedDatabase
    }

    fn capacity(&self) -> Option<usize> {
        None
    }

    async fn establish(
        &self,
        _tenant: &TenantId,
        factory: &dyn ConnectionFactory,
    ) -> Result<TenantConnectionHandle, OrchestrallError> {
        let other = tenant("intruder");
        let connection = factory
            .connect(&ConnectionTarget::Dedicated(other.clone()))
            .await?;
        Ok(TenantConnectionHandle::dedicated(other, connection))
    }

    async fn release(&self, handle: &TenantConnectionHandle, _healthy: bool) -> bool {
        let _ = handle.close_connection().await;
        false
    }
}

#[tokio::test]
#[tracing_test::traced_test]
async fn mismatched_handle_is_an_isolation_violation() {
    let factory = MockConnectionFactory::new();
    let manager = ConnectionManager::with_strategy(
        Box::new(MisroutingStrategy),
        settings(4),
        Arc::new(factory.clone()),
    );

    let err = manager.resolve(&tenant("acme")).await.unwrap_err();

    match err {
        OrchestrallError::IsolationViolation { requested, actual } => {
            assert_eq!(requested, "acme");
            assert_eq!(actual, "intruder");
        }
        other => panic!("expected IsolationViolation, got {other}"),
    }
    assert!(manager.live_tenants().is_empty());
    assert_eq!(factory.open_count(), 0);
    assert!(logs_contain("tenant isolation violation"));
}

#[tokio::test]
async fn shared_schema_rows_are_scoped_by_discriminator() {
    let manager = ConnectionManager::initialize(
        IsolationMode::SharedSchema,
        settings(4),
        Arc::new(SqliteConnectionFactory::in_memory()),
    );
    let acme = manager.resolve(&tenant("acme")).await.unwrap();
    let globex = manager.resolve(&tenant("globex")).await.unwrap();

    acme.connection()
        .unwrap()
        .execute_batch("CREATE TABLE orders (tenant_id TEXT NOT NULL, total INTEGER NOT NULL);")
        .await
        .unwrap();
    for total in ["10", "20"] {
        acme.execute("INSERT INTO orders (tenant_id, total) VALUES (?1, ?2)", vec![total.into()])
            .await
            .unwrap();
    }
    globex
        .execute("INSERT INTO orders (tenant_id, total) VALUES (?1, ?2)", vec!["99".into()])
        .await
        .unwrap();

    let count = "SELECT COUNT(*) FROM orders WHERE tenant_id = ?1";
    assert_eq!(acme.query_i64(count, Vec::new()).await.unwrap(), Some(2));
    assert_eq!(globex.query_i64(count, Vec::new()).await.unwrap(), Some(1));

    manager.shutdown().await;
}

#[tokio::test]
async fn dedicated_sqlite_databases_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let factory = SqliteConnectionFactory::new(":memory:", dir.path().to_string_lossy());
    let manager = ConnectionManager::initialize(
        IsolationMode::DedicatedDatabase,
        settings(4),
        Arc::new(factory),
    );
    let schema = "CREATE TABLE notes (tenant_id TEXT NOT NULL, body TEXT NOT NULL);";
    let acme = manager.resolve(&tenant("acme")).await.unwrap();
    let globex = manager.resolve(&tenant("globex")).await.unwrap();
    acme.connection().unwrap().execute_batch(schema).await.unwrap();
    globex.connection().unwrap().execute_batch(schema).await.unwrap();

    acme.execute("INSERT INTO notes VALUES (?1, ?2)", vec!["hello".into()])
        .await
        .unwrap();

    let all = "SELECT COUNT(*) FROM notes WHERE tenant_id = ?1 OR 1 = 1";
    assert_eq!(acme.query_i64(all, Vec::new()).await.unwrap(), Some(1));
    assert_eq!(globex.query_i64(all, Vec::new()).await.unwrap(), Some(0));
    assert!(dir.path().join("acme.db").exists());
    assert!(dir.path().join("globex.db").exists());
}
