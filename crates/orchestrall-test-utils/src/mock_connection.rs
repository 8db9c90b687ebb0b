// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock connection factory for tenancy tests.
//!
//! Every connection handed out is retained by the factory so tests can
//! inspect which targets were connected, which connections were closed, and
//! which statements ran on them.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use orchestrall_core::{ConnectionFactory, ConnectionTarget, DataConnection, OrchestrallError};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct FactoryState {
    next_id: AtomicU64,
    fail_remaining: AtomicUsize,
    connect_delay: Mutex<Option<Duration>>,
    unhealthy: Mutex<HashSet<ConnectionTarget>>,
    connections: Mutex<Vec<Arc<MockConnection>>>,
}

/// A connection factory whose behaviour is controlled by the test.
#[derive(Clone, Default)]
pub struct MockConnectionFactory {
    state: Arc<FactoryState>,
}

impl MockConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connect sleeps for `delay` before completing.
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *lock(&self.state.connect_delay) = Some(delay);
        self
    }

    /// The next `count` connects fail with `ConnectionUnavailable`.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.fail_remaining.store(count, Ordering::SeqCst);
    }

    /// Make pings of connections to `target` fail (or succeed again).
    pub fn set_unhealthy(&self, target: &ConnectionTarget, unhealthy: bool) {
        let mut set = lock(&self.state.unhealthy);
        if unhealthy {
            set.insert(target.clone());
        } else {
            set.remove(target);
        }
    }

    /// Number of successful connects so far.
    pub fn connect_count(&self) -> usize {
        lock(&self.state.connections).len()
    }

    /// Targets of every successful connect, in order.
    pub fn connected_targets(&self) -> Vec<ConnectionTarget> {
        lock(&self.state.connections)
            .iter()
            .map(|c| c.target.clone())
            .collect()
    }

    /// Every connection handed out, in order.
    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        lock(&self.state.connections).clone()
    }

    /// Connections handed out and not yet closed.
    pub fn open_count(&self) -> usize {
        lock(&self.state.connections)
            .iter()
            .filter(|c| !c.is_closed())
            .count()
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn connect(
        &self,
        target: &ConnectionTarget,
    ) -> Result<Arc<dyn DataConnection>, OrchestrallError> {
        let delay = *lock(&self.state.connect_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .state
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(OrchestrallError::ConnectionUnavailable {
                tenant: target_label(target),
                message: "injected connect failure".to_string(),
            });
        }

        let connection = Arc::new(MockConnection {
            id: self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            target: target.clone(),
            factory: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
            statements: Mutex::new(Vec::new()),
        });
        lock(&self.state.connections).push(Arc::clone(&connection));
        tracing::debug!(id = connection.id, target = %target_label(target), "mock connection opened");
        Ok(connection)
    }
}

fn target_label(target: &ConnectionTarget) -> String {
    match target {
        ConnectionTarget::Shared => "shared".to_string(),
        ConnectionTarget::Dedicated(tenant) => tenant.to_string(),
    }
}

/// A connection produced by [`MockConnectionFactory`].
pub struct MockConnection {
    id: u64,
    target: ConnectionTarget,
    factory: Arc<FactoryState>,
    closed: AtomicBool,
    statements: Mutex<Vec<(String, Vec<String>)>>,
}

impl MockConnection {
    /// Unique, increasing connection number (starts at 1).
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Statements executed on this connection with their parameters.
    pub fn executed(&self) -> Vec<(String, Vec<String>)> {
        lock(&self.statements).clone()
    }

    fn record(&self, sql: &str, params: Vec<String>) -> Result<(), OrchestrallError> {
        if self.is_closed() {
            return Err(OrchestrallError::ConnectionUnavailable {
                tenant: target_label(&self.target),
                message: "connection closed".to_string(),
            });
        }
        lock(&self.statements).push((sql.to_string(), params));
        Ok(())
    }
}

#[async_trait]
impl DataConnection for MockConnection {
    fn backend(&self) -> &str {
        "mock"
    }

    async fn ping(&self) -> Result<(), OrchestrallError> {
        let unhealthy = lock(&self.factory.unhealthy).contains(&self.target);
        if unhealthy || self.is_closed() {
            return Err(OrchestrallError::ConnectionUnavailable {
                tenant: target_label(&self.target),
                message: "ping failed".to_string(),
            });
        }
        Ok(())
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), OrchestrallError> {
        self.record(sql, Vec::new())
    }

    async fn execute(&self, sql: &str, params: Vec<String>) -> Result<usize, OrchestrallError> {
        self.record(sql, params)?;
        Ok(1)
    }

    async fn query_i64(
        &self,
        sql: &str,
        params: Vec<String>,
    ) -> Result<Option<i64>, OrchestrallError> {
        self.record(sql, params)?;
        Ok(Some(1))
    }

    async fn close(&self) -> Result<(), OrchestrallError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrall_core::TenantId;

    #[tokio::test]
    async fn connections_are_tracked_and_closable() {
        let factory = MockConnectionFactory::new();
        let target = ConnectionTarget::Dedicated(TenantId::parse("acme").unwrap());
        let conn = factory.connect(&target).await.unwrap();
        conn.execute("INSERT INTO t VALUES (?1)", vec!["x".into()]).await.unwrap();

        assert_eq!(factory.connect_count(), 1);
        assert_eq!(factory.connected_targets(), vec![target.clone()]);
        assert_eq!(factory.connections()[0].executed().len(), 1);

        conn.close().await.unwrap();
        assert_eq!(factory.open_count(), 0);
        assert!(conn.ping().await.is_err());
    }

    #[tokio::test]
    async fn injected_failures_and_liveness() {
        let factory = MockConnectionFactory::new();
        factory.fail_next_connects(1);
        assert!(factory.connect(&ConnectionTarget::Shared).await.is_err());

        let conn = factory.connect(&ConnectionTarget::Shared).await.unwrap();
        assert!(conn.ping().await.is_ok());
        factory.set_unhealthy(&ConnectionTarget::Shared, true);
        assert!(conn.ping().await.is_err());
        factory.set_unhealthy(&ConnectionTarget::Shared, false);
        assert!(conn.ping().await.is_ok());
    }
}
