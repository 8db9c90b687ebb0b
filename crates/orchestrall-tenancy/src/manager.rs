// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The tenant connection manager.
//!
//! Resolves a tenant ID to its one cached [`TenantConnectionHandle`],
//! establishing it lazily through the configured [`IsolationStrategy`]. The
//! handle cache is the single owner of live connections.
//!
//! Locking: the cache state sits behind a std mutex that is never held across
//! an `.await`. Establishment is serialized per tenant by an async lock, so
//! concurrent resolves of one tenant connect once while different tenants
//! connect concurrently. Every teardown bumps the tenant's generation; a
//! resolve that observes a newer generation after connecting discards its
//! handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use orchestrall_config::model::TenancyConfig;
use orchestrall_core::{
    ConnectionFactory, HealthCheckResult, HealthState, HealthSubject, IsolationMode,
    OrchestrallError, TenantId,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::handle::TenantConnectionHandle;
use crate::strategy::{self, IsolationStrategy};

/// Pool and probe tunables.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub max_dedicated_pools: usize,
    /// Bound for establishing a connection and for each liveness probe.
    pub connect_timeout: Duration,
    /// Idle handles older than this are released by [`ConnectionManager::reap_idle`].
    pub idle_timeout: Duration,
    /// Interval of the per-connection probe task; `None` disables it.
    pub health_interval: Option<Duration>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&TenancyConfig::default())
    }
}

impl From<&TenancyConfig> for ConnectionSettings {
    fn from(config: &TenancyConfig) -> Self {
        Self {
            max_dedicated_pools: config.max_dedicated_pools.max(1),
            connect_timeout: config.connect_timeout(),
            idle_timeout: config.idle_timeout(),
            health_interval: config.connection_health_interval(),
        }
    }
}

struct CachedHandle {
    handle: Arc<TenantConnectionHandle>,
    monitor: CancellationToken,
}

impl CachedHandle {
    /// Nobody outside the cache holds the handle.
    fn is_idle(&self) -> bool {
        Arc::strong_count(&self.handle) == 1
    }
}

#[derive(Default)]
struct CacheState {
    handles: HashMap<TenantId, CachedHandle>,
    generations: HashMap<TenantId, u64>,
    last_health: HashMap<TenantId, HealthCheckResult>,
    /// Slots reserved by establishments in flight.
    reserved: usize,
}

impl CacheState {
    fn generation(&self, tenant: &TenantId) -> u64 {
        self.generations.get(tenant).copied().unwrap_or(0)
    }

    fn bump_generation(&mut self, tenant: &TenantId) {
        *self.generations.entry(tenant.clone()).or_insert(0) += 1;
    }

    /// Least recently used handle that nobody is borrowing.
    fn lru_idle(&self) -> Option<TenantId> {
        self.handles
            .iter()
            .filter(|(_, cached)| cached.is_idle())
            .min_by_key(|(_, cached)| cached.handle.use_rank())
            .map(|(tenant, _)| tenant.clone())
    }
}

struct Inner {
    strategy: Box<dyn IsolationStrategy>,
    factory: Arc<dyn ConnectionFactory>,
    settings: ConnectionSettings,
    state: Mutex<CacheState>,
    establish_locks: Mutex<HashMap<TenantId, Arc<tokio::sync::Mutex<()>>>>,
    shutdown: CancellationToken,
}

/// A reserved cache slot, returned when dropped.
struct Reservation<'a> {
    inner: &'a Inner,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.lock_state();
        state.reserved = state.reserved.saturating_sub(1);
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn establish_lock(&self, tenant: &TenantId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .establish_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(tenant.clone()).or_default())
    }

    /// Forget the per-tenant bookkeeping of a tenant with no cached handle.
    ///
    /// Skipped while a resolve holds or awaits the establish lock: that
    /// resolve compares generations and must still see the bump.
    fn prune(&self, tenant: &TenantId) {
        let mut locks = self
            .establish_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if locks.get(tenant).is_some_and(|lock| Arc::strong_count(lock) > 1) {
            return;
        }
        let mut state = self.lock_state();
        if state.handles.contains_key(tenant) {
            return;
        }
        locks.remove(tenant);
        state.generations.remove(tenant);
    }

    /// The cached handle of `tenant`, checked against the key.
    fn cached(&self, tenant: &TenantId) -> Result<Option<Arc<TenantConnectionHandle>>, OrchestrallError> {
        let state = self.lock_state();
        let Some(cached) = state.handles.get(tenant) else {
            return Ok(None);
        };
        check_binding(tenant, &cached.handle)?;
        if !cached.handle.is_valid() {
            return Ok(None);
        }
        Ok(Some(Arc::clone(&cached.handle)))
    }

    /// Reserve a slot for a new handle, evicting the least recently used idle
    /// handle if the pool is full.
    fn reserve(&self, tenant: &TenantId) -> Result<(Reservation<'_>, Option<CachedHandle>), OrchestrallError> {
        let mut state = self.lock_state();
        let mut evicted = None;
        if let Some(capacity) = self.strategy.capacity() {
            if state.handles.len() + state.reserved >= capacity {
                let Some(victim) = state.lru_idle() else {
                    return Err(OrchestrallError::ConnectionUnavailable {
                        tenant: tenant.to_string(),
                        message: format!("pool exhausted: all {capacity} connections are in use"),
                    });
                };
                state.bump_generation(&victim);
                evicted = state.handles.remove(&victim);
                info!(tenant = %victim, for_tenant = %tenant, "evicted least recently used connection");
            }
        }
        state.reserved += 1;
        Ok((Reservation { inner: self }, evicted))
    }

    async fn release(&self, cached: CachedHandle, healthy: bool) {
        cached.monitor.cancel();
        cached.handle.invalidate();
        let reset = self.strategy.release(&cached.handle, healthy).await;
        debug!(tenant = %cached.handle.tenant(), handle = %cached.handle.id(), "connection released");
        if reset {
            self.evict_sharing(&cached.handle);
        }
    }

    /// Evict every cached handle on the same connection as `released`.
    fn evict_sharing(&self, released: &TenantConnectionHandle) {
        let stale: Vec<CachedHandle> = {
            let mut state = self.lock_state();
            let tenants: Vec<TenantId> = state
                .handles
                .iter()
                .filter(|(_, cached)| {
                    Arc::ptr_eq(cached.handle.raw_connection(), released.raw_connection())
                })
                .map(|(tenant, _)| tenant.clone())
                .collect();
            tenants
                .into_iter()
                .filter_map(|tenant| {
                    state.bump_generation(&tenant);
                    state.handles.remove(&tenant)
                })
                .collect()
        };
        if stale.is_empty() {
            return;
        }
        for cached in &stale {
            cached.monitor.cancel();
            cached.handle.invalidate();
        }
        info!(
            count = stale.len(),
            failed_tenant = %released.tenant(),
            "evicted handles on the reset shared connection"
        );
    }

    fn record_health(&self, result: &HealthCheckResult) {
        if let HealthSubject::Connection { tenant } = &result.subject {
            self.lock_state()
                .last_health
                .insert(tenant.clone(), result.clone());
        }
    }
}

fn check_binding(requested: &TenantId, handle: &TenantConnectionHandle) -> Result<(), OrchestrallError> {
    if handle.tenant() == requested {
        return Ok(());
    }
    error!(
        requested = %requested,
        actual = %handle.tenant(),
        handle = %handle.id(),
        "tenant isolation violation, aborting request"
    );
    Err(OrchestrallError::IsolationViolation {
        requested: requested.to_string(),
        actual: handle.tenant().to_string(),
    })
}

/// Resolves tenants to connection handles in one isolation mode.
///
/// Cheap to clone; clones share the same cache.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager for `mode`, selecting its isolation strategy.
    pub fn initialize(
        mode: IsolationMode,
        settings: ConnectionSettings,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        let strategy = strategy::for_mode(mode, settings.max_dedicated_pools);
        Self::with_strategy(strategy, settings, factory)
    }

    /// Create a manager around an explicit strategy.
    pub fn with_strategy(
        strategy: Box<dyn IsolationStrategy>,
        settings: ConnectionSettings,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        info!(mode = %strategy.mode(), capacity = ?strategy.capacity(), "connection manager initialized");
        Self {
            inner: Arc::new(Inner {
                strategy,
                factory,
                settings,
                state: Mutex::new(CacheState::default()),
                establish_locks: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn mode(&self) -> IsolationMode {
        self.inner.strategy.mode()
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.inner.settings
    }

    /// Return the tenant's handle, establishing it on first use.
    ///
    /// Never falls back to another tenant's or a default connection.
    pub async fn resolve(
        &self,
        tenant: &TenantId,
    ) -> Result<Arc<TenantConnectionHandle>, OrchestrallError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(unavailable(tenant, "connection manager is shut down"));
        }
        if let Some(handle) = self.inner.cached(tenant)? {
            handle.touch();
            return Ok(handle);
        }

        let lock = self.inner.establish_lock(tenant);
        let _guard = lock.lock().await;

        // Another resolve may have finished while this one waited.
        if let Some(handle) = self.inner.cached(tenant)? {
            handle.touch();
            return Ok(handle);
        }

        let generation = self.inner.lock_state().generation(tenant);
        let (reservation, evicted) = self.inner.reserve(tenant)?;
        if let Some(evicted) = evicted {
            self.inner.release(evicted, true).await;
        }

        let timeout = self.inner.settings.connect_timeout;
        let established = tokio::time::timeout(
            timeout,
            self.inner.strategy.establish(tenant, self.inner.factory.as_ref()),
        )
        .await;
        let handle = match established {
            Ok(Ok(handle)) => Arc::new(handle),
            Ok(Err(e)) => {
                warn!(tenant = %tenant, error = %e, "connection establishment failed");
                return Err(e);
            }
            Err(_) => {
                warn!(tenant = %tenant, timeout_ms = timeout.as_millis() as u64, "connection establishment timed out");
                return Err(unavailable(
                    tenant,
                    &format!("connect timed out after {timeout:?}"),
                ));
            }
        };

        let monitor = self.inner.shutdown.child_token();
        let rejected = {
            let mut state = self.inner.lock_state();
            if state.generation(tenant) != generation {
                debug!(tenant = %tenant, "tenant torn down during resolve, discarding connection");
                Some(unavailable(tenant, "tenant was torn down while connecting"))
            } else if let Err(violation) = check_binding(tenant, &handle) {
                Some(violation)
            } else {
                state.handles.insert(
                    tenant.clone(),
                    CachedHandle {
                        handle: Arc::clone(&handle),
                        monitor: monitor.clone(),
                    },
                );
                None
            }
        };
        drop(reservation);

        if let Some(e) = rejected {
            self.inner
                .release(CachedHandle { handle, monitor }, true)
                .await;
            return Err(e);
        }

        info!(
            tenant = %tenant,
            mode = %handle.mode(),
            handle = %handle.id(),
            "tenant connection established"
        );
        if let Some(interval) = self.inner.settings.health_interval {
            self.spawn_monitor(tenant.clone(), interval, monitor);
        }
        Ok(handle)
    }

    /// Probe the tenant's live connection.
    ///
    /// A failed or timed-out probe marks the handle unhealthy and evicts it,
    /// so the next [`resolve`](Self::resolve) re-establishes.
    pub async fn health_check(&self, tenant: &TenantId) -> HealthCheckResult {
        let subject = HealthSubject::Connection {
            tenant: tenant.clone(),
        };
        let handle = match self.inner.cached(tenant) {
            Ok(Some(handle)) => handle,
            Ok(None) => return HealthCheckResult::unhealthy(subject, "no live connection"),
            Err(e) => return HealthCheckResult::unhealthy(subject, e.to_string()),
        };

        let timeout = self.inner.settings.connect_timeout;
        let probe = async {
            let connection = handle.connection()?;
            connection.ping().await
        };
        let result = match tokio::time::timeout(timeout, probe).await {
            Ok(Ok(())) => HealthCheckResult::healthy(subject),
            Ok(Err(e)) => HealthCheckResult::unhealthy(subject, e.to_string()),
            Err(_) => HealthCheckResult::unhealthy(
                subject,
                format!("liveness probe timed out after {timeout:?}"),
            ),
        };

        handle.set_health(result.status);
        self.inner.record_health(&result);
        if result.status == HealthState::Unhealthy {
            warn!(
                tenant = %tenant,
                handle = %handle.id(),
                message = result.message.as_deref().unwrap_or_default(),
                "tenant connection unhealthy, evicting"
            );
            let evicted = {
                let mut state = self.inner.lock_state();
                let same = state
                    .handles
                    .get(tenant)
                    .is_some_and(|cached| Arc::ptr_eq(&cached.handle, &handle));
                if same {
                    state.bump_generation(tenant);
                    state.handles.remove(tenant)
                } else {
                    None
                }
            };
            if let Some(evicted) = evicted {
                self.inner.release(evicted, false).await;
            }
        }
        result
    }

    /// Release the tenant's handle. Returns whether one was cached.
    ///
    /// A resolve that is establishing concurrently discards its connection.
    pub async fn teardown(&self, tenant: &TenantId) -> bool {
        let removed = {
            let mut state = self.inner.lock_state();
            state.bump_generation(tenant);
            state.last_health.remove(tenant);
            state.handles.remove(tenant)
        };
        let released = match removed {
            Some(cached) => {
                self.inner.release(cached, true).await;
                info!(tenant = %tenant, "tenant connection torn down");
                true
            }
            None => false,
        };
        self.inner.prune(tenant);
        released
    }

    /// Release idle handles unused for longer than the idle timeout.
    pub async fn reap_idle(&self) -> Vec<TenantId> {
        let idle_timeout = chrono::Duration::from_std(self.inner.settings.idle_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let cutoff = Utc::now() - idle_timeout;

        let reaped: Vec<(TenantId, CachedHandle)> = {
            let mut state = self.inner.lock_state();
            let expired: Vec<TenantId> = state
                .handles
                .iter()
                .filter(|(_, cached)| cached.is_idle() && cached.handle.last_used() <= cutoff)
                .map(|(tenant, _)| tenant.clone())
                .collect();
            expired
                .into_iter()
                .filter_map(|tenant| {
                    state.bump_generation(&tenant);
                    state.handles.remove(&tenant).map(|cached| (tenant, cached))
                })
                .collect()
        };

        let mut tenants = Vec::with_capacity(reaped.len());
        for (tenant, cached) in reaped {
            self.inner.release(cached, true).await;
            self.inner.prune(&tenant);
            debug!(tenant = %tenant, "idle connection reaped");
            tenants.push(tenant);
        }
        tenants.sort();
        tenants
    }

    /// Run [`reap_idle`](Self::reap_idle) periodically until `cancel` fires.
    pub fn spawn_maintenance(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        let period = (self.inner.settings.idle_timeout / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("connection maintenance stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let reaped = manager.reap_idle().await;
                        if !reaped.is_empty() {
                            info!(count = reaped.len(), "released idle tenant connections");
                        }
                    }
                }
            }
        })
    }

    fn spawn_monitor(&self, tenant: TenantId, interval: Duration, token: CancellationToken) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        let manager = ConnectionManager { inner };
                        let result = manager.health_check(&tenant).await;
                        if !result.is_healthy() {
                            break;
                        }
                    }
                }
            }
            debug!(tenant = %tenant, "connection monitor stopped");
        });
    }

    /// Tenants with a cached handle, sorted.
    pub fn live_tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<TenantId> = self.inner.lock_state().handles.keys().cloned().collect();
        tenants.sort();
        tenants
    }

    pub fn handle_count(&self) -> usize {
        self.inner.lock_state().handles.len()
    }

    /// The most recent connection probe result of a tenant.
    pub fn last_health(&self, tenant: &TenantId) -> Option<HealthCheckResult> {
        self.inner.lock_state().last_health.get(tenant).cloned()
    }

    /// Release every handle and refuse further resolves.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let drained: Vec<CachedHandle> = {
            let mut state = self.inner.lock_state();
            let tenants: Vec<TenantId> = state.handles.keys().cloned().collect();
            for tenant in &tenants {
                state.bump_generation(tenant);
            }
            state.handles.drain().map(|(_, cached)| cached).collect()
        };
        let count = drained.len();
        for cached in drained {
            let tenant = cached.handle.tenant().clone();
            self.inner.release(cached, true).await;
            self.inner.prune(&tenant);
        }
        self.inner.strategy.close().await;
        info!(released = count, "connection manager shut down");
    }
}

fn unavailable(tenant: &TenantId, message: &str) -> OrchestrallError {
    OrchestrallError::ConnectionUnavailable {
        tenant: tenant.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrall_test_utils::MockConnectionFactory;

    fn tenant(id: &str) -> TenantId {
        TenantId::parse(id).unwrap()
    }

    fn settings(max: usize) -> ConnectionSettings {
        ConnectionSettings {
            max_dedicated_pools: max,
            connect_timeout: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(60),
            health_interval: None,
        }
    }

    #[test]
    fn settings_follow_tenancy_config() {
        let config = TenancyConfig {
            max_dedicated_pools: 0,
            connection_health_interval_secs: 0,
            ..TenancyConfig::default()
        };
        let settings = ConnectionSettings::from(&config);
        assert_eq!(settings.max_dedicated_pools, 1);
        assert!(settings.health_interval.is_none());
    }

    #[tokio::test]
    async fn resolve_caches_per_tenant() {
        let factory = MockConnectionFactory::new();
        let manager = ConnectionManager::initialize(
            IsolationMode::DedicatedDatabase,
            settings(4),
            Arc::new(factory.clone()),
        );
        let acme = tenant("acme");

        let first = manager.resolve(&acme).await.unwrap();
        let second = manager.resolve(&acme).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.connect_count(), 1);
        assert_eq!(manager.live_tenants(), vec![acme]);
    }

    #[tokio::test]
    async fn failed_connect_caches_nothing() {
        let factory = MockConnectionFactory::new();
        factory.fail_next_connects(1);
        let manager = ConnectionManager::initialize(
            IsolationMode::DedicatedDatabase,
            settings(1),
            Arc::new(factory.clone()),
        );
        let acme = tenant("acme");

        assert!(manager.resolve(&acme).await.is_err());
        assert_eq!(manager.handle_count(), 0);
        // The reserved slot was returned.
        assert!(manager.resolve(&acme).await.is_ok());
    }

    fn bookkeeping(manager: &ConnectionManager) -> (usize, usize) {
        let locks = manager
            .inner
            .establish_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        (locks, manager.inner.lock_state().generations.len())
    }

    #[tokio::test]
    async fn teardown_and_reap_forget_tenant_bookkeeping() {
        let factory = MockConnectionFactory::new();
        let manager = ConnectionManager::initialize(
            IsolationMode::DedicatedDatabase,
            ConnectionSettings {
                idle_timeout: Duration::ZERO,
                ..settings(8)
            },
            Arc::new(factory.clone()),
        );
        for id in ["acme", "globex", "initech"] {
            drop(manager.resolve(&tenant(id)).await.unwrap());
        }
        assert_eq!(bookkeeping(&manager).0, 3);

        assert!(manager.teardown(&tenant("acme")).await);
        assert!(!manager.teardown(&tenant("never-seen")).await);
        assert_eq!(bookkeeping(&manager), (2, 0));

        let reaped = manager.reap_idle().await;
        assert_eq!(reaped, vec![tenant("globex"), tenant("initech")]);
        assert_eq!(bookkeeping(&manager), (0, 0));
    }

    #[tokio::test]
    async fn shutdown_refuses_new_resolves() {
        let factory = MockConnectionFactory::new();
        let manager = ConnectionManager::initialize(
            IsolationMode::SharedSchema,
            settings(1),
            Arc::new(factory.clone()),
        );
        let handle = manager.resolve(&tenant("acme")).await.unwrap();

        manager.shutdown().await;

        assert!(!handle.is_valid());
        assert_eq!(factory.open_count(), 0);
        assert!(manager.resolve(&tenant("acme")).await.is_err());
    }
}
