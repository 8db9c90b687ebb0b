// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tenant connection handles.
//!
//! A handle binds one tenant to one live connection. The connection is only
//! reachable by borrow through [`TenantConnectionHandle::connection`], which
//! fails once the manager has invalidated the handle.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeZone, Utc};
use orchestrall_core::{DataConnection, HealthState, IsolationMode, OrchestrallError, TenantId};
use uuid::Uuid;

/// Process-wide use counter; orders handles by recency without clock ties.
static USE_CLOCK: AtomicU64 = AtomicU64::new(0);

fn next_use() -> u64 {
    USE_CLOCK.fetch_add(1, Ordering::SeqCst)
}

/// Column that carries the owning tenant in the shared schema.
pub const DISCRIMINATOR_COLUMN: &str = "tenant_id";

/// The tenant filter every shared-schema statement is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantDiscriminator {
    tenant: TenantId,
}

impl TenantDiscriminator {
    pub fn new(tenant: TenantId) -> Self {
        Self { tenant }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn column(&self) -> &'static str {
        DISCRIMINATOR_COLUMN
    }

    /// Value bound to [`DISCRIMINATOR_COLUMN`].
    pub fn value(&self) -> &str {
        self.tenant.as_str()
    }
}

/// What a handle's connection is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleScope {
    /// Rows of the shared database filtered by the discriminator.
    Shared { discriminator: TenantDiscriminator },
    /// The tenant's own database.
    Dedicated,
}

/// A tenant's data-access handle.
pub struct TenantConnectionHandle {
    id: Uuid,
    tenant: TenantId,
    scope: HandleScope,
    connection: Arc<dyn DataConnection>,
    created_at: DateTime<Utc>,
    last_used_ms: AtomicI64,
    last_use: AtomicU64,
    health: Mutex<HealthState>,
    valid: AtomicBool,
}

impl TenantConnectionHandle {
    /// A shared-schema handle. The tenant is taken from the discriminator.
    pub fn shared(discriminator: TenantDiscriminator, connection: Arc<dyn DataConnection>) -> Self {
        let tenant = discriminator.tenant().clone();
        Self::build(tenant, HandleScope::Shared { discriminator }, connection)
    }

    /// A handle over a tenant's dedicated database.
    pub fn dedicated(tenant: TenantId, connection: Arc<dyn DataConnection>) -> Self {
        Self::build(tenant, HandleScope::Dedicated, connection)
    }

    fn build(tenant: TenantId, scope: HandleScope, connection: Arc<dyn DataConnection>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant,
            scope,
            connection,
            created_at: now,
            last_used_ms: AtomicI64::new(now.timestamp_millis()),
            last_use: AtomicU64::new(next_use()),
            health: Mutex::new(HealthState::Healthy),
            valid: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn scope(&self) -> &HandleScope {
        &self.scope
    }

    pub fn mode(&self) -> IsolationMode {
        match self.scope {
            HandleScope::Shared { .. } => IsolationMode::SharedSchema,
            HandleScope::Dedicated => IsolationMode::DedicatedDatabase,
        }
    }

    pub fn discriminator(&self) -> Option<&TenantDiscriminator> {
        match &self.scope {
            HandleScope::Shared { discriminator } => Some(discriminator),
            HandleScope::Dedicated => None,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_used(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_used_ms.load(Ordering::SeqCst))
            .single()
            .unwrap_or(self.created_at)
    }

    pub fn health(&self) -> HealthState {
        *self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// Borrow the underlying connection.
    ///
    /// Fails with `ConnectionUnavailable` once the handle was released.
    pub fn connection(&self) -> Result<&dyn DataConnection, OrchestrallError> {
        if !self.is_valid() {
            return Err(OrchestrallError::ConnectionUnavailable {
                tenant: self.tenant.to_string(),
                message: "handle was released".to_string(),
            });
        }
        Ok(self.connection.as_ref())
    }

    /// Execute a statement scoped to this handle's tenant.
    ///
    /// The tenant ID is bound as `?1` in both isolation modes; `params` follow
    /// from `?2`.
    pub async fn execute(&self, sql: &str, params: Vec<String>) -> Result<usize, OrchestrallError> {
        let connection = self.connection()?;
        connection.execute(sql, self.scoped(params)).await
    }

    /// Run a single-value query scoped to this handle's tenant (`?1`).
    pub async fn query_i64(
        &self,
        sql: &str,
        params: Vec<String>,
    ) -> Result<Option<i64>, OrchestrallError> {
        let connection = self.connection()?;
        connection.query_i64(sql, self.scoped(params)).await
    }

    fn scoped(&self, params: Vec<String>) -> Vec<String> {
        let mut bound = Vec::with_capacity(params.len() + 1);
        bound.push(self.tenant.to_string());
        bound.extend(params);
        bound
    }

    pub(crate) fn touch(&self) {
        self.last_used_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
        self.last_use.store(next_use(), Ordering::SeqCst);
    }

    /// Recency rank; larger was used more recently.
    pub(crate) fn use_rank(&self) -> u64 {
        self.last_use.load(Ordering::SeqCst)
    }

    pub(crate) fn set_health(&self, state: HealthState) {
        *self.health.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub(crate) fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    /// Close the underlying connection, valid or not. Strategies call this
    /// when a handle leaves the cache.
    pub async fn close_connection(&self) -> Result<(), OrchestrallError> {
        self.connection.close().await
    }

    /// The raw connection, for identity checks on release.
    pub(crate) fn raw_connection(&self) -> &Arc<dyn DataConnection> {
        &self.connection
    }
}

impl std::fmt::Debug for TenantConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantConnectionHandle")
            .field("id", &self.id)
            .field("tenant", &self.tenant)
            .field("scope", &self.scope)
            .field("backend", &self.connection.backend())
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrall_core::{ConnectionFactory, ConnectionTarget};
    use orchestrall_test_utils::MockConnectionFactory;

    fn tenant(id: &str) -> TenantId {
        TenantId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn shared_handle_binds_tenant_as_first_parameter() {
        let factory = MockConnectionFactory::new();
        let conn = factory.connect(&ConnectionTarget::Shared).await.unwrap();
        let handle = TenantConnectionHandle::shared(TenantDiscriminator::new(tenant("acme")), conn);

        assert_eq!(handle.mode(), IsolationMode::SharedSchema);
        assert_eq!(handle.discriminator().map(|d| d.value()), Some("acme"));
        handle
            .execute("DELETE FROM orders WHERE tenant_id = ?1 AND id = ?2", vec!["7".into()])
            .await
            .unwrap();

        let executed = factory.connections()[0].executed();
        assert_eq!(executed[0].1, vec!["acme".to_string(), "7".to_string()]);
    }

    #[tokio::test]
    async fn invalidated_handle_refuses_borrow() {
        let factory = MockConnectionFactory::new();
        let target = ConnectionTarget::Dedicated(tenant("globex"));
        let conn = factory.connect(&target).await.unwrap();
        let handle = TenantConnectionHandle::dedicated(tenant("globex"), conn);

        assert!(handle.connection().is_ok());
        assert!(handle.discriminator().is_none());
        handle.invalidate();
        assert!(matches!(
            handle.connection(),
            Err(OrchestrallError::ConnectionUnavailable { .. })
        ));
        assert!(handle.execute("SELECT 1", Vec::new()).await.is_err());
    }
}
