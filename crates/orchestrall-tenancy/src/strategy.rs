// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Isolation strategies.
//!
//! The connection manager is mode-agnostic: everything that differs between
//! shared-schema and dedicated-database isolation lives behind
//! [`IsolationStrategy`], selected once at initialization.

use std::sync::Arc;

use async_trait::async_trait;
use orchestrall_core::{
    ConnectionFactory, ConnectionTarget, DataConnection, IsolationMode, OrchestrallError, TenantId,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::handle::{TenantConnectionHandle, TenantDiscriminator};

/// How tenant handles are established and released.
#[async_trait]
pub trait IsolationStrategy: Send + Sync + 'static {
    fn mode(&self) -> IsolationMode;

    /// Maximum number of cached handles, or `None` when unbounded.
    fn capacity(&self) -> Option<usize>;

    /// Establish a new handle for `tenant`.
    async fn establish(
        &self,
        tenant: &TenantId,
        factory: &dyn ConnectionFactory,
    ) -> Result<TenantConnectionHandle, OrchestrallError>;

    /// Release the resources behind a handle that left the cache.
    ///
    /// `healthy` is false when the handle was evicted by a failed probe.
    /// Returns true when a connection other handles may still reference was
    /// closed; the caller must evict those handles too.
    async fn release(&self, handle: &TenantConnectionHandle, healthy: bool) -> bool;

    /// Close anything the strategy holds beyond individual handles.
    async fn close(&self) {}
}

/// Build the strategy for `mode`.
pub fn for_mode(mode: IsolationMode, max_dedicated_pools: usize) -> Box<dyn IsolationStrategy> {
    match mode {
        IsolationMode::SharedSchema => Box::new(SharedSchemaStrategy::new()),
        IsolationMode::DedicatedDatabase => {
            Box::new(DedicatedDatabaseStrategy::new(max_dedicated_pools))
        }
    }
}

/// All tenants share one database; handles carry a discriminator.
///
/// The shared connection is opened on first use and reopened after a failed
/// probe.
#[derive(Default)]
pub struct SharedSchemaStrategy {
    shared: Mutex<Option<Arc<dyn DataConnection>>>,
}

impl SharedSchemaStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    async fn shared_connection(
        &self,
        factory: &dyn ConnectionFactory,
    ) -> Result<Arc<dyn DataConnection>, OrchestrallError> {
        let mut shared = self.shared.lock().await;
        if let Some(connection) = shared.as_ref() {
            return Ok(Arc::clone(connection));
        }
        let connection = factory.connect(&ConnectionTarget::Shared).await?;
        info!(backend = connection.backend(), "shared tenant database connected");
        *shared = Some(Arc::clone(&connection));
        Ok(connection)
    }
}

#[async_trait]
impl IsolationStrategy for SharedSchemaStrategy {
    fn mode(&self) -> IsolationMode {
        IsolationMode::SharedSchema
    }

    fn capacity(&self) -> Option<usize> {
        None
    }

    async fn establish(
        &self,
        tenant: &TenantId,
        factory: &dyn ConnectionFactory,
    ) -> Result<TenantConnectionHandle, OrchestrallError> {
        let connection = self.shared_connection(factory).await?;
        Ok(TenantConnectionHandle::shared(
            TenantDiscriminator::new(tenant.clone()),
            connection,
        ))
    }

    async fn release(&self, handle: &TenantConnectionHandle, healthy: bool) -> bool {
        if healthy {
            return false;
        }
        let mut shared = self.shared.lock().await;
        let same = shared
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, handle.raw_connection()));
        if same {
            warn!(tenant = %handle.tenant(), "shared connection failed its probe, reconnecting on next use");
            if let Some(connection) = shared.take() {
                if let Err(e) = connection.close().await {
                    debug!(error = %e, "closing failed shared connection");
                }
            }
        }
        same
    }

    async fn close(&self) {
        if let Some(connection) = self.shared.lock().await.take() {
            if let Err(e) = connection.close().await {
                warn!(error = %e, "shared connection close failed");
            }
        }
    }
}

/// Every tenant gets its own database connection, up to `max_pools` at once.
pub struct DedicatedDatabaseStrategy {
    max_pools: usize,
}

impl DedicatedDatabaseStrategy {
    pub fn new(max_pools: usize) -> Self {
        Self {
            max_pools: max_pools.max(1),
        }
    }
}

#[async_trait]
impl IsolationStrategy for DedicatedDatabaseStrategy {
    fn mode(&self) -> IsolationMode {
        IsolationMode::DedicatedDatabase
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.max_pools)
    }

    async fn establish(
        &self,
        tenant: &TenantId,
        factory: &dyn ConnectionFactory,
    ) -> Result<TenantConnectionHandle, OrchestrallError> {
        let connection = factory
            .connect(&ConnectionTarget::Dedicated(tenant.clone()))
            .await?;
        Ok(TenantConnectionHandle::dedicated(tenant.clone(), connection))
    }

    async fn release(&self, handle: &TenantConnectionHandle, _healthy: bool) -> bool {
        if let Err(e) = handle.close_connection().await {
            warn!(tenant = %handle.tenant(), error = %e, "dedicated connection close failed");
        }
        false
    }
}
