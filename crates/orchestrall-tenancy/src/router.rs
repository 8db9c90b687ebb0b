// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tenant context routing.
//!
//! [`TenantContextRouter`] is the surface the HTTP layer calls. It takes the
//! already-authenticated tenant identifier as a string, parses it as a token
//! before any lookup, and dispatches to the plugin engine and connection
//! manager.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use orchestrall_core::{
    HealthCheckResult, HealthState, LifecycleState, OrchestrallError, TenantId,
};
use orchestrall_plugin::{
    DisableOutcome, EnableOutcome, PluginEngine, PluginInstallation, PluginManifest,
};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::handle::TenantConnectionHandle;
use crate::manager::ConnectionManager;

/// One catalog entry as seen by a tenant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginListing {
    pub id: String,
    pub version: String,
    pub category: String,
    pub provides: Vec<String>,
    pub dependencies: Vec<String>,
    /// `None` when the tenant has no installation of the plugin.
    pub state: Option<LifecycleState>,
    pub health: Option<HealthState>,
    pub enabled_at: Option<DateTime<Utc>>,
}

/// Everything a request of one tenant needs.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant: TenantId,
    pub connection: Arc<TenantConnectionHandle>,
    /// Enabled and degraded installations, sorted by plugin ID.
    pub plugins: Vec<PluginInstallation>,
}

impl TenantContext {
    pub fn has_plugin(&self, plugin: &str) -> bool {
        self.plugins.iter().any(|i| i.plugin == plugin)
    }
}

/// Routes tenant-scoped requests to the engine and the connection manager.
#[derive(Clone)]
pub struct TenantContextRouter {
    engine: Arc<PluginEngine>,
    connections: ConnectionManager,
}

impl TenantContextRouter {
    pub fn new(engine: Arc<PluginEngine>, connections: ConnectionManager) -> Self {
        Self {
            engine,
            connections,
        }
    }

    pub fn engine(&self) -> &Arc<PluginEngine> {
        &self.engine
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// The tenant's connection handle and enabled plugin set.
    pub async fn context(&self, tenant: &str) -> Result<TenantContext, OrchestrallError> {
        let tenant = TenantId::parse(tenant)?;
        let connection = self.connections.resolve(&tenant).await?;
        let plugins = self.engine.list_enabled(&tenant);
        debug!(tenant = %tenant, plugins = plugins.len(), "tenant context resolved");
        Ok(TenantContext {
            tenant,
            connection,
            plugins,
        })
    }

    /// The catalog, independent of any tenant.
    pub fn list_catalog(&self) -> Vec<Arc<PluginManifest>> {
        self.engine.registry().list()
    }

    /// Every catalog plugin with the tenant's installation state.
    pub fn list_plugins(&self, tenant: &str) -> Result<Vec<PluginListing>, OrchestrallError> {
        let tenant = TenantId::parse(tenant)?;
        let listings = self
            .engine
            .registry()
            .list()
            .into_iter()
            .map(|manifest| {
                let installation = self.engine.installation(&tenant, &manifest.id);
                PluginListing {
                    id: manifest.id.clone(),
                    version: manifest.version.to_string(),
                    category: manifest.category.clone(),
                    provides: manifest.provides.iter().cloned().collect(),
                    dependencies: manifest.dependency_ids().map(str::to_string).collect(),
                    state: installation.as_ref().map(|i| i.state),
                    health: installation
                        .as_ref()
                        .and_then(|i| i.last_health.as_ref().map(|h| h.status)),
                    enabled_at: installation.and_then(|i| i.enabled_at),
                }
            })
            .collect();
        Ok(listings)
    }

    /// The latest health result of an installation, probing if there is none.
    pub async fn get_plugin_health(
        &self,
        tenant: &str,
        plugin: &str,
    ) -> Result<HealthCheckResult, OrchestrallError> {
        let tenant = TenantId::parse(tenant)?;
        let installation = self.engine.installation(&tenant, plugin).ok_or_else(|| {
            OrchestrallError::NotInstalled {
                tenant: tenant.to_string(),
                plugin: plugin.to_string(),
            }
        })?;
        match installation.last_health {
            Some(result) => Ok(result),
            None => self.engine.health_check(&tenant, plugin).await,
        }
    }

    pub async fn enable_plugin(
        &self,
        tenant: &str,
        plugin: &str,
        config: &Value,
    ) -> Result<EnableOutcome, OrchestrallError> {
        let tenant = TenantId::parse(tenant)?;
        self.engine.enable(&tenant, plugin, config).await
    }

    pub async fn disable_plugin(
        &self,
        tenant: &str,
        plugin: &str,
    ) -> Result<DisableOutcome, OrchestrallError> {
        let tenant = TenantId::parse(tenant)?;
        self.engine.disable(&tenant, plugin).await
    }

    pub async fn resolve_tenant_connection(
        &self,
        tenant: &str,
    ) -> Result<Arc<TenantConnectionHandle>, OrchestrallError> {
        let tenant = TenantId::parse(tenant)?;
        self.connections.resolve(&tenant).await
    }
}
