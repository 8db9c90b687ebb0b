// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The capability contract every plugin implementation fulfils.

use async_trait::async_trait;

use crate::config::ResolvedConfig;
use crate::error::OrchestrallError;
use crate::types::{HealthStatus, TenantId};

/// Per-call context handed to plugin hooks.
///
/// Always scoped to a single tenant; hooks never see another tenant's values.
#[derive(Debug, Clone, Copy)]
pub struct PluginContext<'a> {
    pub tenant: &'a TenantId,
    pub plugin: &'a str,
    pub config: &'a ResolvedConfig,
}

/// Static capability contract implemented by compiled-in plugins.
///
/// Implementations are registered explicitly with the plugin registry at
/// startup; nothing is loaded from the filesystem at runtime. A manifest
/// without a registered implementation behaves as if every hook succeeded.
#[async_trait]
pub trait PluginCapability: Send + Sync + 'static {
    /// Plugin ID this implementation serves. Must match the manifest `id`.
    fn id(&self) -> &str;

    /// Plugin-specific validation beyond the manifest schema.
    ///
    /// Return [`OrchestrallError::ConfigInvalid`] to name an offending field.
    async fn validate(&self, _ctx: &PluginContext<'_>) -> Result<(), OrchestrallError> {
        Ok(())
    }

    /// Acquire any per-tenant resources. Called before the installation is
    /// committed as enabled.
    async fn enable(&self, ctx: &PluginContext<'_>) -> Result<(), OrchestrallError>;

    /// Release per-tenant resources. Called after the installation is
    /// committed as disabled.
    async fn disable(&self, ctx: &PluginContext<'_>) -> Result<(), OrchestrallError>;

    /// Probe used by `internal` health-check descriptors.
    async fn health_check(&self, ctx: &PluginContext<'_>) -> Result<HealthStatus, OrchestrallError>;
}
