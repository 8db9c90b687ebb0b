// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The plugin lifecycle engine.
//!
//! Owns every tenant's plugin installations and drives their transitions:
//! enable, disable, health evaluation, and bulk activation from a tenant's
//! client configuration.
//!
//! Transitions of one (tenant, plugin) pair are serialized by a per-pair async
//! lock. Dependency checks and state commits run under the tenant's state lock,
//! which is never held across an `.await`, so a disable can never interleave
//! with the dependency check of an enable.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use orchestrall_config::model::HealthConfig;
use orchestrall_core::{
    HealthCheckResult, HealthState, HealthSubject, LifecycleState, OrchestrallError,
    PluginContext, TenantId,
};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::client_config::ClientConfig;
use crate::events::{EventBus, LifecycleEvent};
use crate::installation::PluginInstallation;
use crate::manifest::{Dependency, PluginManifest};
use crate::probe::HealthProber;
use crate::registry::PluginRegistry;

/// Tunables for health evaluation.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub health_timeout: Duration,
    /// Consecutive unhealthy results that move an installation to `Failed`.
    pub failure_threshold: u32,
    /// Probe interval for manifests that declare no health check.
    pub default_health_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&HealthConfig::default())
    }
}

impl From<&HealthConfig> for EngineSettings {
    fn from(config: &HealthConfig) -> Self {
        Self {
            health_timeout: config.timeout(),
            failure_threshold: config.failure_threshold.max(1),
            default_health_interval: config.default_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableOutcome {
    Enabled,
    /// The installation was already `Enabled` or `Degraded`; nothing changed.
    AlreadyEnabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableOutcome {
    Disabled,
    AlreadyDisabled,
}

/// Result of enabling one plugin during bulk activation.
#[derive(Debug)]
pub struct ActivationOutcome {
    pub plugin: String,
    pub priority: u32,
    pub result: Result<EnableOutcome, OrchestrallError>,
}

/// Per-plugin outcomes of [`PluginEngine::activate_tenant`], in processing order.
#[derive(Debug)]
pub struct ActivationReport {
    pub tenant: TenantId,
    pub outcomes: Vec<ActivationOutcome>,
}

impl ActivationReport {
    /// Plugins that are enabled after activation, in processing order.
    pub fn enabled(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_ok())
            .map(|o| o.plugin.as_str())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &OrchestrallError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.plugin.as_str(), e)))
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

/// Installation state of one tenant.
#[derive(Default)]
struct TenantPlugins {
    installations: RwLock<HashMap<String, PluginInstallation>>,
    transition_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TenantPlugins {
    fn read<R>(&self, f: impl FnOnce(&HashMap<String, PluginInstallation>) -> R) -> R {
        let guard = self
            .installations
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<R>(&self, f: impl FnOnce(&mut HashMap<String, PluginInstallation>) -> R) -> R {
        let mut guard = self
            .installations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    fn transition_lock(&self, plugin: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .transition_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(plugin.to_string()).or_default())
    }

    /// Drop the transition lock of `plugin` unless another transition holds
    /// or awaits it. `held` is the caller's own reference.
    fn prune_transition_lock(&self, plugin: &str, held: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .transition_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let unshared = locks
            .get(plugin)
            .is_some_and(|lock| Arc::ptr_eq(lock, held) && Arc::strong_count(lock) == 2);
        if unshared {
            locks.remove(plugin);
        }
    }
}

/// Orchestrates plugin lifecycle transitions for every tenant.
pub struct PluginEngine {
    registry: Arc<PluginRegistry>,
    settings: EngineSettings,
    prober: HealthProber,
    tenants: DashMap<TenantId, Arc<TenantPlugins>>,
    events: EventBus,
}

impl PluginEngine {
    pub fn new(registry: Arc<PluginRegistry>, settings: EngineSettings) -> Self {
        let prober = HealthProber::new(settings.health_timeout);
        Self {
            registry,
            settings,
            prober,
            tenants: DashMap::new(),
            events: EventBus::new(),
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    fn tenant_state(&self, tenant: &TenantId) -> Arc<TenantPlugins> {
        Arc::clone(self.tenants.entry(tenant.clone()).or_default().value())
    }

    fn existing_tenant(&self, tenant: &TenantId, plugin: &str) -> Result<Arc<TenantPlugins>, OrchestrallError> {
        self.tenants
            .get(tenant)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| not_installed(tenant, plugin))
    }

    /// Enable `plugin` for `tenant` with the given raw configuration block.
    ///
    /// Fails with `ConfigInvalid` (installation unchanged), `DependencyUnmet`
    /// or `PluginHook` (installation left `Validated`). Dependencies are never
    /// enabled implicitly.
    pub async fn enable(
        &self,
        tenant: &TenantId,
        plugin: &str,
        raw_config: &Value,
    ) -> Result<EnableOutcome, OrchestrallError> {
        let manifest = self.registry.get(plugin)?;
        let state = self.tenant_state(tenant);
        let lock = state.transition_lock(plugin);
        let _guard = lock.lock().await;

        let current = state.write(|map| {
            map.entry(plugin.to_string())
                .or_insert_with(|| {
                    PluginInstallation::discovered(tenant.clone(), plugin, manifest.version.clone())
                })
                .state
        });
        if current.is_active() {
            debug!(tenant = %tenant, plugin, state = %current, "plugin already enabled");
            return Ok(EnableOutcome::AlreadyEnabled);
        }
        if current == LifecycleState::Failed {
            return Err(OrchestrallError::InvalidTransition {
                plugin: plugin.to_string(),
                from: current,
                to: LifecycleState::Enabled,
            });
        }

        let config = manifest
            .config_schema
            .resolve(raw_config)
            .map_err(|e| OrchestrallError::ConfigInvalid {
                plugin: plugin.to_string(),
                field: e.field,
                reason: e.reason,
            })?;

        let implementation = self.registry.implementation(plugin);
        let ctx = PluginContext {
            tenant,
            plugin,
            config: &config,
        };
        if let Some(implementation) = &implementation {
            implementation
                .validate(&ctx)
                .await
                .map_err(|e| config_rejection(plugin, e))?;
        }

        state.write(|map| {
            let installation = installation_mut(map, tenant, plugin)?;
            installation.transition(LifecycleState::Validated)?;
            installation.version = manifest.version.clone();
            installation.dependencies = manifest.dependency_ids().map(str::to_string).collect();
            installation.config = config.clone();
            Ok::<_, OrchestrallError>(())
        })?;
        debug!(tenant = %tenant, plugin, "plugin configuration validated");

        state.read(|map| check_dependencies(&manifest, map))?;

        if let Some(implementation) = &implementation {
            implementation
                .enable(&ctx)
                .await
                .map_err(|e| OrchestrallError::PluginHook {
                    plugin: plugin.to_string(),
                    hook: "enable",
                    message: e.to_string(),
                })?;
        }

        let committed = state.write(|map| {
            check_dependencies(&manifest, map)?;
            let installation = installation_mut(map, tenant, plugin)?;
            installation.transition(LifecycleState::Enabled)?;
            installation.consecutive_failures = 0;
            installation.last_health = None;
            installation.epoch += 1;
            Ok::<_, OrchestrallError>(())
        });

        if let Err(e) = committed {
            // A dependency went away while the enable hook ran.
            if let Some(implementation) = &implementation {
                if let Err(teardown) = implementation.disable(&ctx).await {
                    warn!(tenant = %tenant, plugin, error = %teardown, "teardown after aborted enable failed");
                }
            }
            return Err(e);
        }

        info!(tenant = %tenant, plugin, version = %manifest.version, "plugin enabled");
        self.events.publish(LifecycleEvent::PluginEnabled {
            tenant: tenant.clone(),
            plugin: plugin.to_string(),
            version: manifest.version.to_string(),
            at: Utc::now(),
        });
        Ok(EnableOutcome::Enabled)
    }

    /// Disable `plugin` for `tenant`.
    ///
    /// Fails with `DependentsActive` while other enabled plugins of the tenant
    /// depend on it. The teardown hook runs after the state is committed; its
    /// failure is logged and does not re-enable the plugin.
    pub async fn disable(
        &self,
        tenant: &TenantId,
        plugin: &str,
    ) -> Result<DisableOutcome, OrchestrallError> {
        let state = self.existing_tenant(tenant, plugin)?;
        let lock = state.transition_lock(plugin);
        let _guard = lock.lock().await;

        let config = state.write(|map| {
            let current = map
                .get(plugin)
                .map(|i| i.state)
                .ok_or_else(|| not_installed(tenant, plugin))?;
            if current == LifecycleState::Disabled {
                return Ok(None);
            }
            if !current.is_active() {
                return Err(OrchestrallError::InvalidTransition {
                    plugin: plugin.to_string(),
                    from: current,
                    to: LifecycleState::Disabled,
                });
            }

            let dependents = active_dependents(map, plugin);
            if !dependents.is_empty() {
                return Err(OrchestrallError::DependentsActive {
                    plugin: plugin.to_string(),
                    dependents,
                });
            }

            let installation = installation_mut(map, tenant, plugin)?;
            installation.transition(LifecycleState::Disabled)?;
            Ok(Some(installation.config.clone()))
        })?;

        let Some(config) = config else {
            debug!(tenant = %tenant, plugin, "plugin already disabled");
            return Ok(DisableOutcome::AlreadyDisabled);
        };

        if let Some(implementation) = self.registry.implementation(plugin) {
            let ctx = PluginContext {
                tenant,
                plugin,
                config: &config,
            };
            if let Err(e) = implementation.disable(&ctx).await {
                warn!(tenant = %tenant, plugin, error = %e, "plugin teardown hook failed");
            }
        }

        info!(tenant = %tenant, plugin, "plugin disabled");
        self.events.publish(LifecycleEvent::PluginDisabled {
            tenant: tenant.clone(),
            plugin: plugin.to_string(),
            at: Utc::now(),
        });
        Ok(DisableOutcome::Disabled)
    }

    /// Probe an installation and apply the result to its lifecycle state.
    ///
    /// Installations that are not enabled are not probed; their last result
    /// (or a synthesized unhealthy one) is returned.
    pub async fn health_check(
        &self,
        tenant: &TenantId,
        plugin: &str,
    ) -> Result<HealthCheckResult, OrchestrallError> {
        let state = self.existing_tenant(tenant, plugin)?;
        let (current, epoch, config, last) = state
            .read(|map| {
                map.get(plugin).map(|i| {
                    (i.state, i.epoch, i.config.clone(), i.last_health.clone())
                })
            })
            .ok_or_else(|| not_installed(tenant, plugin))?;

        let subject = HealthSubject::Plugin {
            tenant: tenant.clone(),
            plugin: plugin.to_string(),
        };
        if !current.is_active() {
            return Ok(last.unwrap_or_else(|| {
                HealthCheckResult::unhealthy(subject, format!("plugin is {current}"))
            }));
        }

        let manifest = self.registry.get(plugin)?;
        let implementation = self.registry.implementation(plugin);
        let ctx = PluginContext {
            tenant,
            plugin,
            config: &config,
        };
        let result = self
            .prober
            .probe(subject, &manifest, implementation.as_deref(), &ctx)
            .await;

        let threshold = self.settings.failure_threshold;
        let event = state.write(|map| {
            let installation = map.get_mut(plugin)?;
            // Skip results that raced with a disable or re-enable.
            if installation.epoch != epoch || !installation.is_active() {
                return None;
            }
            apply_health(installation, &result, threshold)
        });

        if let Some(event) = event {
            self.events.publish(event);
        }
        Ok(result)
    }

    /// The probe interval for a plugin: the manifest's, or the default.
    pub fn health_interval(&self, plugin: &str) -> Duration {
        self.registry
            .get(plugin)
            .ok()
            .and_then(|m| m.health_check.as_ref().map(|hc| hc.interval))
            .unwrap_or(self.settings.default_health_interval)
    }

    /// Enabled and degraded installations of a tenant, sorted by plugin ID.
    pub fn list_enabled(&self, tenant: &TenantId) -> Vec<PluginInstallation> {
        let mut enabled: Vec<PluginInstallation> = self
            .list_installations(tenant)
            .into_iter()
            .filter(PluginInstallation::is_active)
            .collect();
        enabled.sort_by(|a, b| a.plugin.cmp(&b.plugin));
        enabled
    }

    /// All installations of a tenant, sorted by plugin ID.
    pub fn list_installations(&self, tenant: &TenantId) -> Vec<PluginInstallation> {
        let Some(state) = self.tenants.get(tenant).map(|e| Arc::clone(e.value())) else {
            return Vec::new();
        };
        let mut all: Vec<PluginInstallation> = state.read(|map| map.values().cloned().collect());
        all.sort_by(|a, b| a.plugin.cmp(&b.plugin));
        all
    }

    pub fn installation(&self, tenant: &TenantId, plugin: &str) -> Option<PluginInstallation> {
        let state = self.tenants.get(tenant).map(|e| Arc::clone(e.value()))?;
        state.read(|map| map.get(plugin).cloned())
    }

    /// Tenants with at least one installation record, sorted.
    pub fn tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<TenantId> = self.tenants.iter().map(|e| e.key().clone()).collect();
        tenants.sort();
        tenants
    }

    /// Remove an installation that is not enabled.
    pub async fn uninstall(
        &self,
        tenant: &TenantId,
        plugin: &str,
    ) -> Result<PluginInstallation, OrchestrallError> {
        let state = self.existing_tenant(tenant, plugin)?;
        let lock = state.transition_lock(plugin);
        let _guard = lock.lock().await;

        let removed = state.write(|map| {
            let current = map
                .get(plugin)
                .map(|i| i.state)
                .ok_or_else(|| not_installed(tenant, plugin))?;
            if current.is_active() {
                return Err(OrchestrallError::InvalidTransition {
                    plugin: plugin.to_string(),
                    from: current,
                    to: LifecycleState::Discovered,
                });
            }
            map.remove(plugin).ok_or_else(|| not_installed(tenant, plugin))
        })?;

        state.prune_transition_lock(plugin, &lock);
        info!(tenant = %tenant, plugin, state = %removed.state, "plugin uninstalled");
        Ok(removed)
    }

    /// Enable every plugin a tenant references, in ascending priority.
    ///
    /// Continues past failures; a plugin whose dependency failed to enable
    /// reports `DependencyUnmet` itself.
    pub async fn activate_tenant(&self, config: &ClientConfig) -> ActivationReport {
        let tenant = &config.tenant;
        let mut outcomes = Vec::with_capacity(config.plugins.len());

        for reference in config.activation_order() {
            let result = self.enable(tenant, &reference.id, &reference.config).await;
            if let Err(e) = &result {
                warn!(tenant = %tenant, plugin = %reference.id, error = %e, "plugin activation failed");
            }
            outcomes.push(ActivationOutcome {
                plugin: reference.id.clone(),
                priority: reference.priority,
                result,
            });
        }

        let report = ActivationReport {
            tenant: tenant.clone(),
            outcomes,
        };
        info!(
            tenant = %tenant,
            enabled = report.enabled().count(),
            failed = report.failures().count(),
            "tenant activation finished"
        );
        report
    }

    /// Disable every enabled plugin of a tenant, most recently enabled first.
    ///
    /// Plugins blocked by dependents are retried after their dependents are
    /// disabled. Returns the errors of plugins that could not be disabled.
    pub async fn deactivate_tenant(&self, tenant: &TenantId) -> Vec<(String, OrchestrallError)> {
        loop {
            let mut active = self.list_enabled(tenant);
            if active.is_empty() {
                info!(tenant = %tenant, "tenant deactivated");
                return Vec::new();
            }
            active.sort_by_key(|i| Reverse(i.enabled_at));

            let mut progressed = false;
            let mut errors = Vec::new();
            for installation in active {
                match self.disable(tenant, &installation.plugin).await {
                    Ok(_) => progressed = true,
                    Err(e) => errors.push((installation.plugin, e)),
                }
            }

            if !progressed {
                for (plugin, e) in &errors {
                    error!(tenant = %tenant, plugin = %plugin, error = %e, "plugin could not be deactivated");
                }
                return errors;
            }
        }
    }
}

fn not_installed(tenant: &TenantId, plugin: &str) -> OrchestrallError {
    OrchestrallError::NotInstalled {
        tenant: tenant.to_string(),
        plugin: plugin.to_string(),
    }
}

fn installation_mut<'a>(
    map: &'a mut HashMap<String, PluginInstallation>,
    tenant: &TenantId,
    plugin: &str,
) -> Result<&'a mut PluginInstallation, OrchestrallError> {
    map.get_mut(plugin).ok_or_else(|| not_installed(tenant, plugin))
}

/// Plugin-specific validation failures are reported as config errors.
fn config_rejection(plugin: &str, err: OrchestrallError) -> OrchestrallError {
    match err {
        OrchestrallError::ConfigInvalid { .. } => err,
        other => OrchestrallError::ConfigInvalid {
            plugin: plugin.to_string(),
            field: "config".to_string(),
            reason: other.to_string(),
        },
    }
}

/// Check that every direct and transitive dependency of `manifest` is active
/// for the tenant and satisfies its version requirement.
fn check_dependencies(
    manifest: &PluginManifest,
    installations: &HashMap<String, PluginInstallation>,
) -> Result<(), OrchestrallError> {
    let mut visited = HashSet::new();
    let mut pending: VecDeque<Dependency> = manifest.dependencies.iter().cloned().collect();

    while let Some(dependency) = pending.pop_front() {
        if dependency.id == manifest.id || !visited.insert(dependency.id.clone()) {
            continue;
        }
        let unmet = |reason: String| OrchestrallError::DependencyUnmet {
            plugin: manifest.id.clone(),
            dependency: dependency.id.clone(),
            reason,
        };

        let Some(installation) = installations.get(&dependency.id) else {
            return Err(unmet("not enabled for this tenant".to_string()));
        };
        if !installation.is_active() {
            return Err(unmet(format!("is {}", installation.state)));
        }
        if !dependency.is_satisfied_by(&installation.version) {
            let requirement = dependency
                .version_req
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            return Err(unmet(format!(
                "version {} does not satisfy {requirement}",
                installation.version
            )));
        }

        pending.extend(installation.dependencies.iter().map(|id| Dependency {
            id: id.clone(),
            version_req: None,
        }));
    }
    Ok(())
}

/// Active installations that list `plugin` as a dependency, sorted.
fn active_dependents(installations: &HashMap<String, PluginInstallation>, plugin: &str) -> Vec<String> {
    let mut dependents: Vec<String> = installations
        .values()
        .filter(|i| i.is_active() && i.dependencies.iter().any(|d| d == plugin))
        .map(|i| i.plugin.clone())
        .collect();
    dependents.sort();
    dependents
}

/// Fold one health result into an active installation.
fn apply_health(
    installation: &mut PluginInstallation,
    result: &HealthCheckResult,
    failure_threshold: u32,
) -> Option<LifecycleEvent> {
    installation.last_health = Some(result.clone());
    let tenant = installation.tenant.clone();
    let plugin = installation.plugin.clone();

    match result.status {
        HealthState::Healthy => {
            installation.consecutive_failures = 0;
            if installation.state == LifecycleState::Degraded {
                installation.transition(LifecycleState::Enabled).ok()?;
                info!(tenant = %tenant, plugin = %plugin, "plugin recovered");
                return Some(LifecycleEvent::PluginRecovered {
                    tenant,
                    plugin,
                    at: Utc::now(),
                });
            }
            None
        }
        HealthState::Degraded => {
            installation.consecutive_failures = 0;
            degrade(installation, result)
        }
        HealthState::Unhealthy => {
            installation.consecutive_failures += 1;
            let failures = installation.consecutive_failures;
            if failures >= failure_threshold {
                installation.transition(LifecycleState::Failed).ok()?;
                let reason = format!(
                    "{failures} consecutive unhealthy checks: {}",
                    result.message.as_deref().unwrap_or("no detail")
                );
                error!(tenant = %tenant, plugin = %plugin, %reason, "plugin failed");
                return Some(LifecycleEvent::PluginFailed {
                    tenant,
                    plugin,
                    reason,
                    at: Utc::now(),
                });
            }
            degrade(installation, result)
        }
    }
}

fn degrade(installation: &mut PluginInstallation, result: &HealthCheckResult) -> Option<LifecycleEvent> {
    if installation.state != LifecycleState::Enabled {
        return None;
    }
    installation.transition(LifecycleState::Degraded).ok()?;
    warn!(
        tenant = %installation.tenant,
        plugin = %installation.plugin,
        message = result.message.as_deref().unwrap_or_default(),
        "plugin degraded"
    );
    Some(LifecycleEvent::PluginDegraded {
        tenant: installation.tenant.clone(),
        plugin: installation.plugin.clone(),
        message: result.message.clone(),
        at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrall_core::HealthStatus;
    use orchestrall_test_utils::MockPlugin;
    use serde_json::json;

    use crate::catalog::ManifestSource;
    use crate::format::DocumentFormat;

    fn acme() -> TenantId {
        TenantId::parse("acme").unwrap()
    }

    fn source(content: &str) -> ManifestSource {
        ManifestSource::new("inline", DocumentFormat::Toml, content)
    }

    fn engine_with(manifests: &[&str], plugins: Vec<Arc<MockPlugin>>) -> PluginEngine {
        let registry = Arc::new(PluginRegistry::new());
        let report = registry.scan_sources(manifests.iter().map(|m| source(m)).collect());
        assert!(report.is_clean(), "{:?}", report.failures);
        for plugin in plugins {
            registry.register_implementation(plugin);
        }
        PluginEngine::new(registry, EngineSettings::default())
    }

    const LEDGER: &str = "id = \"ledger\"\nversion = \"1.4.0\"\ncategory = \"finance\"\n";
    const BILLING: &str = r#"
id = "billing"
version = "1.0.0"
category = "finance"

[requires]
dependencies = [{ id = "ledger", version = "^2" }]
"#;
    const CRM: &str = r#"
id = "crm"
version = "2.0.0"
category = "sales"

[config.region]
type = "enum"
values = ["eu", "us"]
required = true
"#;

    #[tokio::test]
    async fn config_rejection_leaves_installation_discovered() {
        let engine = engine_with(&[CRM], vec![]);
        let err = engine
            .enable(&acme(), "crm", &json!({ "region": "apac" }))
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            OrchestrallError::ConfigInvalid { field, .. } if field == "region"
        ));
        assert_eq!(
            engine.installation(&acme(), "crm").unwrap().state,
            LifecycleState::Discovered
        );
    }

    #[tokio::test]
    async fn implementation_validate_hook_can_reject_config() {
        let plugin = MockPlugin::new("crm").rejecting_config("region", "not licensed").into_arc();
        let engine = engine_with(&[CRM], vec![plugin]);
        let err = engine
            .enable(&acme(), "crm", &json!({ "region": "eu" }))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestrallError::ConfigInvalid { ref field, ref reason, .. }
                if field == "region" && reason == "not licensed"
        ));
    }

    #[tokio::test]
    async fn version_requirement_is_enforced() {
        let engine = engine_with(&[LEDGER, BILLING], vec![]);
        engine.enable(&acme(), "ledger", &Value::Null).await.unwrap();
        let err = engine.enable(&acme(), "billing", &Value::Null).await.unwrap_err();
        assert!(matches!(
            &err,
            OrchestrallError::DependencyUnmet { dependency, reason, .. }
                if dependency == "ledger" && reason.contains("^2")
        ));
    }

    #[tokio::test]
    async fn enable_hook_failure_leaves_validated() {
        let plugin = MockPlugin::new("ledger").failing_enable("vault sealed").into_arc();
        let engine = engine_with(&[LEDGER], vec![Arc::clone(&plugin)]);
        let err = engine.enable(&acme(), "ledger", &Value::Null).await.unwrap_err();
        assert!(matches!(err, OrchestrallError::PluginHook { hook: "enable", .. }));
        assert_eq!(
            engine.installation(&acme(), "ledger").unwrap().state,
            LifecycleState::Validated
        );
        assert_eq!(plugin.enable_calls(), 1);
    }

    #[tokio::test]
    async fn disable_runs_teardown_and_re_enable_works() {
        let plugin = MockPlugin::new("ledger").into_arc();
        let engine = engine_with(&[LEDGER], vec![Arc::clone(&plugin)]);
        let tenant = acme();

        engine.enable(&tenant, "ledger", &Value::Null).await.unwrap();
        assert_eq!(
            engine.disable(&tenant, "ledger").await.unwrap(),
            DisableOutcome::Disabled
        );
        assert_eq!(plugin.disable_calls(), 1);
        assert_eq!(
            engine.disable(&tenant, "ledger").await.unwrap(),
            DisableOutcome::AlreadyDisabled
        );
        assert_eq!(plugin.disable_calls(), 1);

        assert_eq!(
            engine.enable(&tenant, "ledger", &Value::Null).await.unwrap(),
            EnableOutcome::Enabled
        );
        assert_eq!(plugin.enable_calls(), 2);
    }

    #[tokio::test]
    async fn disable_of_unknown_installation_is_not_installed() {
        let engine = engine_with(&[LEDGER], vec![]);
        let err = engine.disable(&acme(), "ledger").await.unwrap_err();
        assert!(matches!(err, OrchestrallError::NotInstalled { .. }));
    }

    #[tokio::test]
    async fn validated_installation_cannot_be_disabled() {
        let plugin = MockPlugin::new("ledger").failing_enable("nope").into_arc();
        let engine = engine_with(&[LEDGER], vec![plugin]);
        let _ = engine.enable(&acme(), "ledger", &Value::Null).await;
        let err = engine.disable(&acme(), "ledger").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestrallError::InvalidTransition {
                from: LifecycleState::Validated,
                to: LifecycleState::Disabled,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn degraded_result_recovers_on_success() {
        let plugin = MockPlugin::new("ledger")
            .with_health_sequence(vec![
                HealthStatus::Unhealthy("blip".into()),
                HealthStatus::Healthy,
            ])
            .into_arc();
        let engine = engine_with(&[LEDGER], vec![plugin]);
        let tenant = acme();
        let mut events = engine.subscribe();
        engine.enable(&tenant, "ledger", &Value::Null).await.unwrap();

        let first = engine.health_check(&tenant, "ledger").await.unwrap();
        assert_eq!(first.status, HealthState::Unhealthy);
        assert_eq!(
            engine.installation(&tenant, "ledger").unwrap().state,
            LifecycleState::Degraded
        );

        engine.health_check(&tenant, "ledger").await.unwrap();
        let installation = engine.installation(&tenant, "ledger").unwrap();
        assert_eq!(installation.state, LifecycleState::Enabled);
        assert_eq!(installation.consecutive_failures, 0);

        let names: Vec<&str> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| e.name())
            .collect();
        assert_eq!(names, vec!["PluginEnabled", "PluginDegraded", "PluginRecovered"]);
    }

    #[tokio::test]
    async fn health_check_of_inactive_installation_does_not_probe() {
        let plugin = MockPlugin::new("ledger").into_arc();
        let engine = engine_with(&[LEDGER], vec![Arc::clone(&plugin)]);
        let tenant = acme();
        engine.enable(&tenant, "ledger", &Value::Null).await.unwrap();
        engine.disable(&tenant, "ledger").await.unwrap();

        let result = engine.health_check(&tenant, "ledger").await.unwrap();
        assert_eq!(result.status, HealthState::Unhealthy);
        assert!(result.message.unwrap().contains("disabled"));
        assert_eq!(plugin.health_calls(), 0);
    }

    #[tokio::test]
    async fn uninstall_requires_inactive_installation() {
        let engine = engine_with(&[LEDGER], vec![]);
        let tenant = acme();
        engine.enable(&tenant, "ledger", &Value::Null).await.unwrap();
        assert!(engine.uninstall(&tenant, "ledger").await.is_err());

        engine.disable(&tenant, "ledger").await.unwrap();
        let removed = engine.uninstall(&tenant, "ledger").await.unwrap();
        assert_eq!(removed.state, LifecycleState::Disabled);
        assert!(engine.installation(&tenant, "ledger").is_none());

        let locks = engine
            .existing_tenant(&tenant, "ledger")
            .unwrap()
            .transition_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        assert_eq!(locks, 0, "uninstall forgets the transition lock");
    }

    #[tokio::test]
    async fn installations_are_tenant_scoped() {
        let engine = engine_with(&[LEDGER], vec![]);
        let acme = acme();
        let globex = TenantId::parse("globex").unwrap();
        engine.enable(&acme, "ledger", &Value::Null).await.unwrap();

        assert_eq!(engine.list_enabled(&acme).len(), 1);
        assert!(engine.list_enabled(&globex).is_empty());
        assert!(engine.installation(&globex, "ledger").is_none());
        assert_eq!(engine.tenants(), vec![acme]);
    }

    #[test]
    fn settings_follow_health_config() {
        let config = HealthConfig {
            default_interval_secs: 12,
            timeout_secs: 2,
            failure_threshold: 4,
        };
        let settings = EngineSettings::from(&config);
        assert_eq!(settings.failure_threshold, 4);
        assert_eq!(settings.health_timeout, Duration::from_secs(2));
        assert_eq!(settings.default_health_interval, Duration::from_secs(12));
    }
}
