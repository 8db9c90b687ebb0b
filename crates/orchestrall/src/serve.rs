// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `orchestrall serve` command implementation.
//!
//! Scans the plugin sources into the registry, loads every tenant's client
//! configuration and activates its plugins in priority order, then runs the
//! health scheduler and connection maintenance until SIGINT/SIGTERM.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use orchestrall_config::model::OrchestrallConfig;
use orchestrall_core::{OrchestrallError, TenantId};
use orchestrall_plugin::{ClientConfigLoader, EngineSettings, HealthScheduler, PluginEngine, PluginRegistry};
use orchestrall_tenancy::{ConnectionManager, ConnectionSettings, SqliteConnectionFactory};
use tracing::{debug, info, warn};

use crate::shutdown;

/// The wired-up platform: registry, engine and connection manager.
pub struct Platform {
    pub registry: Arc<PluginRegistry>,
    pub engine: Arc<PluginEngine>,
    pub connections: ConnectionManager,
    /// Tenants whose client configuration loaded, in load order.
    pub tenants: Vec<TenantId>,
}

impl Platform {
    /// Scan plugins, build the engine and connection manager, and activate
    /// every tenant found in the tenant config directory.
    ///
    /// A plugin or tenant that fails to load is logged and skipped; only an
    /// unreadable tenant directory is fatal.
    pub async fn build(config: &OrchestrallConfig) -> Result<Self, OrchestrallError> {
        let registry = Arc::new(PluginRegistry::new());
        let report = registry.scan(&config.plugins.sources).await;
        for failure in &report.failures {
            warn!(origin = %failure.origin, reason = %failure.kind, "plugin manifest skipped");
        }
        info!(
            loaded = report.success_count(),
            failed = report.failure_count(),
            generation = report.generation,
            "plugin registry scanned"
        );

        let engine = Arc::new(PluginEngine::new(
            Arc::clone(&registry),
            EngineSettings::from(&config.health),
        ));
        let connections = ConnectionManager::initialize(
            config.tenancy.isolation_mode,
            ConnectionSettings::from(&config.tenancy),
            Arc::new(SqliteConnectionFactory::from_config(&config.tenancy)),
        );

        let tenants = activate_tenants(&engine, Path::new(&config.tenants.config_dir)).await?;

        Ok(Self {
            registry,
            engine,
            connections,
            tenants,
        })
    }

    /// Disable every tenant's plugins and close all connections.
    pub async fn shutdown(&self) {
        for tenant in self.engine.tenants() {
            for (plugin, e) in self.engine.deactivate_tenant(&tenant).await {
                warn!(tenant = %tenant, plugin = %plugin, error = %e, "plugin did not disable cleanly");
            }
        }
        self.connections.shutdown().await;
    }
}

async fn activate_tenants(
    engine: &PluginEngine,
    dir: &Path,
) -> Result<Vec<TenantId>, OrchestrallError> {
    let loaded = match ClientConfigLoader::load_dir(dir).await {
        Ok(loaded) => loaded,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(dir = %dir.display(), "tenant config directory not found, no tenants activated");
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(OrchestrallError::Config(format!(
                "cannot read tenant config directory {}: {e}",
                dir.display()
            )));
        }
    };
    for (path, e) in &loaded.failures {
        warn!(path = %path.display(), error = %e, "tenant skipped");
    }

    let mut tenants = Vec::with_capacity(loaded.configs.len());
    for client in &loaded.configs {
        let report = engine.activate_tenant(client).await;
        let enabled = report.enabled().count();
        for (plugin, e) in report.failures() {
            warn!(tenant = %client.tenant, plugin = %plugin, error = %e, "plugin not activated");
        }
        info!(tenant = %client.tenant, enabled, requested = client.plugins.len(), "tenant activated");
        tenants.push(client.tenant.clone());
    }
    Ok(tenants)
}

/// Runs the `orchestrall serve` command.
pub async fn run_serve(config: OrchestrallConfig) -> Result<(), OrchestrallError> {
    init_tracing(&config.server.log_level);
    info!(mode = %config.tenancy.isolation_mode, "starting orchestrall serve");

    let platform = Platform::build(&config).await?;

    let cancel = shutdown::install_signal_handler();
    let scheduler = HealthScheduler::new(Arc::clone(&platform.engine), cancel.child_token());
    let scheduler_task = scheduler.start();
    let maintenance_task = platform.connections.spawn_maintenance(cancel.child_token());
    info!(
        plugins = platform.registry.list().len(),
        tenants = platform.tenants.len(),
        "orchestrall ready"
    );

    cancel.cancelled().await;

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    let stopped = tokio::time::timeout(grace, async {
        let _ = scheduler_task.await;
        let _ = maintenance_task.await;
        platform.shutdown().await;
    })
    .await;
    if stopped.is_err() {
        warn!(grace_secs = config.server.shutdown_grace_secs, "shutdown grace period elapsed");
    }

    debug!(scheduled = scheduler.scheduled_count(), "health scheduler stopped");
    info!("orchestrall serve shutdown complete");
    Ok(())
}

/// Initialize the tracing subscriber with the configured log level.
///
/// `RUST_LOG` takes precedence when set.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("orchestrall={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrall_core::{IsolationMode, LifecycleState};
    use orchestrall_tenancy::TenantContextRouter;

    const NOTIFICATIONS: &str = r#"
id = "notifications"
version = "1.0.0"
category = "messaging"
"#;

    const PAYMENTS: &str = r#"
id = "payments-gateway"
version = "1.2.0"
category = "payments"

[requires]
dependencies = ["notifications"]
"#;

    fn config_for(dir: &Path, mode: IsolationMode) -> OrchestrallConfig {
        let mut config = OrchestrallConfig::default();
        config.plugins.sources = vec![dir.join("plugins").display().to_string()];
        config.tenants.config_dir = dir.join("tenants").display().to_string();
        config.tenancy.isolation_mode = mode;
        config.tenancy.shared_database = ":memory:".to_string();
        config.tenancy.database_dir = dir.join("data").display().to_string();
        config
    }

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn build_activates_tenants_from_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("plugins/notifications.toml"), NOTIFICATIONS);
        write(&dir.path().join("plugins/payments.toml"), PAYMENTS);
        write(
            &dir.path().join("tenants/acme.toml"),
            r#"
[client]
id = "acme"

[[plugins]]
id = "notifications"
priority = 1

[[plugins]]
id = "payments-gateway"
priority = 2
"#,
        );
        write(&dir.path().join("tenants/globex.toml"), "[client]\nid = \"initech\"\n");

        let platform = Platform::build(&config_for(dir.path(), IsolationMode::DedicatedDatabase))
            .await
            .unwrap();

        assert_eq!(platform.registry.list().len(), 2);
        assert_eq!(platform.tenants, vec![TenantId::parse("acme").unwrap()]);
        let router = TenantContextRouter::new(Arc::clone(&platform.engine), platform.connections.clone());
        let ctx = router.context("acme").await.unwrap();
        assert!(ctx.has_plugin("notifications"));
        assert!(ctx.has_plugin("payments-gateway"));
        assert!(dir.path().join("data/acme.db").exists());
        drop(ctx);

        platform.shutdown().await;
        let acme = TenantId::parse("acme").unwrap();
        let state = platform
            .engine
            .installation(&acme, "payments-gateway")
            .map(|i| i.state);
        assert_eq!(state, Some(LifecycleState::Disabled));
        assert_eq!(platform.connections.handle_count(), 0);
    }

    #[tokio::test]
    async fn missing_tenant_dir_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("plugins/notifications.toml"), NOTIFICATIONS);

        let platform = Platform::build(&config_for(dir.path(), IsolationMode::SharedSchema))
            .await
            .unwrap();

        assert!(platform.tenants.is_empty());
        assert_eq!(platform.registry.list().len(), 1);
        platform.shutdown().await;
    }
}
