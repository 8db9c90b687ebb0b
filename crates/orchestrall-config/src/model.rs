// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Orchestrall process.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use orchestrall_core::IsolationMode;
use serde::{Deserialize, Serialize};

/// Top-level Orchestrall configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestrallConfig {
    /// Process-level settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Plugin discovery settings.
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Plugin health-check scheduling.
    #[serde(default)]
    pub health: HealthConfig,

    /// Tenant data isolation and connection pooling.
    #[serde(default)]
    pub tenancy: TenancyConfig,

    /// Tenant client configuration discovery.
    #[serde(default)]
    pub tenants: TenantsConfig,
}

/// Process-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Seconds to wait for background tasks to stop on shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

/// Plugin discovery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PluginsConfig {
    /// Manifest files or directories scanned at startup and on reload.
    #[serde(default = "default_plugin_sources")]
    pub sources: Vec<String>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            sources: default_plugin_sources(),
        }
    }
}

fn default_plugin_sources() -> Vec<String> {
    vec!["plugins".to_string()]
}

/// Plugin health-check scheduling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    /// Interval for plugins whose manifest does not declare one.
    #[serde(default = "default_health_interval_secs")]
    pub default_interval_secs: u64,

    /// Upper bound for a single probe. A probe that exceeds it counts as unhealthy.
    #[serde(default = "default_health_timeout_secs")]
    pub timeout_secs: u64,

    /// Consecutive unhealthy results before an installation is marked failed.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl HealthConfig {
    pub fn default_interval(&self) -> Duration {
        Duration::from_secs(self.default_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: default_health_interval_secs(),
            timeout_secs: default_health_timeout_secs(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

fn default_health_interval_secs() -> u64 {
    30
}

fn default_health_timeout_secs() -> u64 {
    5
}

fn default_failure_threshold() -> u32 {
    3
}

/// Tenant isolation and connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TenancyConfig {
    /// `shared-schema` or `dedicated-database`.
    #[serde(default = "default_isolation_mode")]
    pub isolation_mode: IsolationMode,

    /// Maximum concurrently open dedicated databases.
    #[serde(default = "default_max_dedicated_pools")]
    pub max_dedicated_pools: usize,

    /// Upper bound for establishing a connection.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Idle handles older than this are released by the maintenance task.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Interval of the per-connection liveness probe. 0 disables it.
    #[serde(default = "default_connection_health_interval_secs")]
    pub connection_health_interval_secs: u64,

    /// Directory holding dedicated tenant databases.
    #[serde(default = "default_database_dir")]
    pub database_dir: String,

    /// Shared-schema database path. `:memory:` keeps it in memory.
    #[serde(default = "default_shared_database")]
    pub shared_database: String,
}

impl TenancyConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn connection_health_interval(&self) -> Option<Duration> {
        (self.connection_health_interval_secs > 0)
            .then(|| Duration::from_secs(self.connection_health_interval_secs))
    }
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            isolation_mode: default_isolation_mode(),
            max_dedicated_pools: default_max_dedicated_pools(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            connection_health_interval_secs: default_connection_health_interval_secs(),
            database_dir: default_database_dir(),
            shared_database: default_shared_database(),
        }
    }
}

fn default_isolation_mode() -> IsolationMode {
    IsolationMode::SharedSchema
}

fn default_max_dedicated_pools() -> usize {
    16
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_connection_health_interval_secs() -> u64 {
    60
}

fn default_database_dir() -> String {
    dirs::data_dir()
        .map(|p| p.join("orchestrall").join("tenants"))
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| "tenants-data".to_string())
}

fn default_shared_database() -> String {
    dirs::data_dir()
        .map(|p| p.join("orchestrall").join("shared.db"))
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| "shared.db".to_string())
}

/// Tenant client configuration discovery.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TenantsConfig {
    /// Directory holding one client configuration file per tenant.
    #[serde(default = "default_tenant_config_dir")]
    pub config_dir: String,
}

impl Default for TenantsConfig {
    fn default() -> Self {
        Self {
            config_dir: default_tenant_config_dir(),
        }
    }
}

fn default_tenant_config_dir() -> String {
    "tenants".to_string()
}
