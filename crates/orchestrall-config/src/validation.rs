// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as positive timeouts and non-empty source lists.

use std::collections::HashSet;

use orchestrall_core::IsolationMode;

use crate::diagnostic::ConfigError;
use crate::model::OrchestrallConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &OrchestrallConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ConfigError::Validation { message });

    if !LOG_LEVELS.contains(&config.server.log_level.as_str()) {
        push(format!(
            "server.log_level `{}` must be one of: {}",
            config.server.log_level,
            LOG_LEVELS.join(", ")
        ));
    }

    if config.plugins.sources.is_empty() {
        push("plugins.sources must list at least one location".to_string());
    }

    let mut seen_sources = HashSet::new();
    for (i, source) in config.plugins.sources.iter().enumerate() {
        if source.trim().is_empty() {
            push(format!("plugins.sources[{i}] must not be empty"));
        } else if !seen_sources.insert(source.as_str()) {
            push(format!("duplicate plugin source `{source}` in plugins.sources"));
        }
    }

    if config.health.default_interval_secs == 0 {
        push("health.default_interval_secs must be positive".to_string());
    }

    if config.health.timeout_secs == 0 {
        push("health.timeout_secs must be positive".to_string());
    }

    if config.health.failure_threshold == 0 {
        push("health.failure_threshold must be at least 1".to_string());
    }

    if config.tenancy.max_dedicated_pools == 0 {
        push(format!(
            "tenancy.max_dedicated_pools must be at least 1, got {}",
            config.tenancy.max_dedicated_pools
        ));
    }

    if config.tenancy.connect_timeout_secs == 0 {
        push("tenancy.connect_timeout_secs must be positive".to_string());
    }

    if config.tenancy.idle_timeout_secs == 0 {
        push("tenancy.idle_timeout_secs must be positive".to_string());
    }

    match config.tenancy.isolation_mode {
        IsolationMode::SharedSchema if config.tenancy.shared_database.trim().is_empty() => {
            push("tenancy.shared_database must not be empty in shared-schema mode".to_string());
        }
        IsolationMode::DedicatedDatabase if config.tenancy.database_dir.trim().is_empty() => {
            push("tenancy.database_dir must not be empty in dedicated-database mode".to_string());
        }
        _ => {}
    }

    if config.tenants.config_dir.trim().is_empty() {
        push("tenants.config_dir must not be empty".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
