// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./orchestrall.toml` > `~/.config/orchestrall/orchestrall.toml`
//! > `/etc/orchestrall/orchestrall.toml` with environment variable overrides via
//! the `ORCHESTRALL_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::OrchestrallConfig;

/// Config sections that environment variables may target.
const ENV_SECTIONS: &[&str] = &["server", "plugins", "health", "tenancy", "tenants"];

pub(crate) const SYSTEM_CONFIG_PATH: &str = "/etc/orchestrall/orchestrall.toml";
pub(crate) const LOCAL_CONFIG_PATH: &str = "orchestrall.toml";

pub(crate) fn user_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("orchestrall/orchestrall.toml"))
        .unwrap_or_default()
}

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/orchestrall/orchestrall.toml` (system-wide)
/// 3. `~/.config/orchestrall/orchestrall.toml` (user XDG config)
/// 4. `./orchestrall.toml` (local directory)
/// 5. `ORCHESTRALL_*` environment variables
pub fn load_config() -> Result<OrchestrallConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<OrchestrallConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(OrchestrallConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<OrchestrallConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(OrchestrallConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading (exposed for diagnostic use).
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(OrchestrallConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(user_config_path()))
        .merge(Toml::file(LOCAL_CONFIG_PATH))
        .merge(env_provider())
}

/// Map a lowercased, prefix-stripped env key to its dotted config path.
///
/// Only the first underscore after a known section name becomes a dot, so
/// `tenancy_max_dedicated_pools` maps to `tenancy.max_dedicated_pools`.
pub fn map_env_key(key: &str) -> String {
    let key = key.to_ascii_lowercase();
    for section in ENV_SECTIONS {
        if let Some(rest) = key.strip_prefix(section).and_then(|r| r.strip_prefix('_')) {
            return format!("{section}.{rest}");
        }
    }
    key
}

/// Create the environment variable provider using explicit `map()` for section-to-dot mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")` because key names contain
/// underscores: `ORCHESTRALL_HEALTH_TIMEOUT_SECS` must become `health.timeout_secs`.
fn env_provider() -> Env {
    Env::prefixed("ORCHESTRALL_").map(|key| map_env_key(key.as_str()).into())
}
