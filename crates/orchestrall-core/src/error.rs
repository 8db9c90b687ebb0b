// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Orchestrall plugin platform.

use thiserror::Error;

use crate::types::LifecycleState;

/// A manifest or schema rule violation, naming the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid field `{field}`: {reason}")]
pub struct ValidationError {
    /// Dotted path of the offending field (e.g. `config.api_key.type`).
    pub field: String,
    /// Human-readable reason.
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A structural failure while loading a tenant's client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("client config for tenant `{tenant}` rejected at `{entry}`: {reason}")]
pub struct LoadError {
    /// Tenant whose configuration was being loaded.
    pub tenant: String,
    /// The malformed entry (e.g. `plugins[1].priority`).
    pub entry: String,
    /// Human-readable reason.
    pub reason: String,
}

impl LoadError {
    pub fn new(
        tenant: impl Into<String>,
        entry: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            entry: entry.into(),
            reason: reason.into(),
        }
    }
}

/// How a caller at the edge is expected to treat an error.
///
/// The HTTP layer maps `ClientCorrectable` to a 4xx, `Retryable` to a
/// retryable 5xx, and `Fatal` to an unconditional hard failure with no
/// partial response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    ClientCorrectable,
    Retryable,
    Fatal,
    Internal,
}

/// The primary error type used across the plugin engine and connection manager.
#[derive(Debug, Error)]
pub enum OrchestrallError {
    /// Malformed plugin manifest.
    #[error("manifest validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Malformed tenant client configuration.
    #[error(transparent)]
    ClientConfig(#[from] LoadError),

    /// Process configuration errors (invalid TOML, bad values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Requested plugin is not in the registry catalog.
    #[error("plugin not found: {plugin}")]
    PluginNotFound { plugin: String },

    /// The tenant has no installation of this plugin.
    #[error("plugin {plugin} is not installed for tenant {tenant}")]
    NotInstalled { tenant: String, plugin: String },

    /// Tenant-supplied plugin configuration does not satisfy the manifest schema.
    #[error("invalid configuration for plugin {plugin}: field `{field}` {reason}")]
    ConfigInvalid {
        plugin: String,
        field: String,
        reason: String,
    },

    /// A declared dependency is not enabled for the same tenant.
    #[error("plugin {plugin} requires {dependency}: {reason}")]
    DependencyUnmet {
        plugin: String,
        dependency: String,
        reason: String,
    },

    /// Other enabled plugins of the tenant still depend on this one.
    #[error("plugin {plugin} is still required by: {}", dependents.join(", "))]
    DependentsActive {
        plugin: String,
        dependents: Vec<String>,
    },

    /// The requested lifecycle transition is not allowed from the current state.
    #[error("plugin {plugin} cannot move from {from} to {to}")]
    InvalidTransition {
        plugin: String,
        from: LifecycleState,
        to: LifecycleState,
    },

    /// A plugin implementation's lifecycle hook returned an error.
    #[error("plugin {plugin} {hook} hook failed: {message}")]
    PluginHook {
        plugin: String,
        hook: &'static str,
        message: String,
    },

    /// Connection establishment or a liveness probe failed.
    #[error("connection unavailable for tenant {tenant}: {message}")]
    ConnectionUnavailable { tenant: String, message: String },

    /// A handle was about to be served for a tenant other than the requested one.
    #[error("isolation violation: handle bound to tenant {actual} requested for tenant {requested}")]
    IsolationViolation { requested: String, actual: String },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Storage backend errors (database open, query failure).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestrallError {
    /// Classify the error for edge-layer response mapping.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_)
            | Self::ClientConfig(_)
            | Self::PluginNotFound { .. }
            | Self::NotInstalled { .. }
            | Self::ConfigInvalid { .. }
            | Self::DependencyUnmet { .. }
            | Self::DependentsActive { .. }
            | Self::InvalidTransition { .. } => ErrorClass::ClientCorrectable,
            Self::ConnectionUnavailable { .. } | Self::Timeout { .. } | Self::Storage { .. } => {
                ErrorClass::Retryable
            }
            Self::IsolationViolation { .. } => ErrorClass::Fatal,
            Self::Config(_) | Self::PluginHook { .. } | Self::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Wrap any backend error as a storage error.
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Storage {
            source: Box::new(err),
        }
    }
}
