// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Orchestrall plugin platform.
//!
//! This crate provides the error taxonomy, common types, and capability
//! traits shared by the plugin engine and the tenant connection manager.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use config::{ConfigValue, ResolvedConfig};
pub use error::{ErrorClass, LoadError, OrchestrallError, ValidationError};
pub use types::{
    is_url_safe_token, HealthCheckResult, HealthState, HealthStatus, HealthSubject,
    IsolationMode, LifecycleState, TenantId,
};

pub use traits::{ConnectionFactory, ConnectionTarget, DataConnection, PluginCapability, PluginContext};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_trait_modules_are_exported() {
        fn _assert_plugin<T: PluginCapability>() {}
        fn _assert_connection<T: DataConnection>() {}
        fn _assert_factory<T: ConnectionFactory>() {}
    }

    #[test]
    fn capability_traits_are_object_safe() {
        fn _plugin(_: &dyn PluginCapability) {}
        fn _connection(_: &dyn DataConnection) {}
        fn _factory(_: &dyn ConnectionFactory) {}
    }
}
