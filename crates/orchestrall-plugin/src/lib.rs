// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plugin lifecycle engine for the Orchestrall platform.
//!
//! Provides manifest validation, the plugin registry with its atomically
//! swapped catalog, tenant client configuration loading, the lifecycle engine
//! with dependency checks and health evaluation, and the per-plugin health
//! scheduler.

pub mod catalog;
pub mod client_config;
pub mod engine;
pub mod events;
pub mod format;
pub mod installation;
pub mod manifest;
pub mod probe;
pub mod registry;
pub mod scheduler;
pub mod schema;

pub use catalog::{Catalog, ManifestSource, ScanFailure, ScanFailureKind, ScanReport};
pub use client_config::{ClientConfig, ClientConfigLoader, ClientConfigSource, PluginReference};
pub use engine::{
    ActivationOutcome, ActivationReport, DisableOutcome, EnableOutcome, EngineSettings,
    PluginEngine,
};
pub use events::{EventBus, LifecycleEvent};
pub use format::DocumentFormat;
pub use installation::PluginInstallation;
pub use manifest::{
    Dependency, HealthCheckDescriptor, HealthProtocol, ManifestDocument, ManifestValidator,
    PluginManifest,
};
pub use registry::PluginRegistry;
pub use scheduler::HealthScheduler;
pub use schema::{ConfigField, ConfigFieldType, ConfigSchema};
