// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Multi-tenant connection management for the Orchestrall platform.
//!
//! Provides the [`ConnectionManager`] with its two isolation strategies, the
//! SQLite connection backend via `tokio-rusqlite`, and the
//! [`TenantContextRouter`] that the HTTP layer calls with a resolved tenant.

pub mod handle;
pub mod manager;
pub mod router;
pub mod sqlite;
pub mod strategy;

pub use handle::{HandleScope, TenantConnectionHandle, TenantDiscriminator};
pub use manager::{ConnectionManager, ConnectionSettings};
pub use router::{PluginListing, TenantContext, TenantContextRouter};
pub use sqlite::{SqliteConnection, SqliteConnectionFactory};
pub use strategy::{DedicatedDatabaseStrategy, IsolationStrategy, SharedSchemaStrategy};
