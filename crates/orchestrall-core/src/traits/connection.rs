// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection backend traits used by the tenant connection manager.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::OrchestrallError;
use crate::types::TenantId;

/// Which database a connection is established against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionTarget {
    /// The single shared-schema database.
    Shared,
    /// A tenant's dedicated database.
    Dedicated(TenantId),
}

/// A live, pooled connection to a database.
///
/// Only the connection manager owns these; callers reach them through a
/// tenant handle borrow.
#[async_trait]
pub trait DataConnection: Send + Sync + 'static {
    /// Short backend name for logs (e.g. "sqlite").
    fn backend(&self) -> &str;

    /// Lightweight liveness probe.
    async fn ping(&self) -> Result<(), OrchestrallError>;

    /// Execute one or more statements without parameters.
    async fn execute_batch(&self, sql: &str) -> Result<(), OrchestrallError>;

    /// Execute a single statement with positional text parameters.
    /// Returns the number of affected rows.
    async fn execute(&self, sql: &str, params: Vec<String>) -> Result<usize, OrchestrallError>;

    /// Run a query returning at most one integer value.
    async fn query_i64(&self, sql: &str, params: Vec<String>)
        -> Result<Option<i64>, OrchestrallError>;

    /// Close the connection, flushing pending work.
    async fn close(&self) -> Result<(), OrchestrallError>;
}

/// Establishes connections for a target.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    async fn connect(
        &self,
        target: &ConnectionTarget,
    ) -> Result<Arc<dyn DataConnection>, OrchestrallError>;
}
