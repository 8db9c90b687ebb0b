// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite connection backend.
//!
//! Each connection is a `tokio-rusqlite` handle: statements run on the
//! connection's single background thread, so no blocking work happens on the
//! async runtime. Shared-schema mode opens one database file; dedicated mode
//! opens `<database_dir>/<tenant>.db`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use orchestrall_config::model::TenancyConfig;
use orchestrall_core::{ConnectionFactory, ConnectionTarget, DataConnection, OrchestrallError};
use rusqlite::OptionalExtension;
use tracing::debug;

/// Path value that keeps a database in memory.
pub const IN_MEMORY: &str = ":memory:";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Convert a tokio-rusqlite error into `OrchestrallError::Storage`.
fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> OrchestrallError {
    OrchestrallError::storage(e)
}

/// Opens SQLite connections for shared and dedicated targets.
#[derive(Debug, Clone)]
pub struct SqliteConnectionFactory {
    shared_database: String,
    database_dir: String,
}

impl SqliteConnectionFactory {
    pub fn new(shared_database: impl Into<String>, database_dir: impl Into<String>) -> Self {
        Self {
            shared_database: shared_database.into(),
            database_dir: database_dir.into(),
        }
    }

    pub fn from_config(config: &TenancyConfig) -> Self {
        Self::new(&config.shared_database, &config.database_dir)
    }

    /// Every target is a fresh in-memory database.
    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY, IN_MEMORY)
    }

    /// The database file of a target, or `None` for in-memory databases.
    pub fn database_path(&self, target: &ConnectionTarget) -> Option<PathBuf> {
        match target {
            ConnectionTarget::Shared if self.shared_database == IN_MEMORY => None,
            ConnectionTarget::Shared => Some(PathBuf::from(&self.shared_database)),
            ConnectionTarget::Dedicated(_) if self.database_dir == IN_MEMORY => None,
            ConnectionTarget::Dedicated(tenant) => {
                Some(Path::new(&self.database_dir).join(format!("{tenant}.db")))
            }
        }
    }
}

#[async_trait]
impl ConnectionFactory for SqliteConnectionFactory {
    async fn connect(
        &self,
        target: &ConnectionTarget,
    ) -> Result<Arc<dyn DataConnection>, OrchestrallError> {
        let conn = match self.database_path(target) {
            None => tokio_rusqlite::Connection::open_in_memory()
                .await
                .map_err(OrchestrallError::storage)?,
            Some(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent)
                            .await
                            .map_err(OrchestrallError::storage)?;
                    }
                }
                tokio_rusqlite::Connection::open(&path)
                    .await
                    .map_err(OrchestrallError::storage)?
            }
        };

        conn.call(|conn| -> Result<(), rusqlite::Error> {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.pragma_update(None, "foreign_keys", true)?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        debug!(target = ?target, "sqlite connection opened");
        Ok(Arc::new(SqliteConnection {
            conn,
            closed: AtomicBool::new(false),
        }))
    }
}

/// One SQLite database connection.
pub struct SqliteConnection {
    conn: tokio_rusqlite::Connection,
    closed: AtomicBool,
}

impl SqliteConnection {
    fn ensure_open(&self) -> Result<(), OrchestrallError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(OrchestrallError::Internal(
                "sqlite connection already closed".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DataConnection for SqliteConnection {
    fn backend(&self) -> &str {
        "sqlite"
    }

    async fn ping(&self) -> Result<(), OrchestrallError> {
        self.ensure_open()?;
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), OrchestrallError> {
        self.ensure_open()?;
        let sql = sql.to_string();
        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> { conn.execute_batch(&sql) })
            .await
            .map_err(map_tr_err)
    }

    async fn execute(&self, sql: &str, params: Vec<String>) -> Result<usize, OrchestrallError> {
        self.ensure_open()?;
        let sql = sql.to_string();
        self.conn
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                conn.execute(&sql, rusqlite::params_from_iter(params.iter()))
            })
            .await
            .map_err(map_tr_err)
    }

    async fn query_i64(
        &self,
        sql: &str,
        params: Vec<String>,
    ) -> Result<Option<i64>, OrchestrallError> {
        self.ensure_open()?;
        let sql = sql.to_string();
        self.conn
            .call(move |conn| -> Result<Option<i64>, rusqlite::Error> {
                conn.query_row(&sql, rusqlite::params_from_iter(params.iter()), |row| {
                    row.get::<_, Option<i64>>(0)
                })
                .optional()
                .map(Option::flatten)
            })
            .await
            .map_err(map_tr_err)
    }

    async fn close(&self) -> Result<(), OrchestrallError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // The background thread exits once the last handle to it is dropped.
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> { conn.execute_batch("PRAGMA optimize;") })
            .await
            .map_err(map_tr_err)?;
        debug!("sqlite connection closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrall_core::TenantId;

    #[test]
    fn dedicated_path_is_per_tenant() {
        let factory = SqliteConnectionFactory::new("/var/lib/orchestrall/shared.db", "/data/tenants");
        let tenant = TenantId::parse("acme").unwrap();
        assert_eq!(
            factory.database_path(&ConnectionTarget::Dedicated(tenant)),
            Some(PathBuf::from("/data/tenants/acme.db"))
        );
        assert_eq!(
            factory.database_path(&ConnectionTarget::Shared),
            Some(PathBuf::from("/var/lib/orchestrall/shared.db"))
        );
        assert_eq!(SqliteConnectionFactory::in_memory().database_path(&ConnectionTarget::Shared), None);
    }

    #[tokio::test]
    async fn in_memory_connection_executes_statements() {
        let factory = SqliteConnectionFactory::in_memory();
        let conn = factory.connect(&ConnectionTarget::Shared).await.unwrap();

        conn.execute_batch("CREATE TABLE orders (tenant_id TEXT NOT NULL, total INTEGER);")
            .await
            .unwrap();
        let inserted = conn
            .execute(
                "INSERT INTO orders (tenant_id, total) VALUES (?1, ?2)",
                vec!["acme".into(), "42".into()],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let total = conn
            .query_i64("SELECT SUM(total) FROM orders WHERE tenant_id = ?1", vec!["acme".into()])
            .await
            .unwrap();
        assert_eq!(total, Some(42));
        let none = conn
            .query_i64("SELECT SUM(total) FROM orders WHERE tenant_id = ?1", vec!["globex".into()])
            .await
            .unwrap();
        assert_eq!(none, None);

        conn.ping().await.unwrap();
        conn.close().await.unwrap();
        assert!(conn.ping().await.is_err());
    }

    #[tokio::test]
    async fn dedicated_databases_are_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let factory = SqliteConnectionFactory::new(IN_MEMORY, dir.path().to_string_lossy());
        let acme = TenantId::parse("acme").unwrap();

        let conn = factory
            .connect(&ConnectionTarget::Dedicated(acme))
            .await
            .unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER);").await.unwrap();

        assert!(dir.path().join("acme.db").exists());
    }
}
