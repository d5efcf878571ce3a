//! Execution backends
//!
//! A backend runs an already-vetted SELECT and hands back rows as
//! column → JSON value maps. Which backend a request uses is decided by the
//! [`crate::router::BackendRouter`].

pub mod postgres;
pub mod sqlite;

use crate::config::{BackendKind, DataSourceConfig};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

/// One result row
pub type Row = serde_json::Map<String, serde_json::Value>;

#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Data source name this backend was registered under
    fn name(&self) -> &str;

    /// Run a read-only statement
    async fn query(&self, sql: &str) -> Result<Vec<Row>>;

    /// Base tables visible to this backend, sorted by name
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Cheap round-trip to verify connectivity
    async fn health_check(&self) -> Result<bool>;
}

/// Opens the backend described by a datasource entry.
///
/// Postgres pools connect lazily, so an unreachable server surfaces on first
/// query rather than at startup.
pub fn open(config: &DataSourceConfig) -> Result<Arc<dyn QueryBackend>> {
    let backend: Arc<dyn QueryBackend> = match config.kind {
        BackendKind::Sqlite => Arc::new(SqliteBackend::open(&config.name, &config.url, config.max_rows)?),
        BackendKind::Postgres => Arc::new(PostgresBackend::connect_lazy(&config.name, &config.url, config.max_rows)?),
    };
    Ok(backend)
}
