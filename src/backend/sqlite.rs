//! SQLite backend on rusqlite

use super::{QueryBackend, Row};
use crate::error::{Text2SqlError, Result};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// rusqlite is synchronous, so every call runs on tokio's blocking pool
#[derive(Clone)]
pub struct SqliteBackend {
    name: String,
    max_rows: usize,
    db: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Opens `path` read-only, or a private in-memory database for `:memory:`
    pub fn open(name: &str, path: &str, max_rows: usize) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI)?
        };
        info!("Opened sqlite datasource '{}' at {}", name, path);
        Ok(Self::from_connection(name, conn, max_rows))
    }

    /// Wraps an existing connection, e.g. one seeded by a test
    pub fn from_connection(name: &str, conn: Connection, max_rows: usize) -> Self {
        Self {
            name: name.to_string(),
            max_rows,
            db: Arc::new(Mutex::new(conn)),
        }
    }

    async fn blocking<T, F>(&self, call: F) -> Result<T>
    where
        F: FnOnce(&SqliteBackend) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let backend = self.clone();
        tokio::task::spawn_blocking(move || call(&backend))
            .await
            .map_err(|e| Text2SqlError::Database(format!("sqlite task on '{}' failed: {}", self.name, e)))?
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| Text2SqlError::Database(format!("sqlite connection '{}' is poisoned", self.name)))
    }

    fn run_query(&self, sql: &str) -> Result<Vec<Row>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            if out.len() >= self.max_rows {
                debug!("Row cap {} reached on '{}'", self.max_rows, self.name);
                break;
            }
            let mut record = Row::new();
            for (idx, column) in columns.iter().enumerate() {
                record.insert(column.clone(), to_json(row.get_ref(idx)?));
            }
            out.push(record);
        }
        Ok(out)
    }

    fn ping(&self) -> Result<bool> {
        let conn = self.lock()?;
        let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(one == 1)
    }

    fn run_list_tables(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::json!(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}

#[async_trait]
impl QueryBackend for SqliteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        self.blocking(move |db| db.run_query(&sql)).await
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.blocking(|db| db.run_list_tables()).await
    }

    async fn health_check(&self) -> Result<bool> {
        self.blocking(|db| db.ping()).await
    }
}
