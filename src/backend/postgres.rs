//! PostgreSQL backend on a sqlx pool
//!
//! Rows come back through `row_to_json`, one JSON object per row.

use super::{QueryBackend, Row};
use crate::error::{Text2SqlError, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

pub struct PostgresBackend {
    name: String,
    max_rows: usize,
    pool: PgPool,
}

impl PostgresBackend {
    pub fn connect_lazy(name: &str, database_url: &str, max_rows: usize) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect_lazy(database_url)?;
        info!("Registered postgres datasource '{}'", name);
        Ok(Self::from_pool(name, pool, max_rows))
    }

    pub fn from_pool(name: &str, pool: PgPool, max_rows: usize) -> Self {
        Self {
            name: name.to_string(),
            max_rows,
            pool,
        }
    }
}

/// Wraps a SELECT so every row decodes as one JSON object.
///
/// The inner statement sits on its own lines so a trailing `--` comment
/// cannot swallow the closing parenthesis.
fn wrap_as_json(sql: &str, max_rows: usize) -> String {
    let inner = sql.trim().trim_end_matches(';').trim_end();
    format!("SELECT row_to_json(q) FROM (\n{}\n) AS q LIMIT {}", inner, max_rows)
}

#[async_trait]
impl QueryBackend for PostgresBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let wrapped = wrap_as_json(sql, self.max_rows);
        let values: Vec<serde_json::Value> = sqlx::query_scalar(&wrapped).fetch_all(&self.pool).await?;

        values
            .into_iter()
            .map(|value| match value {
                serde_json::Value::Object(map) => Ok(map),
                other => Err(Text2SqlError::Execution(format!("unexpected row shape: {}", other))),
            })
            .collect()
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn health_check(&self) -> Result<bool> {
        let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }
}
