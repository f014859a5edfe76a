//! PostgreSQL store backed by an `sqlx` pool
//!
//! Rows travel as JSON text: reads go through `row_to_json(..)::text` and
//! writes through `json_populate_recordset`, so column types never have to be
//! mapped on the Rust side and the target's own column types decide parsing.
//! The text is never decoded in between, which keeps `numeric` values exact.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::{json_array, run_tool, RelationalStore, Row, TableRef};
use crate::config::Endpoint;
use crate::error::{MigrationError, Result};
use storeshift_common::StoreKind;

/// Schemas that belong to the server, never to the application
const SYSTEM_SCHEMAS: [&str; 3] = ["pg_catalog", "information_schema", "pg_toast"];

/// Ordinary and partitioned tables outside the system schemas
///
/// Partitions are left out: their rows are read and written through the
/// partitioned parent, which routes inserts on the target.
const LIST_TABLES_SQL: &str = r#"
    SELECT n.nspname::text, c.relname::text
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE c.relkind IN ('r', 'p')
      AND NOT c.relispartition
      AND n.nspname <> ALL($1)
      AND n.nspname NOT LIKE 'pg\_temp\_%'
      AND n.nspname NOT LIKE 'pg\_toast\_temp\_%'
    ORDER BY n.nspname, c.relname
"#;

/// Pool size per store; units beyond this wait for a connection
const MAX_CONNECTIONS: u32 = 8;

pub struct PostgresStore {
    pool: PgPool,
    endpoint: Endpoint,
}

impl PostgresStore {
    /// Build a pool that connects on first use
    pub fn connect_lazy(endpoint: &Endpoint, timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(timeout)
            .connect_lazy(&endpoint.postgres_url())?;

        Ok(Self {
            pool,
            endpoint: endpoint.clone(),
        })
    }
}

#[async_trait]
impl RelationalStore for PostgresStore {
    async fn list_tables(&self) -> Result<Vec<TableRef>> {
        let rows: Vec<(String, String)> = sqlx::query_as(LIST_TABLES_SQL)
            .bind(&SYSTEM_SCHEMAS[..])
            .fetch_all(&self.pool)
            .await?;

        debug!(address = %self.endpoint.address(), tables = rows.len(), "Listed tables");

        Ok(rows
            .into_iter()
            .map(|(schema, name)| TableRef::new(schema, name))
            .collect())
    }

    async fn count_rows(&self, table: &TableRef) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table.quoted()))
            .fetch_one(&self.pool)
            .await?;

        u64::try_from(count)
            .map_err(|_| MigrationError::transfer(table.to_string(), format!("negative row count {count}")))
    }

    async fn fetch_batch(&self, table: &TableRef, offset: u64, limit: usize) -> Result<Vec<Row>> {
        let sql = format!(
            "SELECT row_to_json(b)::text FROM (SELECT * FROM {} ORDER BY 1 LIMIT $1 OFFSET $2) b",
            table.quoted()
        );
        let limit = i64::try_from(limit)
            .map_err(|_| MigrationError::transfer(table.to_string(), "batch size out of range"))?;
        let offset = i64::try_from(offset)
            .map_err(|_| MigrationError::transfer(table.to_string(), "offset out of range"))?;

        let rows: Vec<String> = sqlx::query_scalar(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Row::from_json_text).collect())
    }

    async fn insert_batch(&self, table: &TableRef, rows: &[Row]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let quoted = table.quoted();
        let sql = format!(
            "INSERT INTO {quoted} SELECT * FROM json_populate_recordset(NULL::{quoted}, $1::json) \
             ON CONFLICT DO NOTHING"
        );

        let result = sqlx::query(&sql)
            .bind(json_array(rows))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn dump(&self, path: &Path) -> Result<()> {
        if path.exists() {
            return Err(MigrationError::backup(
                StoreKind::Postgres,
                format!("refusing to overwrite existing dump {}", path.display()),
            ));
        }

        let args = vec![
            "--clean".to_string(),
            "--if-exists".to_string(),
            "--create".to_string(),
            "--no-password".to_string(),
            "--file".to_string(),
            path.display().to_string(),
            "--dbname".to_string(),
            self.endpoint.postgres_url(),
        ];

        run_tool("pg_dump", &args)
            .await
            .map_err(|err| MigrationError::backup(StoreKind::Postgres, err.to_string()))?;

        info!(address = %self.endpoint.address(), path = %path.display(), "PostgreSQL dump written");
        Ok(())
    }
}
