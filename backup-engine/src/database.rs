//! Live database access used by the backup service.
//!
//! The pool is created by whoever wires the service together and injected
//! here; nothing in this crate owns a global connection.

use crate::Result;
use async_trait::async_trait;
use sqlx::PgPool;

/// Columns that mark a table as carrying change timestamps
pub const TIMESTAMP_COLUMNS: [&str; 4] = ["created_at", "updated_at", "createdAt", "updatedAt"];

#[async_trait]
pub trait DatabaseInspector: Send + Sync {
    /// Fail unless the database answers a trivial query.
    async fn ping(&self) -> Result<()>;

    /// Tables eligible for incremental dumps, sorted by name.
    async fn timestamped_tables(&self) -> Result<Vec<String>>;

    /// Release pooled connections.
    async fn close(&self);
}

/// PostgreSQL-backed inspector over an injected pool
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatabaseInspector for PgDatabase {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn timestamped_tables(&self) -> Result<Vec<String>> {
        let columns: Vec<String> = TIMESTAMP_COLUMNS.iter().map(|c| c.to_string()).collect();
        let tables = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT c.table_name::text
             FROM information_schema.columns c
             JOIN information_schema.tables t
               ON t.table_schema = c.table_schema AND t.table_name = c.table_name
             WHERE c.table_schema = 'public'
               AND t.table_type = 'BASE TABLE'
               AND c.column_name::text = ANY($1)
             ORDER BY 1",
        )
        .bind(columns)
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(count = tables.len(), "Discovered timestamped tables");
        Ok(tables)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
