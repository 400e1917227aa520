//! Schema Store
//!
//! SQLite-backed persistence for global schema snapshots and their
//! transaction rows. Each call is atomic; `get_schema` returns the most
//! recently saved value. Nested payloads (columns, operation logs) are
//! stored as JSON columns; timestamps as RFC 3339 text.
//!
//! The store either returns a complete, validated row or an explicit
//! `None`; there is no silent schema-shape repair at read time.

use crate::model::GlobalSchema;
use crate::transaction::{SchemaTransaction, TransactionStatus};
use chrono::{DateTime, Utc};
use gridline_ids::{ProjectId, SchemaId, TransactionId, UserId};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Errors that can occur in schema store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

/// SQLite-backed storage for global schemas and schema transactions.
#[derive(Clone, Debug)]
pub struct SchemaStore {
    pool: SqlitePool,
}

impl SchemaStore {
    /// Create a store on an existing pool.
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    /// Open or create a store at the given path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Parse(e.to_string()))?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        Self::new(pool).await
    }

    /// Create an in-memory store (for testing).
    ///
    /// A single connection, so every caller sees the same database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Self::new(pool).await
    }

    /// Open a store from a configuration URL.
    ///
    /// Accepts `sqlite:<path>` or `sqlite::memory:`. Other engines are
    /// rejected here rather than half-supported.
    pub async fn open_url(raw: &str) -> Result<Self, StoreError> {
        let Some(rest) = raw.strip_prefix("sqlite:") else {
            return Err(StoreError::Parse(format!(
                "Unsupported store URL: {}",
                raw
            )));
        };

        let rest = rest.trim();
        if rest == ":memory:" {
            return Self::in_memory().await;
        }
        if rest.is_empty() {
            return Err(StoreError::Parse(format!("sqlite URL missing path: {}", raw)));
        }

        Self::open(Path::new(rest)).await
    }

    async fn init_tables(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS global_schemas (
                schema_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                project_id TEXT,
                name TEXT NOT NULL,
                description TEXT,
                columns_json TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                previous_version_id TEXT,
                is_active INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_global_schemas_project
                ON global_schemas(project_id);

            CREATE TABLE IF NOT EXISTS schema_transactions (
                transaction_id TEXT PRIMARY KEY,
                schema_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                operations_json TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                CHECK(status IN ('pending', 'committed', 'rolled_back'))
            );

            CREATE INDEX IF NOT EXISTS idx_schema_transactions_schema
                ON schema_transactions(schema_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // === Schemas ===

    /// Save a schema snapshot (upsert by id).
    pub async fn save_schema(&self, schema: &GlobalSchema) -> Result<(), StoreError> {
        let columns_json = serde_json::to_string(&schema.columns)?;

        sqlx::query(
            r#"
            INSERT INTO global_schemas
                (schema_id, owner_id, project_id, name, description, columns_json,
                 version, previous_version_id, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(schema_id) DO UPDATE SET
                owner_id = excluded.owner_id,
                project_id = excluded.project_id,
                name = excluded.name,
                description = excluded.description,
                columns_json = excluded.columns_json,
                version = excluded.version,
                previous_version_id = excluded.previous_version_id,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(schema.id.as_str())
        .bind(schema.owner_id.as_str())
        .bind(schema.project_id.as_ref().map(|p| p.as_str().to_string()))
        .bind(&schema.name)
        .bind(&schema.description)
        .bind(columns_json)
        .bind(schema.version as i64)
        .bind(
            schema
                .previous_version_id
                .as_ref()
                .map(|p| p.as_str().to_string()),
        )
        .bind(schema.is_active as i64)
        .bind(schema.created_at.to_rfc3339())
        .bind(schema.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a schema by its id.
    pub async fn get_schema(&self, id: &SchemaId) -> Result<Option<GlobalSchema>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT schema_id, owner_id, project_id, name, description, columns_json,
                   version, previous_version_id, is_active, created_at, updated_at
            FROM global_schemas
            WHERE schema_id = ?
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_schema).transpose()
    }

    /// List schemas for a project, optionally only the active one.
    pub async fn list_for_project(
        &self,
        project_id: &ProjectId,
        active_only: bool,
    ) -> Result<Vec<GlobalSchema>, StoreError> {
        let sql = if active_only {
            r#"
            SELECT schema_id, owner_id, project_id, name, description, columns_json,
                   version, previous_version_id, is_active, created_at, updated_at
            FROM global_schemas
            WHERE project_id = ? AND is_active = 1
            ORDER BY created_at DESC, version DESC
            "#
        } else {
            r#"
            SELECT schema_id, owner_id, project_id, name, description, columns_json,
                   version, previous_version_id, is_active, created_at, updated_at
            FROM global_schemas
            WHERE project_id = ?
            ORDER BY created_at DESC, version DESC
            "#
        };

        let rows = sqlx::query(sql)
            .bind(project_id.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(row_to_schema).collect()
    }

    /// Delete a schema row by id. Returns whether a row was deleted.
    pub async fn delete_schema(&self, id: &SchemaId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM global_schemas WHERE schema_id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Activate one schema in a project, deactivating every sibling.
    ///
    /// Both steps run in one SQL transaction: either the project ends up
    /// with exactly the target active, or nothing is observed as final.
    pub async fn set_active(
        &self,
        project_id: &ProjectId,
        schema_id: &SchemaId,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE global_schemas SET is_active = 0 WHERE project_id = ?")
            .bind(project_id.as_str())
            .execute(&mut *tx)
            .await?;

        let rows_affected = sqlx::query(
            "UPDATE global_schemas SET is_active = 1 WHERE schema_id = ? AND project_id = ?",
        )
        .bind(schema_id.as_str())
        .bind(project_id.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            // Dropping the transaction rolls back the sibling deactivation.
            return Err(StoreError::NotFound(format!(
                "Schema {} not found in project {}",
                schema_id, project_id
            )));
        }

        tx.commit().await?;
        info!(schema_id = %schema_id, project_id = %project_id, "Schema activated");

        Ok(())
    }

    // === Transactions ===

    /// Save a schema transaction (upsert by id).
    pub async fn save_transaction(&self, txn: &SchemaTransaction) -> Result<(), StoreError> {
        let operations_json = serde_json::to_string(&txn.operations)?;

        sqlx::query(
            r#"
            INSERT INTO schema_transactions
                (transaction_id, schema_id, user_id, status, operations_json,
                 started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(transaction_id) DO UPDATE SET
                status = excluded.status,
                operations_json = excluded.operations_json,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(txn.id.as_str())
        .bind(txn.schema_id.as_str())
        .bind(txn.user_id.as_str())
        .bind(txn.status.as_str())
        .bind(operations_json)
        .bind(txn.started_at.to_rfc3339())
        .bind(txn.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a transaction by its id.
    pub async fn get_transaction(
        &self,
        id: &TransactionId,
    ) -> Result<Option<SchemaTransaction>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT transaction_id, schema_id, user_id, status, operations_json,
                   started_at, completed_at
            FROM schema_transactions
            WHERE transaction_id = ?
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_transaction).transpose()
    }

    /// List all transactions targeting a schema, newest first.
    pub async fn transactions_for_schema(
        &self,
        schema_id: &SchemaId,
    ) -> Result<Vec<SchemaTransaction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT transaction_id, schema_id, user_id, status, operations_json,
                   started_at, completed_at
            FROM schema_transactions
            WHERE schema_id = ?
            ORDER BY started_at DESC
            "#,
        )
        .bind(schema_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_transaction).collect()
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Parse(format!("Invalid timestamp '{}': {}", raw, e)))
}

fn row_to_schema(row: SqliteRow) -> Result<GlobalSchema, StoreError> {
    let schema_id_raw: String = row.try_get("schema_id")?;
    let id = SchemaId::parse(&schema_id_raw).map_err(|e| StoreError::Parse(e.to_string()))?;

    let owner_raw: String = row.try_get("owner_id")?;
    let owner_id = UserId::parse(&owner_raw).map_err(|e| StoreError::Parse(e.to_string()))?;

    let project_raw: Option<String> = row.try_get("project_id")?;
    let project_id = project_raw
        .map(|p| ProjectId::parse(&p))
        .transpose()
        .map_err(|e| StoreError::Parse(e.to_string()))?;

    let previous_raw: Option<String> = row.try_get("previous_version_id")?;
    let previous_version_id = previous_raw
        .map(|p| SchemaId::parse(&p))
        .transpose()
        .map_err(|e| StoreError::Parse(e.to_string()))?;

    let columns_json: String = row.try_get("columns_json")?;
    let columns = serde_json::from_str(&columns_json)?;

    let version: i64 = row.try_get("version")?;
    let is_active: i64 = row.try_get("is_active")?;

    let created_raw: String = row.try_get("created_at")?;
    let updated_raw: String = row.try_get("updated_at")?;

    Ok(GlobalSchema {
        id,
        owner_id,
        project_id,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        columns,
        version: version as u32,
        previous_version_id,
        is_active: is_active != 0,
        created_at: parse_timestamp(&created_raw)?,
        updated_at: parse_timestamp(&updated_raw)?,
    })
}

fn row_to_transaction(row: SqliteRow) -> Result<SchemaTransaction, StoreError> {
    let txn_id_raw: String = row.try_get("transaction_id")?;
    let id = TransactionId::parse(&txn_id_raw).map_err(|e| StoreError::Parse(e.to_string()))?;

    let schema_raw: String = row.try_get("schema_id")?;
    let schema_id = SchemaId::parse(&schema_raw).map_err(|e| StoreError::Parse(e.to_string()))?;

    let user_raw: String = row.try_get("user_id")?;
    let user_id = UserId::parse(&user_raw).map_err(|e| StoreError::Parse(e.to_string()))?;

    let status_raw: String = row.try_get("status")?;
    let status: TransactionStatus = status_raw
        .parse()
        .map_err(|e: String| StoreError::Parse(e))?;

    let operations_json: String = row.try_get("operations_json")?;
    let operations = serde_json::from_str(&operations_json)?;

    let started_raw: String = row.try_get("started_at")?;
    let completed_raw: Option<String> = row.try_get("completed_at")?;

    Ok(SchemaTransaction {
        id,
        schema_id,
        user_id,
        status,
        operations,
        started_at: parse_timestamp(&started_raw)?,
        completed_at: completed_raw.as_deref().map(parse_timestamp).transpose()?,
    })
}
