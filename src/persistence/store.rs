//! SQLite-based node execution store

use crate::core::NodeExecution;
use crate::persistence::{NodeExecutionStore, PlanExecutionSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// SQLite node execution store
///
/// Records are stored as JSON alongside the columns used for lookups; the
/// `version` column guards optimistic updates.
pub struct SqliteNodeExecutionStore {
    pool: SqlitePool,
}

impl SqliteNodeExecutionStore {
    /// Open (creating if needed) the database at `db_path`
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))
            .context("Invalid database path")?
            .create_if_missing(true);

        // A single connection keeps `:memory:` databases shared and writes serialized
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("node-engine");
        std::fs::create_dir_all(&db_dir)?;

        let db_path = db_dir.join("executions.db");
        let db_path = db_path
            .to_str()
            .context("Database path is not valid UTF-8")?;
        Self::new(db_path).await
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS node_executions (
                id TEXT PRIMARY KEY,
                plan_execution_id TEXT NOT NULL,
                plan_id TEXT NOT NULL,
                identifier TEXT NOT NULL,
                status TEXT NOT NULL,
                version INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                body TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_plan_execution ON node_executions(plan_execution_id);
            CREATE INDEX IF NOT EXISTS idx_created_at ON node_executions(created_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    fn decode(body: &str) -> Result<NodeExecution> {
        serde_json::from_str(body).context("Corrupt node execution record")
    }
}

#[async_trait::async_trait]
impl NodeExecutionStore for SqliteNodeExecutionStore {
    async fn create(&self, execution: &NodeExecution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO node_executions
            (id, plan_execution_id, plan_id, identifier, status, version, created_at, body)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&execution.uuid)
        .bind(execution.context.plan_execution_id())
        .bind(execution.context.plan_id())
        .bind(&execution.identifier)
        .bind(execution.status.to_string())
        .bind(execution.version as i64)
        .bind(Self::to_naive(execution.created_at))
        .bind(serde_json::to_string(execution)?)
        .execute(&self.pool)
        .await
        .context("Failed to save node execution")?;

        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<NodeExecution>> {
        let row = sqlx::query("SELECT body FROM node_executions WHERE id = ?1")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load node execution")?;

        row.map(|row| Self::decode(&row.get::<String, _>("body")))
            .transpose()
    }

    async fn replace(&self, execution: &NodeExecution, expected_version: u64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE node_executions
            SET status = ?1, version = ?2, body = ?3
            WHERE id = ?4 AND version = ?5
            "#,
        )
        .bind(execution.status.to_string())
        .bind(execution.version as i64)
        .bind(serde_json::to_string(execution)?)
        .bind(&execution.uuid)
        .bind(expected_version as i64)
        .execute(&self.pool)
        .await
        .context("Failed to update node execution")?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_by_plan_execution(&self, plan_execution_id: &str) -> Result<Vec<NodeExecution>> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM node_executions
            WHERE plan_execution_id = ?1
            ORDER BY created_at ASC
            "#,
        )
        .bind(plan_execution_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list node executions")?;

        rows.iter()
            .map(|row| Self::decode(&row.get::<String, _>("body")))
            .collect()
    }

    async fn recent_plan_executions(&self, limit: usize) -> Result<Vec<PlanExecutionSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT plan_execution_id, MIN(created_at) AS started
            FROM node_executions
            GROUP BY plan_execution_id
            ORDER BY started DESC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list plan executions")?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let plan_execution_id: String = row.get("plan_execution_id");
            let executions = self.list_by_plan_execution(&plan_execution_id).await?;
            if let Some(summary) = PlanExecutionSummary::from_executions(&executions) {
                summaries.push(summary);
            }
        }
        Ok(summaries)
    }
}
