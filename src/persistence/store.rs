//! SQLite-based run store

use crate::core::{DataItemStatus, PipelineRun, TaskRun};
use crate::persistence::{BeginOutcome, RunFilter, RunStore};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

const RUN_COLUMNS: &str =
    "id, pipeline_id, dataset_id, status, started_at, finished_at, summary, error";

const TASK_RUN_COLUMNS: &str = "id, pipeline_run_id, task_id, task_name, ordinal, status, \
     started_at, finished_at, error, items_in, items_out, retry_attempts, trace";

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Open (or create) a store; `:memory:` gives a private in-memory database
    pub async fn new(db_path: &str) -> Result<Self> {
        let in_memory = db_path == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}", db_path)
        };

        let options = SqliteConnectOptions::from_str(&url)
            .context("Invalid database path")?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to :memory: opens a separate database
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options
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
        let db_dir = data_dir.join("knowledge-pipeline");
        std::fs::create_dir_all(&db_dir)?;

        let db_path = db_dir.join("runs.db");
        let db_path = db_path
            .to_str()
            .context("Database path is not valid UTF-8")?;
        Self::new(db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_runs (
                id TEXT PRIMARY KEY,
                pipeline_id TEXT NOT NULL,
                dataset_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT,
                summary TEXT,
                error TEXT
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_active_run
                ON pipeline_runs(pipeline_id, dataset_id)
                WHERE status IN ('started', 'processing');
            CREATE INDEX IF NOT EXISTS idx_runs_started_at ON pipeline_runs(started_at);

            CREATE TABLE IF NOT EXISTS task_runs (
                id TEXT PRIMARY KEY,
                pipeline_run_id TEXT NOT NULL REFERENCES pipeline_runs(id) ON DELETE CASCADE,
                task_id TEXT NOT NULL,
                task_name TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT,
                error TEXT,
                items_in INTEGER NOT NULL DEFAULT 0,
                items_out INTEGER NOT NULL DEFAULT 0,
                retry_attempts INTEGER NOT NULL DEFAULT 0,
                trace TEXT NOT NULL DEFAULT '[]'
            );

            CREATE INDEX IF NOT EXISTS idx_task_runs_run ON task_runs(pipeline_run_id);

            CREATE TABLE IF NOT EXISTS data_item_status (
                dataset_id TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                status TEXT NOT NULL,
                pipeline_run_id TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (dataset_id, fingerprint)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize schema")?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn json_column(value: &Option<Value>) -> Result<Option<String>> {
        value
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to encode JSON column")
    }

    fn parse_json(text: Option<String>) -> Result<Option<Value>> {
        text.map(|t| serde_json::from_str(&t))
            .transpose()
            .context("Failed to decode JSON column")
    }

    fn parse_uuid(row: &SqliteRow, column: &str) -> Result<Uuid> {
        Uuid::parse_str(&row.get::<String, _>(column))
            .with_context(|| format!("Invalid UUID in column {}", column))
    }

    fn run_from_row(row: &SqliteRow) -> Result<PipelineRun> {
        Ok(PipelineRun {
            id: Self::parse_uuid(row, "id")?,
            pipeline_id: Self::parse_uuid(row, "pipeline_id")?,
            dataset_id: row.get("dataset_id"),
            status: row
                .get::<String, _>("status")
                .parse()
                .map_err(anyhow::Error::msg)?,
            started_at: row
                .get::<Option<NaiveDateTime>, _>("started_at")
                .map(Self::from_naive),
            finished_at: row
                .get::<Option<NaiveDateTime>, _>("finished_at")
                .map(Self::from_naive),
            summary: Self::parse_json(row.get("summary"))?,
            error: Self::parse_json(row.get("error"))?,
        })
    }

    fn task_run_from_row(row: &SqliteRow) -> Result<TaskRun> {
        let trace: String = row.get("trace");
        Ok(TaskRun {
            id: Self::parse_uuid(row, "id")?,
            pipeline_run_id: Self::parse_uuid(row, "pipeline_run_id")?,
            task_id: Self::parse_uuid(row, "task_id")?,
            task_name: row.get("task_name"),
            ordinal: row.get::<i64, _>("ordinal") as usize,
            status: row
                .get::<String, _>("status")
                .parse()
                .map_err(anyhow::Error::msg)?,
            started_at: row
                .get::<Option<NaiveDateTime>, _>("started_at")
                .map(Self::from_naive),
            finished_at: row
                .get::<Option<NaiveDateTime>, _>("finished_at")
                .map(Self::from_naive),
            error: row.get("error"),
            items_in: row.get::<i64, _>("items_in") as usize,
            items_out: row.get::<i64, _>("items_out") as usize,
            retry_attempts: row.get::<i64, _>("retry_attempts") as u32,
            trace: serde_json::from_str(&trace).context("Failed to decode task trace")?,
        })
    }

    async fn active_run(&self, pipeline_id: Uuid, dataset_id: &str) -> Result<Option<PipelineRun>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM pipeline_runs \
             WHERE pipeline_id = ?1 AND dataset_id = ?2 AND status IN ('started', 'processing')",
            RUN_COLUMNS
        ))
        .bind(pipeline_id.to_string())
        .bind(dataset_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up active run")?;

        row.as_ref().map(Self::run_from_row).transpose()
    }
}

#[async_trait::async_trait]
impl RunStore for SqliteRunStore {
    async fn try_begin_run(&self, run: &PipelineRun) -> Result<BeginOutcome> {
        // The partial unique index catches writers racing past the NOT EXISTS check
        let inserted = sqlx::query(
            r#"
            INSERT INTO pipeline_runs
            (id, pipeline_id, dataset_id, status, started_at, finished_at, summary, error)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
            WHERE NOT EXISTS (
                SELECT 1 FROM pipeline_runs
                WHERE pipeline_id = ?2 AND dataset_id = ?3
                  AND status IN ('started', 'processing')
            )
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.pipeline_id.to_string())
        .bind(&run.dataset_id)
        .bind(run.status.as_str())
        .bind(run.started_at.map(Self::to_naive))
        .bind(run.finished_at.map(Self::to_naive))
        .bind(Self::json_column(&run.summary)?)
        .bind(Self::json_column(&run.error)?)
        .execute(&self.pool)
        .await;

        let begun = match inserted {
            Ok(result) => result.rows_affected() == 1,
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => false,
            Err(e) => return Err(e).context("Failed to begin pipeline run"),
        };

        if begun {
            return Ok(BeginOutcome::Begun);
        }

        match self.active_run(run.pipeline_id, &run.dataset_id).await? {
            Some(existing) => Ok(BeginOutcome::Conflict(existing)),
            None => anyhow::bail!(
                "Active run for pipeline {} on dataset '{}' finished while beginning a new one; retry",
                run.pipeline_id,
                run.dataset_id
            ),
        }
    }

    async fn update_run(&self, run: &PipelineRun) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET status = ?2, started_at = ?3, finished_at = ?4, summary = ?5, error = ?6
            WHERE id = ?1
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.status.as_str())
        .bind(run.started_at.map(Self::to_naive))
        .bind(run.finished_at.map(Self::to_naive))
        .bind(Self::json_column(&run.summary)?)
        .bind(Self::json_column(&run.error)?)
        .execute(&self.pool)
        .await
        .context("Failed to update pipeline run")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Pipeline run {} does not exist", run.id);
        }
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM pipeline_runs WHERE id = ?1",
            RUN_COLUMNS
        ))
        .bind(run_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load pipeline run")?;

        row.as_ref().map(Self::run_from_row).transpose()
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<PipelineRun>> {
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let rows = sqlx::query(&format!(
            "SELECT {} FROM pipeline_runs \
             WHERE (?1 IS NULL OR pipeline_id = ?1) AND (?2 IS NULL OR dataset_id = ?2) \
             ORDER BY started_at DESC \
             LIMIT ?3",
            RUN_COLUMNS
        ))
        .bind(filter.pipeline_id.map(|id| id.to_string()))
        .bind(filter.dataset_id.as_deref())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipeline runs")?;

        rows.iter().map(Self::run_from_row).collect()
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("Failed to open transaction")?;

        sqlx::query("DELETE FROM task_runs WHERE pipeline_run_id = ?1")
            .bind(run_id.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to delete task runs")?;

        let result = sqlx::query("DELETE FROM pipeline_runs WHERE id = ?1")
            .bind(run_id.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to delete pipeline run")?;

        tx.commit().await.context("Failed to commit delete")?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_task_run(&self, task_run: &TaskRun) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO task_runs ({}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            TASK_RUN_COLUMNS
        ))
        .bind(task_run.id.to_string())
        .bind(task_run.pipeline_run_id.to_string())
        .bind(task_run.task_id.to_string())
        .bind(&task_run.task_name)
        .bind(task_run.ordinal as i64)
        .bind(task_run.status.as_str())
        .bind(task_run.started_at.map(Self::to_naive))
        .bind(task_run.finished_at.map(Self::to_naive))
        .bind(&task_run.error)
        .bind(task_run.items_in as i64)
        .bind(task_run.items_out as i64)
        .bind(task_run.retry_attempts as i64)
        .bind(serde_json::to_string(&task_run.trace)?)
        .execute(&self.pool)
        .await
        .context("Failed to insert task run")?;

        Ok(())
    }

    async fn update_task_run(&self, task_run: &TaskRun) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE task_runs
            SET status = ?2, started_at = ?3, finished_at = ?4, error = ?5,
                items_in = ?6, items_out = ?7, retry_attempts = ?8, trace = ?9
            WHERE id = ?1
            "#,
        )
        .bind(task_run.id.to_string())
        .bind(task_run.status.as_str())
        .bind(task_run.started_at.map(Self::to_naive))
        .bind(task_run.finished_at.map(Self::to_naive))
        .bind(&task_run.error)
        .bind(task_run.items_in as i64)
        .bind(task_run.items_out as i64)
        .bind(task_run.retry_attempts as i64)
        .bind(serde_json::to_string(&task_run.trace)?)
        .execute(&self.pool)
        .await
        .context("Failed to update task run")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Task run {} does not exist", task_run.id);
        }
        Ok(())
    }

    async fn load_task_run(&self, task_run_id: Uuid) -> Result<Option<TaskRun>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM task_runs WHERE id = ?1",
            TASK_RUN_COLUMNS
        ))
        .bind(task_run_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load task run")?;

        row.as_ref().map(Self::task_run_from_row).transpose()
    }

    async fn list_task_runs(&self, run_id: Uuid) -> Result<Vec<TaskRun>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM task_runs WHERE pipeline_run_id = ?1 ORDER BY ordinal ASC",
            TASK_RUN_COLUMNS
        ))
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list task runs")?;

        rows.iter().map(Self::task_run_from_row).collect()
    }

    async fn load_item_statuses(&self, dataset_id: &str) -> Result<Vec<DataItemStatus>> {
        let rows = sqlx::query(
            r#"
            SELECT dataset_id, fingerprint, status, pipeline_run_id, updated_at
            FROM data_item_status
            WHERE dataset_id = ?1
            "#,
        )
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load item statuses")?;

        rows.iter()
            .map(|row| {
                Ok(DataItemStatus {
                    dataset_id: row.get("dataset_id"),
                    fingerprint: row.get("fingerprint"),
                    status: row
                        .get::<String, _>("status")
                        .parse()
                        .map_err(anyhow::Error::msg)?,
                    pipeline_run_id: Self::parse_uuid(row, "pipeline_run_id")?,
                    updated_at: Self::from_naive(row.get("updated_at")),
                })
            })
            .collect()
    }

    async fn upsert_item_status(&self, status: &DataItemStatus) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO data_item_status (dataset_id, fingerprint, status, pipeline_run_id, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(dataset_id, fingerprint) DO UPDATE SET
                status = excluded.status,
                pipeline_run_id = excluded.pipeline_run_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&status.dataset_id)
        .bind(&status.fingerprint)
        .bind(status.status.as_str())
        .bind(status.pipeline_run_id.to_string())
        .bind(Self::to_naive(status.updated_at))
        .execute(&self.pool)
        .await
        .context("Failed to save item status")?;

        Ok(())
    }
}
