//! SQLite-backed cache for postings, sync settings and the last run record.

use chrono::{DateTime, Utc};
use jobboard_core::{ChangeSummary, FetchRunRecord, Job, OrganizationId, ScheduleConfig, SlotTime};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobboard-store";

/// Chunk size for batched deletes, kept well under SQLite's bind limit.
pub const DELETE_CHUNK: usize = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

/// Row count and most recent update stamp, for status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_jobs: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the database at `database_url`, creating it if missing, and
    /// apply pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = database_url
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        debug!(database_url, "connected");
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store for tests and ephemeral runs. The pool is pinned to
    /// a single connection so every query sees the same database.
    pub async fn connect_in_memory() -> Result<Self, StoreError> {
        let options = "sqlite::memory:".parse::<SqliteConnectOptions>()?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }

    /// Raw pool handle for callers that run their own SQL against the
    /// same database.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or overwrite one posting. `created_at` survives updates.
    pub async fn upsert(&self, job: &Job) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                external_id, title, department, team, location, employment_type,
                compensation, published_at, is_remote, application_url,
                created_at, updated_at, last_fetch_fingerprint
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(external_id) DO UPDATE SET
                title = excluded.title,
                department = excluded.department,
                team = excluded.team,
                location = excluded.location,
                employment_type = excluded.employment_type,
                compensation = excluded.compensation,
                published_at = excluded.published_at,
                is_remote = excluded.is_remote,
                application_url = excluded.application_url,
                updated_at = excluded.updated_at,
                last_fetch_fingerprint = excluded.last_fetch_fingerprint
            "#,
        )
        .bind(&job.external_id)
        .bind(&job.title)
        .bind(&job.department)
        .bind(&job.team)
        .bind(&job.location)
        .bind(&job.employment_type)
        .bind(&job.compensation)
        .bind(&job.published_at)
        .bind(job.is_remote)
        .bind(&job.application_url)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(&job.last_fetch_fingerprint)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete the given ids in chunks, returning how many rows went away.
    pub async fn delete_by_ids(&self, ids: &[String]) -> Result<u64, StoreError> {
        let mut removed = 0u64;
        for chunk in ids.chunks(DELETE_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM jobs WHERE external_id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id);
            }
            separated.push_unseparated(")");
            let result = builder.build().execute(&self.pool).await?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }

    pub async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT external_id FROM jobs ORDER BY external_id")
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.try_get("external_id")?);
        }
        Ok(out)
    }

    /// Every cached posting, ordered for stable listings.
    pub async fn list_all(&self) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT external_id, title, department, team, location, employment_type,
                   compensation, published_at, is_remote, application_url,
                   created_at, updated_at, last_fetch_fingerprint
              FROM jobs
             ORDER BY department, title, external_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row_to_job(&row)?);
        }
        Ok(out)
    }

    pub async fn get(&self, external_id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT external_id, title, department, team, location, employment_type,
                   compensation, published_at, is_remote, application_url,
                   created_at, updated_at, last_fetch_fingerprint
              FROM jobs
             WHERE external_id = ?1
            "#,
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| row_to_job(&row)).transpose()
    }

    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let row =
            sqlx::query("SELECT COUNT(*) AS total, MAX(updated_at) AS last_updated FROM jobs")
                .fetch_one(&self.pool)
                .await?;
        Ok(StoreStats {
            total_jobs: row.try_get::<i64, _>("total")? as u64,
            last_updated: row.try_get("last_updated")?,
        })
    }

    pub async fn save_settings(
        &self,
        config: &ScheduleConfig,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let times = serde_json::to_string(&config.times_of_day)
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO sync_settings (id, organization_id, schedule_times, setup_complete, updated_at)
            VALUES (1, ?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                organization_id = excluded.organization_id,
                schedule_times = excluded.schedule_times,
                setup_complete = excluded.setup_complete,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(config.organization_id.as_str())
        .bind(times)
        .bind(config.setup_complete)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_settings(&self) -> Result<Option<ScheduleConfig>, StoreError> {
        let row = sqlx::query(
            "SELECT organization_id, schedule_times, setup_complete FROM sync_settings WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let organization_id = OrganizationId::new(row.try_get::<String, _>("organization_id")?)
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        let times: Vec<SlotTime> =
            serde_json::from_str(&row.try_get::<String, _>("schedule_times")?)
                .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        let mut config = ScheduleConfig::new(organization_id, times)
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        config.setup_complete = row.try_get("setup_complete")?;
        Ok(Some(config))
    }

    /// Overwrite the single last-run record; only the latest outcome is kept.
    pub async fn save_last_run(&self, record: &FetchRunRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO last_fetch_run (id, run_id, ran_at, payload_hash, added, updated, removed, failed_writes, error)
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                run_id = excluded.run_id,
                ran_at = excluded.ran_at,
                payload_hash = excluded.payload_hash,
                added = excluded.added,
                updated = excluded.updated,
                removed = excluded.removed,
                failed_writes = excluded.failed_writes,
                error = excluded.error
            "#,
        )
        .bind(record.run_id.to_string())
        .bind(record.ran_at)
        .bind(&record.payload_hash)
        .bind(record.summary.added as i64)
        .bind(record.summary.updated as i64)
        .bind(record.summary.removed as i64)
        .bind(record.summary.failed_writes as i64)
        .bind(&record.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_last_run(&self) -> Result<Option<FetchRunRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT run_id, ran_at, payload_hash, added, updated, removed, failed_writes, error FROM last_fetch_run WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let run_id = row
            .try_get::<String, _>("run_id")?
            .parse::<Uuid>()
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        Ok(Some(FetchRunRecord {
            run_id,
            ran_at: row.try_get("ran_at")?,
            payload_hash: row.try_get("payload_hash")?,
            summary: ChangeSummary {
                added: row.try_get::<i64, _>("added")? as usize,
                updated: row.try_get::<i64, _>("updated")? as usize,
                removed: row.try_get::<i64, _>("removed")? as usize,
                failed_writes: row.try_get::<i64, _>("failed_writes")? as usize,
            },
            error: row.try_get("error")?,
        }))
    }
}

fn row_to_job(row: &SqliteRow) -> Result<Job, StoreError> {
    Ok(Job {
        external_id: row.try_get("external_id")?,
        title: row.try_get("title")?,
        department: row.try_get("department")?,
        team: row.try_get("team")?,
        location: row.try_get("location")?,
        employment_type: row.try_get("employment_type")?,
        compensation: row.try_get("compensation")?,
        published_at: row.try_get("published_at")?,
        is_remote: row.try_get("is_remote")?,
        application_url: row.try_get("application_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_fetch_fingerprint: row.try_get("last_fetch_fingerprint")?,
    })
}
