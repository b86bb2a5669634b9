//! SQLite storage implementation.
//!
//! Provides persistent storage using SQLite database. A database file may
//! be shared by several scheduler processes; the claim in
//! `pop_for_execution` is a single conditional `UPDATE`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use super::{Storage, StorageError};
use crate::core::job::{Job, JobExecution, JobFilter, PageRequest};
use crate::core::schedule::Schedule;
use crate::core::types::{ExecutionId, JobId, JobName, TenantId};

const JOB_COLUMNS: &str = "id, tenant_id, application_name, bean, method, schedule, \
     config_enabled, user_enabled, next_execution, popped_for_execution, job_execution_id, \
     execution_count, last_successfully_executed, last_failed_execution";

const EXECUTION_COLUMNS: &str = "id, tenant_id, job_id, success, stack_trace, created_date";

/// SQLite storage backend.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage with the given database path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StorageError::Other(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Other(e.to_string()))?;

        // Every connection to `:memory:` is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fetch_jobs(
        &self,
        sql: &str,
        application_name: &str,
    ) -> Result<Vec<Job>, StorageError> {
        let rows: Vec<JobRow> = sqlx::query_as(sql)
            .bind(application_name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;
        rows.into_iter().map(Job::try_from).collect()
    }
}

// Helper functions for time conversion
fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        StorageError::SerializationError(format!("timestamp out of range: {}", millis))
    })
}

fn from_optional_millis(millis: Option<i64>) -> Result<Option<DateTime<Utc>>, StorageError> {
    millis.map(from_millis).transpose()
}

fn parse_id<T: FromStr>(text: &str) -> Result<T, StorageError>
where
    T::Err: std::fmt::Display,
{
    text.parse()
        .map_err(|e| StorageError::SerializationError(format!("invalid id '{}': {}", text, e)))
}

fn like_pattern(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    tenant_id: String,
    application_name: String,
    bean: String,
    method: String,
    schedule: String,
    config_enabled: bool,
    user_enabled: bool,
    next_execution: Option<i64>,
    popped_for_execution: Option<i64>,
    job_execution_id: Option<String>,
    execution_count: i64,
    last_successfully_executed: Option<i64>,
    last_failed_execution: Option<i64>,
}

impl TryFrom<JobRow> for Job {
    type Error = StorageError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let schedule: Schedule = serde_json::from_str(&row.schedule)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        Ok(Job {
            id: parse_id(&row.id)?,
            tenant_id: parse_id(&row.tenant_id)?,
            application_name: row.application_name,
            name: JobName::new(row.bean, row.method),
            schedule,
            config_enabled: row.config_enabled,
            user_enabled: row.user_enabled,
            next_execution: from_optional_millis(row.next_execution)?,
            popped_for_execution: from_optional_millis(row.popped_for_execution)?,
            job_execution_id: row.job_execution_id.as_deref().map(parse_id).transpose()?,
            execution_count: u64::try_from(row.execution_count).unwrap_or(0),
            last_successfully_executed: from_optional_millis(row.last_successfully_executed)?,
            last_failed_execution: from_optional_millis(row.last_failed_execution)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: String,
    tenant_id: String,
    job_id: String,
    success: bool,
    stack_trace: Option<String>,
    created_date: i64,
}

impl TryFrom<ExecutionRow> for JobExecution {
    type Error = StorageError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        Ok(JobExecution {
            id: parse_id(&row.id)?,
            tenant_id: parse_id(&row.tenant_id)?,
            job_id: parse_id(&row.job_id)?,
            success: row.success,
            stack_trace: row.stack_trace,
            created_date: from_millis(row.created_date)?,
        })
    }
}

fn executions_from_rows(rows: Vec<ExecutionRow>) -> Result<Vec<JobExecution>, StorageError> {
    rows.into_iter().map(JobExecution::try_from).collect()
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_job(&self, job: Job) -> Result<(), StorageError> {
        let schedule = serde_json::to_string(&job.schedule)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, tenant_id, application_name, bean, method, schedule,
                              config_enabled, user_enabled, next_execution, popped_for_execution,
                              job_execution_id, execution_count, last_successfully_executed,
                              last_failed_execution)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                application_name = excluded.application_name,
                bean = excluded.bean,
                method = excluded.method,
                schedule = excluded.schedule,
                config_enabled = excluded.config_enabled,
                user_enabled = excluded.user_enabled,
                next_execution = excluded.next_execution,
                popped_for_execution = excluded.popped_for_execution,
                job_execution_id = excluded.job_execution_id,
                execution_count = excluded.execution_count,
                last_successfully_executed = excluded.last_successfully_executed,
                last_failed_execution = excluded.last_failed_execution
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.tenant_id.to_string())
        .bind(&job.application_name)
        .bind(job.name.bean())
        .bind(job.name.method())
        .bind(schedule)
        .bind(job.config_enabled)
        .bind(job.user_enabled)
        .bind(job.next_execution.map(to_millis))
        .bind(job.popped_for_execution.map(to_millis))
        .bind(job.job_execution_id.map(|id| id.to_string()))
        .bind(i64::try_from(job.execution_count).unwrap_or(i64::MAX))
        .bind(job.last_successfully_executed.map(to_millis))
        .bind(job.last_failed_execution.map(to_millis))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                StorageError::DuplicateKey(format!("job: {}/{}", job.application_name, job.name)),
            ),
            Err(e) => Err(StorageError::Other(e.to_string())),
        }
    }

    async fn get_job(&self, tenant_id: &TenantId, id: &JobId) -> Result<Job, StorageError> {
        let row: JobRow = sqlx::query_as(&format!(
            "SELECT {} FROM jobs WHERE id = ? AND tenant_id = ?",
            JOB_COLUMNS
        ))
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?
        .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))?;

        Job::try_from(row)
    }

    async fn find_by_application(&self, application_name: &str) -> Result<Vec<Job>, StorageError> {
        self.fetch_jobs(
            &format!(
                "SELECT {} FROM jobs WHERE application_name = ? ORDER BY bean, method",
                JOB_COLUMNS
            ),
            application_name,
        )
        .await
    }

    async fn find_jobs(
        &self,
        tenant_id: &TenantId,
        filter: &JobFilter,
        page: PageRequest,
    ) -> Result<Vec<Job>, StorageError> {
        let pattern = filter
            .match_text
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(like_pattern);

        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM jobs
            WHERE tenant_id = ?
              AND (? IS NULL OR (bean || '.' || method) LIKE ? ESCAPE '\')
              AND (? = 0 OR (config_enabled = 1 AND user_enabled = 1))
            ORDER BY bean, method
            LIMIT ? OFFSET ?
            "#,
            JOB_COLUMNS
        ))
        .bind(tenant_id.to_string())
        .bind(pattern.as_deref())
        .bind(pattern.as_deref())
        .bind(filter.exclude_disabled)
        .bind(to_i64(page.size))
        .bind(to_i64(page.offset()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn count_jobs(
        &self,
        tenant_id: &TenantId,
        filter: &JobFilter,
    ) -> Result<u64, StorageError> {
        let pattern = filter
            .match_text
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(like_pattern);

        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM jobs
            WHERE tenant_id = ?
              AND (? IS NULL OR (bean || '.' || method) LIKE ? ESCAPE '\')
              AND (? = 0 OR (config_enabled = 1 AND user_enabled = 1))
            "#,
        )
        .bind(tenant_id.to_string())
        .bind(pattern.as_deref())
        .bind(pattern.as_deref())
        .bind(filter.exclude_disabled)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn find_names(&self, application_name: &str) -> Result<HashSet<JobName>, StorageError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT bean, method FROM jobs WHERE application_name = ?")
                .bind(application_name)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::Other(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(bean, method)| JobName::new(bean, method))
            .collect())
    }

    async fn find_config_enabled_by_name(
        &self,
        application_name: &str,
        names: &HashSet<JobName>,
    ) -> Result<Vec<Job>, StorageError> {
        let jobs = self
            .fetch_jobs(
                &format!(
                    "SELECT {} FROM jobs WHERE application_name = ? AND config_enabled = 1",
                    JOB_COLUMNS
                ),
                application_name,
            )
            .await?;
        Ok(jobs.into_iter().filter(|j| names.contains(&j.name)).collect())
    }

    async fn find_config_disabled_by_name(
        &self,
        application_name: &str,
        names: &HashSet<JobName>,
    ) -> Result<Vec<Job>, StorageError> {
        let jobs = self
            .fetch_jobs(
                &format!(
                    "SELECT {} FROM jobs WHERE application_name = ? AND config_enabled != 1",
                    JOB_COLUMNS
                ),
                application_name,
            )
            .await?;
        Ok(jobs.into_iter().filter(|j| names.contains(&j.name)).collect())
    }

    async fn set_config_enabled(
        &self,
        tenant_id: &TenantId,
        id: &JobId,
        enabled: bool,
    ) -> Result<u64, StorageError> {
        let result =
            sqlx::query("UPDATE jobs SET config_enabled = ? WHERE id = ? AND tenant_id = ?")
                .bind(enabled)
                .bind(id.to_string())
                .bind(tenant_id.to_string())
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn set_user_enabled(
        &self,
        tenant_id: &TenantId,
        id: &JobId,
        enabled: bool,
    ) -> Result<u64, StorageError> {
        let result = sqlx::query("UPDATE jobs SET user_enabled = ? WHERE id = ? AND tenant_id = ?")
            .bind(enabled)
            .bind(id.to_string())
            .bind(tenant_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn set_next_execution(
        &self,
        tenant_id: &TenantId,
        id: &JobId,
        next_execution: Option<DateTime<Utc>>,
    ) -> Result<u64, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET next_execution = ?
            WHERE id = ? AND tenant_id = ? AND job_execution_id IS NULL
            "#,
        )
        .bind(next_execution.map(to_millis))
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn clear_running_status(
        &self,
        tenant_id: &TenantId,
        id: &JobId,
    ) -> Result<u64, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET job_execution_id = NULL, popped_for_execution = NULL
            WHERE id = ? AND tenant_id = ?
            "#,
        )
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn delete_job(&self, tenant_id: &TenantId, id: &JobId) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ? AND tenant_id = ?")
            .bind(id.to_string())
            .bind(tenant_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn find_next_execution_time(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        let (next,): (Option<i64>,) = sqlx::query_as(
            r#"
            SELECT MIN(next_execution) FROM jobs
            WHERE config_enabled = 1 AND user_enabled = 1
              AND job_execution_id IS NULL AND next_execution IS NOT NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        from_optional_millis(next)
    }

    async fn pop_for_execution(&self) -> Result<Option<Job>, StorageError> {
        let now = Utc::now();
        let row: Option<JobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE jobs SET job_execution_id = ?, popped_for_execution = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE config_enabled = 1 AND user_enabled = 1
                  AND job_execution_id IS NULL
                  AND next_execution IS NOT NULL AND next_execution <= ?
                ORDER BY next_execution
                LIMIT 1
            )
            AND job_execution_id IS NULL
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(ExecutionId::new().to_string())
        .bind(to_millis(now))
        .bind(to_millis(now))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        row.map(Job::try_from).transpose()
    }

    async fn save_execution(&self, execution: JobExecution) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_executions (id, tenant_id, job_id, success, stack_trace, created_date)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.tenant_id.to_string())
        .bind(execution.job_id.to_string())
        .bind(execution.success)
        .bind(&execution.stack_trace)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                StorageError::DuplicateKey(format!("execution: {}", execution.id)),
            ),
            Err(e) => Err(StorageError::Other(e.to_string())),
        }
    }

    async fn find_executions_by_job(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
        success: Option<bool>,
        page: PageRequest,
    ) -> Result<Vec<JobExecution>, StorageError> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM job_executions
            WHERE tenant_id = ? AND job_id = ? AND (? IS NULL OR success = ?)
            ORDER BY created_date DESC, rowid DESC
            LIMIT ? OFFSET ?
            "#,
            EXECUTION_COLUMNS
        ))
        .bind(tenant_id.to_string())
        .bind(job_id.to_string())
        .bind(success)
        .bind(success)
        .bind(to_i64(page.size))
        .bind(to_i64(page.offset()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        executions_from_rows(rows)
    }

    async fn find_execution(
        &self,
        tenant_id: &TenantId,
        id: &ExecutionId,
    ) -> Result<Option<JobExecution>, StorageError> {
        let row: Option<ExecutionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM job_executions WHERE id = ? AND tenant_id = ?",
            EXECUTION_COLUMNS
        ))
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        row.map(JobExecution::try_from).transpose()
    }

    async fn find_executions(
        &self,
        tenant_id: &TenantId,
        success: Option<bool>,
        page: PageRequest,
    ) -> Result<Vec<JobExecution>, StorageError> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM job_executions
            WHERE tenant_id = ? AND (? IS NULL OR success = ?)
            ORDER BY created_date DESC, rowid DESC
            LIMIT ? OFFSET ?
            "#,
            EXECUTION_COLUMNS
        ))
        .bind(tenant_id.to_string())
        .bind(success)
        .bind(success)
        .bind(to_i64(page.size))
        .bind(to_i64(page.offset()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        executions_from_rows(rows)
    }
}
