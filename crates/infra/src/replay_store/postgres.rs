//! Postgres-backed replay repository.
//!
//! Replays live in the `replay` table and reference a row of `job`, which in
//! turn references `project` (see [`crate::db::SCHEMA`]). Reads join all three
//! tables so a replay comes back with its root job and project in one round trip.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | ReplayStoreError |
//! |------------|----------------------|------------------|
//! | Database (unique violation) on insert | `23505` | `AlreadyExists` |
//! | Database (foreign key violation) on insert | `23503` | `UnknownJob` |
//! | Database (other) | Any other | `Persistence` |
//! | PoolClosed | N/A | `Persistence` |
//! | Other | N/A | `Persistence` |
//!
//! Malformed JSON columns and unknown status literals map to `Serialization`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Row};
use tracing::{instrument, Span};

use replayer_core::{
    JobId, JobSchedule, JobSpec, JobTask, ProjectId, ProjectSpec, ReplayId, ReplayMessage,
    ReplaySpec, ReplayStatus,
};

use super::r#trait::{ReplayRepository, ReplayStoreError};
use super::record::{encode_message, ReplayRecord};
use crate::secrets::{resolve_project_secrets, SecretStore};

const SELECT_REPLAY: &str = r#"
    SELECT
        r.id,
        r.job_id,
        r.start_date,
        r.end_date,
        r.status,
        r.message,
        r.execution_tree,
        r.created_at,
        r.updated_at,
        j.name AS job_name,
        j.version AS job_version,
        j.owner AS job_owner,
        j.spec AS job_spec,
        p.id AS project_id,
        p.name AS project_name,
        p.config AS project_config
    FROM replay r
    JOIN job j ON j.id = r.job_id
    JOIN project p ON p.id = j.project_id
"#;

/// Postgres-backed replay repository.
///
/// `Send + Sync`; clones share the connection pool.
#[derive(Clone)]
pub struct PostgresReplayRepository {
    pool: Arc<PgPool>,
    secrets: Arc<dyn SecretStore>,
}

impl std::fmt::Debug for PostgresReplayRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresReplayRepository").finish_non_exhaustive()
    }
}

impl PostgresReplayRepository {
    pub fn new(pool: PgPool, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            pool: Arc::new(pool),
            secrets,
        }
    }

    /// Insert or refresh a job and its project.
    ///
    /// Replays can only be inserted for jobs that exist here.
    #[instrument(skip(self, job), fields(job_id = %job.id, job_name = %job.name), err)]
    pub async fn upsert_job(&self, job: &JobSpec) -> Result<(), ReplayStoreError> {
        let project_config = serde_json::to_value(&job.project.config)
            .map_err(|e| ReplayStoreError::Serialization(format!("encode project config: {e}")))?;
        let body = serde_json::to_value(JobBody::from(job))
            .map_err(|e| ReplayStoreError::Serialization(format!("encode job spec: {e}")))?;
        let version = job_version_column(job)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO project (id, name, config)
            VALUES ($1, $2, $3)
            ON CONFLICT (id)
            DO UPDATE SET
                name = EXCLUDED.name,
                config = EXCLUDED.config,
                updated_at = NOW()
            "#,
        )
        .bind(job.project.id.as_uuid())
        .bind(&job.project.name)
        .bind(&project_config)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_project", e))?;

        sqlx::query(
            r#"
            INSERT INTO job (id, project_id, name, version, owner, spec)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id)
            DO UPDATE SET
                project_id = EXCLUDED.project_id,
                name = EXCLUDED.name,
                version = EXCLUDED.version,
                owner = EXCLUDED.owner,
                spec = EXCLUDED.spec,
                updated_at = NOW()
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.project.id.as_uuid())
        .bind(&job.name)
        .bind(version)
        .bind(&job.owner)
        .bind(&body)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_job", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    async fn fetch(
        &self,
        operation: &'static str,
        rows: Vec<sqlx::postgres::PgRow>,
        with_secrets: bool,
    ) -> Result<Vec<ReplaySpec>, ReplayStoreError> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let row = ReplayRow::from_row(&row).map_err(|e| {
                ReplayStoreError::Serialization(format!("failed to read replay row in {operation}: {e}"))
            })?;
            let (record, job) = row.into_parts()?;
            let job = if with_secrets {
                resolve_project_secrets(self.secrets.as_ref(), job).await?
            } else {
                job
            };
            out.push(record.into_spec(job)?);
        }
        Span::current().record("replay_count", out.len());
        Ok(out)
    }
}

fn status_literals(statuses: &[ReplayStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait::async_trait]
impl ReplayRepository for PostgresReplayRepository {
    #[instrument(skip(self, replay), fields(replay_id = %replay.id, job_id = %replay.job.id), err)]
    async fn insert(&self, replay: &ReplaySpec) -> Result<(), ReplayStoreError> {
        let record = ReplayRecord::from_spec(replay)?;

        sqlx::query(
            r#"
            INSERT INTO replay (
                id,
                job_id,
                start_date,
                end_date,
                status,
                message,
                execution_tree,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.job_id.as_uuid())
        .bind(record.start_date)
        .bind(record.end_date)
        .bind(&record.status)
        .bind(&record.message)
        .bind(&record.execution_tree)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            match sqlstate(&e).as_deref() {
                Some("23505") => ReplayStoreError::AlreadyExists(record.id),
                Some("23503") => ReplayStoreError::UnknownJob(record.job_id),
                _ => map_sqlx_error("insert_replay", e),
            }
        })?;

        Ok(())
    }

    #[instrument(skip(self), fields(replay_id = %id, replay_count = tracing::field::Empty), err)]
    async fn get_by_id(&self, id: ReplayId) -> Result<ReplaySpec, ReplayStoreError> {
        let sql = format!("{SELECT_REPLAY} WHERE r.id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_by_id", e))?
            .ok_or(ReplayStoreError::NotFound(id))?;

        self.fetch("get_by_id", vec![row], true)
            .await?
            .pop()
            .ok_or(ReplayStoreError::NotFound(id))
    }

    #[instrument(skip(self, message), fields(replay_id = %id, status = %status), err)]
    async fn update_status(
        &self,
        id: ReplayId,
        status: ReplayStatus,
        message: ReplayMessage,
    ) -> Result<(), ReplayStoreError> {
        let message = encode_message(&message)?;

        let result = sqlx::query(
            r#"
            UPDATE replay
            SET status = $2, message = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(&message)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_status", e))?;

        if result.rows_affected() == 0 {
            return Err(ReplayStoreError::NotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(replay_count = tracing::field::Empty), err)]
    async fn get_by_status(
        &self,
        statuses: &[ReplayStatus],
    ) -> Result<Vec<ReplaySpec>, ReplayStoreError> {
        let sql = format!("{SELECT_REPLAY} WHERE r.status = ANY($1) ORDER BY r.created_at, r.id");
        let rows = sqlx::query(&sql)
            .bind(status_literals(statuses))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_by_status", e))?;

        self.fetch("get_by_status", rows, true).await
    }

    #[instrument(skip(self), fields(job_id = %job_id, replay_count = tracing::field::Empty), err)]
    async fn get_by_job_id_and_status(
        &self,
        job_id: JobId,
        statuses: &[ReplayStatus],
    ) -> Result<Vec<ReplaySpec>, ReplayStoreError> {
        let sql = format!(
            "{SELECT_REPLAY} WHERE r.job_id = $1 AND r.status = ANY($2) ORDER BY r.created_at, r.id"
        );
        let rows = sqlx::query(&sql)
            .bind(job_id.as_uuid())
            .bind(status_literals(statuses))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_by_job_id_and_status", e))?;

        self.fetch("get_by_job_id_and_status", rows, false).await
    }
}

/// Map SQLx errors to ReplayStoreError.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ReplayStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            ReplayStoreError::Persistence(format!(
                "database error in {operation} [{code}]: {}",
                db_err.message()
            ))
        }
        sqlx::Error::PoolClosed => {
            ReplayStoreError::Persistence(format!("connection pool closed in {operation}"))
        }
        _ => ReplayStoreError::Persistence(format!("sqlx error in {operation}: {err}")),
    }
}

/// `job.version` as stored in the INTEGER column.
fn job_version_column(job: &JobSpec) -> Result<i32, ReplayStoreError> {
    i32::try_from(job.version).map_err(|_| {
        ReplayStoreError::Serialization(format!(
            "version {} of job {} does not fit the version column",
            job.version, job.id
        ))
    })
}

/// PostgreSQL error code of a database error, if any.
fn sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|c| c.into_owned()),
        _ => None,
    }
}

/// Job fields without a dedicated column, stored as `job.spec`.
#[derive(Debug, Serialize, Deserialize)]
struct JobBody {
    schedule: JobSchedule,
    task: JobTask,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

impl From<&JobSpec> for JobBody {
    fn from(job: &JobSpec) -> Self {
        Self {
            schedule: job.schedule.clone(),
            task: job.task.clone(),
            labels: job.labels.clone(),
            dependencies: job.dependencies.clone(),
        }
    }
}

// SQLx row types

#[derive(Debug)]
struct ReplayRow {
    id: uuid::Uuid,
    job_id: uuid::Uuid,
    start_date: NaiveDate,
    end_date: NaiveDate,
    status: String,
    message: Option<serde_json::Value>,
    execution_tree: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    job_name: String,
    job_version: i32,
    job_owner: String,
    job_spec: serde_json::Value,
    project_id: uuid::Uuid,
    project_name: String,
    project_config: serde_json::Value,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ReplayRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ReplayRow {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            status: row.try_get("status")?,
            message: row.try_get("message")?,
            execution_tree: row.try_get("execution_tree")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            job_name: row.try_get("job_name")?,
            job_version: row.try_get("job_version")?,
            job_owner: row.try_get("job_owner")?,
            job_spec: row.try_get("job_spec")?,
            project_id: row.try_get("project_id")?,
            project_name: row.try_get("project_name")?,
            project_config: row.try_get("project_config")?,
        })
    }
}

impl ReplayRow {
    /// Split into the replay record and its root job (project secrets unresolved).
    fn into_parts(self) -> Result<(ReplayRecord, JobSpec), ReplayStoreError> {
        let body: JobBody = serde_json::from_value(self.job_spec).map_err(|e| {
            ReplayStoreError::Serialization(format!("decode spec of job {}: {e}", self.job_id))
        })?;
        let config: BTreeMap<String, String> = serde_json::from_value(self.project_config)
            .map_err(|e| {
                ReplayStoreError::Serialization(format!(
                    "decode config of project {}: {e}",
                    self.project_id
                ))
            })?;

        let job = JobSpec {
            id: JobId::from_uuid(self.job_id),
            name: self.job_name,
            version: u32::try_from(self.job_version).map_err(|_| {
                ReplayStoreError::Serialization(format!(
                    "job {} has negative version {}",
                    self.job_id, self.job_version
                ))
            })?,
            owner: self.job_owner,
            schedule: body.schedule,
            task: body.task,
            labels: body.labels,
            dependencies: body.dependencies,
            project: ProjectSpec {
                id: ProjectId::from_uuid(self.project_id),
                name: self.project_name,
                config,
                secrets: Vec::new(),
            },
        };

        let record = ReplayRecord {
            id: ReplayId::from_uuid(self.id),
            job_id: JobId::from_uuid(self.job_id),
            start_date: self.start_date,
            end_date: self.end_date,
            status: self.status,
            message: self.message.unwrap_or_else(|| serde_json::json!({})),
            execution_tree: self.execution_tree,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };

        Ok((record, job))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn job_with_version(version: u32) -> JobSpec {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut job = JobSpec::new("ingest", ProjectSpec::new("analytics"), start);
        job.version = version;
        job
    }

    #[test]
    fn job_version_within_column_range_is_stored_as_is() {
        assert_eq!(job_version_column(&job_with_version(7)).unwrap(), 7);
        assert_eq!(
            job_version_column(&job_with_version(i32::MAX as u32)).unwrap(),
            i32::MAX
        );
    }

    #[test]
    fn job_version_beyond_column_range_is_rejected() {
        let job = job_with_version(u32::MAX);
        let err = job_version_column(&job).unwrap_err();
        assert!(matches!(err, ReplayStoreError::Serialization(ref msg) if msg.contains(&job.id.to_string())));

        let err = job_version_column(&job_with_version(i32::MAX as u32 + 1)).unwrap_err();
        assert!(matches!(err, ReplayStoreError::Serialization(_)));
    }
}
