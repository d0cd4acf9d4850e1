//! Database wiring: connection pool and schema bootstrap.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::replay_store::postgres::map_sqlx_error;
use crate::replay_store::ReplayStoreError;

/// Tables used by the Postgres replay repository. Every statement is idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS project (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    config JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS job (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL REFERENCES project (id),
    name TEXT NOT NULL,
    version INTEGER NOT NULL CHECK (version >= 0),
    owner TEXT NOT NULL DEFAULT '',
    spec JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (project_id, name)
);

CREATE TABLE IF NOT EXISTS replay (
    id UUID PRIMARY KEY,
    job_id UUID NOT NULL REFERENCES job (id),
    start_date DATE NOT NULL,
    end_date DATE NOT NULL,
    status TEXT NOT NULL,
    message JSONB NOT NULL DEFAULT '{}'::jsonb,
    execution_tree JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CHECK (end_date >= start_date)
);

CREATE INDEX IF NOT EXISTS replay_status_idx ON replay (status);
CREATE INDEX IF NOT EXISTS replay_job_status_idx ON replay (job_id, status);
"#;

/// Open a connection pool.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, ReplayStoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))?;

    info!(max_connections = config.max_connections, "connected to replay database");
    Ok(pool)
}

/// Create the replay tables if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), ReplayStoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;
    Ok(())
}
