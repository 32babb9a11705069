//! Idempotent start-up migration.

use diesel_async::AsyncPgConnection;
use diesel_async::SimpleAsyncConnection;

pub const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS build_definitions (
    id              BIGSERIAL PRIMARY KEY,
    token           VARCHAR(64) NOT NULL UNIQUE,
    caption         VARCHAR(255) NOT NULL,
    content         TEXT NOT NULL,
    created_by      BIGINT NOT NULL,
    edited_by       BIGINT NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    edited_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    deleted         BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE INDEX IF NOT EXISTS idx_build_definitions_token ON build_definitions (token);

CREATE TABLE IF NOT EXISTS user_variables (
    id              BIGSERIAL PRIMARY KEY,
    user_id         BIGINT,
    name            VARCHAR(255) NOT NULL,
    value           TEXT NOT NULL,
    public          BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE INDEX IF NOT EXISTS idx_user_variables_user ON user_variables (user_id);

CREATE TABLE IF NOT EXISTS build_executions (
    id              BIGSERIAL PRIMARY KEY,
    definition_id   BIGINT NOT NULL REFERENCES build_definitions(id) ON DELETE CASCADE,
    user_id         BIGINT,
    report          TEXT NOT NULL,
    status          VARCHAR(32) NOT NULL,
    artifact_path   TEXT,
    execution_time  DOUBLE PRECISION NOT NULL,
    executed_at     TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_build_executions_definition ON build_executions (definition_id);
CREATE INDEX IF NOT EXISTS idx_build_executions_executed ON build_executions (executed_at DESC);
"#;

/// Run the migration.
pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL)
        .await
        .map_err(|e| anyhow::anyhow!("migration failed: {e}"))?;
    Ok(())
}
