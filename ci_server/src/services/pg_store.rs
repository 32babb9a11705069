//! PostgreSQL implementation of the pipeline's persistence interface.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use shipyard_pipeline::variables::UserVariable;
use shipyard_pipeline::{BuildDefinition, BuildExecution, BuildStore, NewBuildExecution};

use crate::models::definition::DefinitionRow;
use crate::models::execution::{ExecutionRow, NewExecutionRow};
use crate::models::variable::VariableRow;
use crate::schema::{build_definitions, build_executions, user_variables};

pub type PgPool = Pool<AsyncPgConnection>;

pub fn create_pool(database_url: &str, max_connections: usize) -> anyhow::Result<PgPool> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    Ok(Pool::builder(manager).max_size(max_connections).build()?)
}

/// Find a live definition by its webhook token.
pub async fn find_by_token(
    conn: &mut AsyncPgConnection,
    token: &str,
) -> anyhow::Result<Option<DefinitionRow>> {
    let result = build_definitions::table
        .filter(build_definitions::token.eq(token))
        .filter(build_definitions::deleted.eq(false))
        .select(DefinitionRow::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(result)
}

pub async fn find_definition(
    conn: &mut AsyncPgConnection,
    id: i64,
) -> anyhow::Result<Option<DefinitionRow>> {
    let result = build_definitions::table
        .find(id)
        .filter(build_definitions::deleted.eq(false))
        .select(DefinitionRow::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(result)
}

/// The user's own variables followed by everyone's public ones.
pub async fn variables_for(
    conn: &mut AsyncPgConnection,
    user_id: i64,
) -> anyhow::Result<Vec<VariableRow>> {
    let mut rows: Vec<VariableRow> = user_variables::table
        .filter(user_variables::user_id.eq(user_id))
        .order(user_variables::id.asc())
        .select(VariableRow::as_select())
        .load(conn)
        .await?;

    let public: Vec<VariableRow> = user_variables::table
        .filter(user_variables::public.eq(true))
        .filter(user_variables::user_id.is_distinct_from(user_id))
        .order(user_variables::id.asc())
        .select(VariableRow::as_select())
        .load(conn)
        .await?;

    rows.extend(public);
    Ok(rows)
}

pub async fn insert_execution(
    conn: &mut AsyncPgConnection,
    execution: NewExecutionRow,
) -> anyhow::Result<ExecutionRow> {
    let row = diesel::insert_into(build_executions::table)
        .values(&execution)
        .returning(ExecutionRow::as_returning())
        .get_result(conn)
        .await?;
    Ok(row)
}

pub async fn find_execution(
    conn: &mut AsyncPgConnection,
    id: i64,
) -> anyhow::Result<Option<ExecutionRow>> {
    let result = build_executions::table
        .find(id)
        .select(ExecutionRow::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(result)
}

/// Newest first.
pub async fn list_executions(
    conn: &mut AsyncPgConnection,
    definition_id: Option<i64>,
    limit: i64,
) -> anyhow::Result<Vec<ExecutionRow>> {
    let mut query = build_executions::table
        .select(ExecutionRow::as_select())
        .into_boxed();
    if let Some(id) = definition_id {
        query = query.filter(build_executions::definition_id.eq(id));
    }
    let rows = query
        .order(build_executions::id.desc())
        .limit(limit)
        .load(conn)
        .await?;
    Ok(rows)
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn conn(
        &self,
    ) -> anyhow::Result<diesel_async::pooled_connection::deadpool::Object<AsyncPgConnection>> {
        self.pool
            .get()
            .await
            .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))
    }
}

#[async_trait]
impl BuildStore for PgStore {
    async fn definition_by_token(&self, token: &str) -> anyhow::Result<Option<BuildDefinition>> {
        let mut conn = self.conn().await?;
        Ok(find_by_token(&mut conn, token).await?.map(Into::into))
    }

    async fn definition(&self, id: i64) -> anyhow::Result<Option<BuildDefinition>> {
        let mut conn = self.conn().await?;
        Ok(find_definition(&mut conn, id).await?.map(Into::into))
    }

    async fn variables_for(&self, user_id: i64) -> anyhow::Result<Vec<UserVariable>> {
        let mut conn = self.conn().await?;
        let rows = variables_for(&mut conn, user_id).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create_execution(&self, execution: NewBuildExecution) -> anyhow::Result<BuildExecution> {
        let mut conn = self.conn().await?;
        let row = insert_execution(&mut conn, execution.into()).await?;
        tracing::info!(
            execution_id = row.id,
            definition_id = row.definition_id,
            status = %row.status,
            "Build execution recorded"
        );
        row.try_into()
    }

    async fn execution(&self, id: i64) -> anyhow::Result<Option<BuildExecution>> {
        let mut conn = self.conn().await?;
        find_execution(&mut conn, id)
            .await?
            .map(BuildExecution::try_from)
            .transpose()
    }

    async fn executions(
        &self,
        definition_id: Option<i64>,
        limit: usize,
    ) -> anyhow::Result<Vec<BuildExecution>> {
        let mut conn = self.conn().await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        list_executions(&mut conn, definition_id, limit)
            .await?
            .into_iter()
            .map(BuildExecution::try_from)
            .collect()
    }
}
