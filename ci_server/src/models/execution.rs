use chrono::{DateTime, Utc};
use diesel::prelude::*;

use shipyard_pipeline::{BuildExecution, BuildStatus, NewBuildExecution};

use crate::schema::build_executions;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = build_executions)]
pub struct ExecutionRow {
    pub id: i64,
    pub definition_id: i64,
    pub user_id: Option<i64>,
    pub report: String,
    pub status: String,
    pub artifact_path: Option<String>,
    pub execution_time: f64,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = build_executions)]
pub struct NewExecutionRow {
    pub definition_id: i64,
    pub user_id: Option<i64>,
    pub report: String,
    pub status: String,
    pub artifact_path: Option<String>,
    pub execution_time: f64,
    pub executed_at: DateTime<Utc>,
}

impl From<NewBuildExecution> for NewExecutionRow {
    fn from(execution: NewBuildExecution) -> Self {
        NewExecutionRow {
            definition_id: execution.definition_id,
            user_id: execution.user_id,
            report: execution.report,
            status: execution.status.as_str().to_string(),
            artifact_path: execution.artifact_path,
            execution_time: execution.execution_time,
            executed_at: execution.executed_at,
        }
    }
}

impl TryFrom<ExecutionRow> for BuildExecution {
    type Error = anyhow::Error;

    fn try_from(row: ExecutionRow) -> anyhow::Result<Self> {
        let status: BuildStatus = row.status.parse().map_err(anyhow::Error::msg)?;
        Ok(BuildExecution {
            id: row.id,
            definition_id: row.definition_id,
            user_id: row.user_id,
            report: row.report,
            status,
            artifact_path: row.artifact_path,
            execution_time: row.execution_time,
            executed_at: row.executed_at,
        })
    }
}
