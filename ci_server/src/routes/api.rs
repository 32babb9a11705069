//! REST API for manual triggers and execution records.

use serde::Deserialize;

use shipyard_pipeline::{BuildExecution, Trigger};

use super::AppState;

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub definition_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ListBuildsQuery {
    pub definition_id: Option<i64>,
    pub limit: Option<usize>,
}

/// Restart a definition by hand. `Ok(None)` when the definition is unknown.
pub async fn trigger_build(
    state: &AppState,
    req: TriggerRequest,
) -> anyhow::Result<Option<String>> {
    let Some(definition) = state.pipeline.store().definition(req.definition_id).await? else {
        return Ok(None);
    };

    state.pipeline.dispatch(
        definition,
        Trigger::Manual {
            user_id: req.user_id,
        },
    );
    tracing::info!(
        definition_id = req.definition_id,
        user_id = req.user_id,
        "Build dispatched manually"
    );
    Ok(Some(format!(
        "build of definition {} dispatched",
        req.definition_id
    )))
}

pub async fn list_builds(
    state: &AppState,
    query: ListBuildsQuery,
) -> anyhow::Result<Vec<BuildExecution>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    state
        .pipeline
        .store()
        .executions(query.definition_id, limit)
        .await
}

pub async fn get_build(state: &AppState, id: i64) -> anyhow::Result<Option<BuildExecution>> {
    state.pipeline.store().execution(id).await
}
