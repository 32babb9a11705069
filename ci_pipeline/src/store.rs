//! Narrow persistence interface used by the orchestrator and the server.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::build::BuildStatus;
use crate::variables::UserVariable;

/// Stored pipeline configuration. `content` is the raw document before
/// variable substitution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildDefinition {
    pub id: i64,
    /// Webhook credential.
    pub token: String,
    pub caption: String,
    pub content: String,
    pub created_by: i64,
    pub edited_by: i64,
    pub created_at: DateTime<Utc>,
    pub edited_at: DateTime<Utc>,
    pub deleted: bool,
}

/// Write-once record of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildExecution {
    pub id: i64,
    pub definition_id: i64,
    /// `None` for webhook-triggered runs.
    pub user_id: Option<i64>,
    pub report: String,
    pub status: BuildStatus,
    pub artifact_path: Option<String>,
    /// Seconds.
    pub execution_time: f64,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBuildExecution {
    pub definition_id: i64,
    pub user_id: Option<i64>,
    pub report: String,
    pub status: BuildStatus,
    pub artifact_path: Option<String>,
    pub execution_time: f64,
    pub executed_at: DateTime<Utc>,
}

#[async_trait]
pub trait BuildStore: Send + Sync {
    /// Live (not soft-deleted) definition by webhook token.
    async fn definition_by_token(&self, token: &str) -> anyhow::Result<Option<BuildDefinition>>;

    /// Live definition by id.
    async fn definition(&self, id: i64) -> anyhow::Result<Option<BuildDefinition>>;

    /// Variables visible to `user_id`: their own first, then public ones.
    async fn variables_for(&self, user_id: i64) -> anyhow::Result<Vec<UserVariable>>;

    async fn create_execution(&self, execution: NewBuildExecution) -> anyhow::Result<BuildExecution>;

    async fn execution(&self, id: i64) -> anyhow::Result<Option<BuildExecution>>;

    /// Newest first, optionally restricted to one definition.
    async fn executions(
        &self,
        definition_id: Option<i64>,
        limit: usize,
    ) -> anyhow::Result<Vec<BuildExecution>>;
}

#[derive(Default)]
struct MemoryState {
    definitions: Vec<BuildDefinition>,
    variables: Vec<UserVariable>,
    executions: HashMap<i64, BuildExecution>,
    next_execution_id: i64,
}

/// In-process store for tests and database-less runs.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a definition owned by `created_by`. A random token is generated
    /// when none is given.
    pub async fn insert_definition(
        &self,
        caption: &str,
        content: &str,
        created_by: i64,
        token: Option<&str>,
    ) -> BuildDefinition {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let definition = BuildDefinition {
            id: state.definitions.len() as i64 + 1,
            token: token
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()),
            caption: caption.to_string(),
            content: content.to_string(),
            created_by,
            edited_by: created_by,
            created_at: now,
            edited_at: now,
            deleted: false,
        };
        state.definitions.push(definition.clone());
        definition
    }

    pub async fn delete_definition(&self, id: i64) {
        let mut state = self.state.write().await;
        if let Some(definition) = state.definitions.iter_mut().find(|d| d.id == id) {
            definition.deleted = true;
        }
    }

    /// `user_id: None` with `public: true` makes a global variable.
    pub async fn insert_variable(
        &self,
        user_id: Option<i64>,
        name: &str,
        value: &str,
        public: bool,
    ) -> UserVariable {
        let mut state = self.state.write().await;
        let variable = UserVariable {
            id: state.variables.len() as i64 + 1,
            user_id,
            name: name.to_string(),
            value: value.to_string(),
            public,
        };
        state.variables.push(variable.clone());
        variable
    }
}

#[async_trait]
impl BuildStore for MemoryStore {
    async fn definition_by_token(&self, token: &str) -> anyhow::Result<Option<BuildDefinition>> {
        let state = self.state.read().await;
        Ok(state
            .definitions
            .iter()
            .find(|d| !d.deleted && d.token == token)
            .cloned())
    }

    async fn definition(&self, id: i64) -> anyhow::Result<Option<BuildDefinition>> {
        let state = self.state.read().await;
        Ok(state
            .definitions
            .iter()
            .find(|d| !d.deleted && d.id == id)
            .cloned())
    }

    async fn variables_for(&self, user_id: i64) -> anyhow::Result<Vec<UserVariable>> {
        let state = self.state.read().await;
        let own = state
            .variables
            .iter()
            .filter(|v| v.user_id == Some(user_id));
        let public = state
            .variables
            .iter()
            .filter(|v| v.public && v.user_id != Some(user_id));
        Ok(own.chain(public).cloned().collect())
    }

    async fn create_execution(&self, execution: NewBuildExecution) -> anyhow::Result<BuildExecution> {
        let mut state = self.state.write().await;
        state.next_execution_id += 1;
        let record = BuildExecution {
            id: state.next_execution_id,
            definition_id: execution.definition_id,
            user_id: execution.user_id,
            report: execution.report,
            status: execution.status,
            artifact_path: execution.artifact_path,
            execution_time: execution.execution_time,
            executed_at: execution.executed_at,
        };
        state.executions.insert(record.id, record.clone());
        Ok(record)
    }

    async fn execution(&self, id: i64) -> anyhow::Result<Option<BuildExecution>> {
        Ok(self.state.read().await.executions.get(&id).cloned())
    }

    async fn executions(
        &self,
        definition_id: Option<i64>,
        limit: usize,
    ) -> anyhow::Result<Vec<BuildExecution>> {
        let state = self.state.read().await;
        let mut records: Vec<BuildExecution> = state
            .executions
            .values()
            .filter(|e| definition_id.is_none_or(|id| e.definition_id == id))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.id.cmp(&a.id));
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution(definition_id: i64) -> NewBuildExecution {
        NewBuildExecution {
            definition_id,
            user_id: None,
            report: "==> setup\n".to_string(),
            status: BuildStatus::Succeeded,
            artifact_path: None,
            execution_time: 1.5,
            executed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn deleted_definitions_are_invisible() {
        let store = MemoryStore::new();
        let def = store.insert_definition("app", "build: [make]", 1, Some("tok")).await;
        assert!(store.definition_by_token("tok").await.unwrap().is_some());

        store.delete_definition(def.id).await;
        assert!(store.definition_by_token("tok").await.unwrap().is_none());
        assert!(store.definition(def.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn generated_tokens_are_unique() {
        let store = MemoryStore::new();
        let a = store.insert_definition("a", "", 1, None).await;
        let b = store.insert_definition("b", "", 1, None).await;
        assert_ne!(a.token, b.token);
        assert_eq!(a.token.len(), 32);
    }

    #[tokio::test]
    async fn own_variables_come_before_public_ones() {
        let store = MemoryStore::new();
        store.insert_variable(None, "host", "global.example.com", true).await;
        store.insert_variable(Some(2), "secret", "other-user", false).await;
        store.insert_variable(Some(1), "host", "mine.example.com", false).await;

        let vars = store.variables_for(1).await.unwrap();
        let pairs: Vec<_> = vars.iter().map(UserVariable::pair).collect();
        assert_eq!(
            pairs,
            vec![("host", "mine.example.com"), ("host", "global.example.com")]
        );
    }

    #[tokio::test]
    async fn executions_are_listed_newest_first() {
        let store = MemoryStore::new();
        let first = store.create_execution(execution(1)).await.unwrap();
        store.create_execution(execution(2)).await.unwrap();
        let third = store.create_execution(execution(1)).await.unwrap();

        let listed = store.executions(Some(1), 10).await.unwrap();
        let ids: Vec<i64> = listed.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![third.id, first.id]);

        assert_eq!(store.executions(None, 2).await.unwrap().len(), 2);
        assert_eq!(
            store.execution(first.id).await.unwrap().unwrap().report,
            "==> setup\n"
        );
    }
}
