use chrono::{DateTime, Utc};
use diesel::prelude::*;

use shipyard_pipeline::BuildDefinition;

use crate::schema::build_definitions;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = build_definitions)]
pub struct DefinitionRow {
    pub id: i64,
    pub token: String,
    pub caption: String,
    pub content: String,
    pub created_by: i64,
    pub edited_by: i64,
    pub created_at: DateTime<Utc>,
    pub edited_at: DateTime<Utc>,
    pub deleted: bool,
}

impl From<DefinitionRow> for BuildDefinition {
    fn from(row: DefinitionRow) -> Self {
        BuildDefinition {
            id: row.id,
            token: row.token,
            caption: row.caption,
            content: row.content,
            created_by: row.created_by,
            edited_by: row.edited_by,
            created_at: row.created_at,
            edited_at: row.edited_at,
            deleted: row.deleted,
        }
    }
}
