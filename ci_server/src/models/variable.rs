use diesel::prelude::*;

use shipyard_pipeline::variables::UserVariable;

use crate::schema::user_variables;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = user_variables)]
pub struct VariableRow {
    pub id: i64,
    pub user_id: Option<i64>,
    pub name: String,
    pub value: String,
    pub public: bool,
}

impl From<VariableRow> for UserVariable {
    fn from(row: VariableRow) -> Self {
        UserVariable {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            value: row.value,
            public: row.public,
        }
    }
}
