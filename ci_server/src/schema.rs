//! Diesel table definitions.
//!
//! Tables: build_definitions, user_variables, build_executions.

diesel::table! {
    build_definitions (id) {
        id -> Int8,
        token -> Varchar,
        caption -> Varchar,
        content -> Text,
        created_by -> Int8,
        edited_by -> Int8,
        created_at -> Timestamptz,
        edited_at -> Timestamptz,
        deleted -> Bool,
    }
}

diesel::table! {
    user_variables (id) {
        id -> Int8,
        user_id -> Nullable<Int8>,
        name -> Varchar,
        value -> Text,
        public -> Bool,
    }
}

diesel::table! {
    build_executions (id) {
        id -> Int8,
        definition_id -> Int8,
        user_id -> Nullable<Int8>,
        report -> Text,
        status -> Varchar,
        artifact_path -> Nullable<Text>,
        execution_time -> Float8,
        executed_at -> Timestamptz,
    }
}

diesel::joinable!(build_executions -> build_definitions (definition_id));

diesel::allow_tables_to_appear_in_same_query!(build_definitions, user_variables, build_executions);
