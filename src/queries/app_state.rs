use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};

use crate::schema::AppState;

/// SELECT value FROM app_state WHERE key = ?
pub fn select_by_key(key: &str) -> String {
    Query::select()
        .column(AppState::Value)
        .from(AppState::Table)
        .and_where(Expr::col(AppState::Key).eq(key))
        .to_string(SqliteQueryBuilder)
}

/// INSERT INTO app_state (key, value) VALUES (?, ?)
pub fn insert(key: &str, value: &str) -> String {
    Query::insert()
        .into_table(AppState::Table)
        .columns([AppState::Key, AppState::Value])
        .values_panic([key.into(), value.into()])
        .to_string(SqliteQueryBuilder)
}

/// INSERT INTO app_state (key, value) VALUES (?, ?) ON CONFLICT (key) DO UPDATE SET value = excluded.value
pub fn upsert(key: &str, value: &str) -> String {
    Query::insert()
        .into_table(AppState::Table)
        .columns([AppState::Key, AppState::Value])
        .values_panic([key.into(), value.into()])
        .on_conflict(
            OnConflict::column(AppState::Key)
                .update_column(AppState::Value)
                .to_owned(),
        )
        .to_string(SqliteQueryBuilder)
}
