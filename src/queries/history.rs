use sea_query::{Expr, Func, Order, Query, SqliteQueryBuilder};

use crate::schema::ShuffleHistory;

/// INSERT INTO shuffle_history (track_id, played_at) VALUES (?, ?)
pub fn insert(track_id: i64, played_at: &str) -> String {
    Query::insert()
        .into_table(ShuffleHistory::Table)
        .columns([ShuffleHistory::TrackId, ShuffleHistory::PlayedAt])
        .values_panic([track_id.into(), played_at.into()])
        .to_string(SqliteQueryBuilder)
}

/// SELECT id FROM shuffle_history WHERE id < ? ORDER BY id DESC LIMIT 1
pub fn select_previous_id(before_id: i64) -> String {
    Query::select()
        .column(ShuffleHistory::Id)
        .from(ShuffleHistory::Table)
        .and_where(Expr::col(ShuffleHistory::Id).lt(before_id))
        .order_by(ShuffleHistory::Id, Order::Desc)
        .limit(1)
        .to_string(SqliteQueryBuilder)
}

/// SELECT MAX(id) FROM shuffle_history
pub fn select_max_id() -> String {
    Query::select()
        .expr(Func::max(Expr::col(ShuffleHistory::Id)))
        .from(ShuffleHistory::Table)
        .to_string(SqliteQueryBuilder)
}

/// SELECT COUNT(*) FROM shuffle_history
pub fn count() -> String {
    Query::select()
        .expr(Func::count(Expr::col(ShuffleHistory::Id)))
        .from(ShuffleHistory::Table)
        .to_string(SqliteQueryBuilder)
}
