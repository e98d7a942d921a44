use sea_query::{Expr, Func, OnConflict, Order, Query, SqliteQueryBuilder};

use crate::schema::Categories;

/// INSERT INTO categories (name, remote_path) VALUES (?, ?) ON CONFLICT DO NOTHING
pub fn insert_or_ignore(name: &str, remote_path: &str) -> String {
    Query::insert()
        .into_table(Categories::Table)
        .columns([Categories::Name, Categories::RemotePath])
        .values_panic([name.into(), remote_path.into()])
        .on_conflict(OnConflict::new().do_nothing().to_owned())
        .to_string(SqliteQueryBuilder)
}

/// SELECT id FROM categories WHERE name = ?
pub fn select_id_by_name(name: &str) -> String {
    Query::select()
        .column(Categories::Id)
        .from(Categories::Table)
        .and_where(Expr::col(Categories::Name).eq(name))
        .to_string(SqliteQueryBuilder)
}

/// SELECT name FROM categories WHERE id = ?
pub fn select_name_by_id(id: i64) -> String {
    Query::select()
        .column(Categories::Name)
        .from(Categories::Table)
        .and_where(Expr::col(Categories::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// SELECT COUNT(*) FROM categories
pub fn count() -> String {
    Query::select()
        .expr(Func::count(Expr::col(Categories::Id)))
        .from(Categories::Table)
        .to_string(SqliteQueryBuilder)
}

/// SELECT c.id, c.name,
///        (SELECT COUNT(*) FROM collections WHERE category_id = c.id) AS collection_count,
///        (SELECT COUNT(*) FROM tracks t JOIN collections col ON t.collection_id = col.id
///         WHERE col.category_id = c.id) AS track_count
/// FROM categories c ORDER BY c.name
pub fn select_all_with_counts() -> String {
    Query::select()
        .column(Categories::Id)
        .column(Categories::Name)
        .expr_as(
            Expr::cust(
                "(SELECT COUNT(*) FROM collections WHERE collections.category_id = categories.id)",
            ),
            sea_query::Alias::new("collection_count"),
        )
        .expr_as(
            Expr::cust(
                "(SELECT COUNT(*) FROM tracks JOIN collections ON tracks.collection_id = collections.id \
                 WHERE collections.category_id = categories.id)",
            ),
            sea_query::Alias::new("track_count"),
        )
        .from(Categories::Table)
        .order_by(Categories::Name, Order::Asc)
        .to_string(SqliteQueryBuilder)
}
