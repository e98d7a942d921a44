use sea_query::{Expr, Func, LikeExpr, OnConflict, Order, Query, SqliteQueryBuilder};

use crate::schema::{Categories, Collections};

fn all_columns() -> [Collections; 7] {
    [
        Collections::Id,
        Collections::CategoryId,
        Collections::Name,
        Collections::RemotePath,
        Collections::ArtUrl,
        Collections::TrackCount,
        Collections::CrawledAt,
    ]
}

/// INSERT INTO collections (category_id, name, remote_path) VALUES (?, ?, ?) ON CONFLICT DO NOTHING
pub fn insert_or_ignore(category_id: i64, name: &str, remote_path: &str) -> String {
    Query::insert()
        .into_table(Collections::Table)
        .columns([
            Collections::CategoryId,
            Collections::Name,
            Collections::RemotePath,
        ])
        .values_panic([category_id.into(), name.into(), remote_path.into()])
        .on_conflict(OnConflict::new().do_nothing().to_owned())
        .to_string(SqliteQueryBuilder)
}

/// SELECT id FROM collections WHERE remote_path = ?
pub fn select_id_by_remote_path(remote_path: &str) -> String {
    Query::select()
        .column(Collections::Id)
        .from(Collections::Table)
        .and_where(Expr::col(Collections::RemotePath).eq(remote_path))
        .to_string(SqliteQueryBuilder)
}

/// SELECT id, category_id, name, remote_path, art_url, track_count, crawled_at FROM collections WHERE id = ?
pub fn select_by_id(id: i64) -> String {
    Query::select()
        .columns(all_columns())
        .from(Collections::Table)
        .and_where(Expr::col(Collections::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// SELECT art_url FROM collections WHERE id = ?
pub fn select_art_url(id: i64) -> String {
    Query::select()
        .column(Collections::ArtUrl)
        .from(Collections::Table)
        .and_where(Expr::col(Collections::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE collections SET art_url = ? WHERE id = ? AND art_url IS NULL
pub fn set_art_if_unset(id: i64, art_url: &str) -> String {
    Query::update()
        .table(Collections::Table)
        .value(Collections::ArtUrl, art_url)
        .and_where(Expr::col(Collections::Id).eq(id))
        .and_where(Expr::col(Collections::ArtUrl).is_null())
        .to_string(SqliteQueryBuilder)
}

/// UPDATE collections
/// SET track_count = (SELECT COUNT(*) FROM tracks WHERE collection_id = ?), crawled_at = ?
/// WHERE id = ?
pub fn refresh_track_count(id: i64, crawled_at: &str) -> String {
    Query::update()
        .table(Collections::Table)
        .value(
            Collections::TrackCount,
            Expr::cust(format!(
                "(SELECT COUNT(*) FROM tracks WHERE tracks.collection_id = {})",
                id
            )),
        )
        .value(Collections::CrawledAt, crawled_at)
        .and_where(Expr::col(Collections::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// SELECT COUNT(*) FROM collections
pub fn count() -> String {
    Query::select()
        .expr(Func::count(Expr::col(Collections::Id)))
        .from(Collections::Table)
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM collections
/// [WHERE category_id IN (SELECT id FROM categories WHERE name = ?)] [AND name LIKE '%q%']
/// ORDER BY name LIMIT ? OFFSET ?
pub fn select_filtered(
    category: Option<&str>,
    name_contains: Option<&str>,
    offset: u64,
    limit: u64,
) -> String {
    let mut query = Query::select();
    query.columns(all_columns()).from(Collections::Table);

    if let Some(category) = category {
        query.and_where(
            Expr::col(Collections::CategoryId).in_subquery(
                Query::select()
                    .column(Categories::Id)
                    .from(Categories::Table)
                    .and_where(Expr::col(Categories::Name).eq(category))
                    .to_owned(),
            ),
        );
    }

    if let Some(q) = name_contains {
        let pattern = format!("%{}%", escape_like(q));
        query.and_where(Expr::col(Collections::Name).like(LikeExpr::new(pattern).escape('\\')));
    }

    query
        .order_by(Collections::Name, Order::Asc)
        .limit(limit)
        .offset(offset)
        .to_string(SqliteQueryBuilder)
}

/// Make `%` and `_` match literally inside a LIKE pattern escaped with a backslash
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
