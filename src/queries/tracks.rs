use sea_query::{Expr, Func, OnConflict, Order, Query, SqliteQueryBuilder, Value};

use crate::constants::UNSUPPORTED_EXTENSIONS;
use crate::models::{NewTrack, TrackSource};
use crate::schema::{ShuffleHistory, Tracks};

fn all_columns() -> [Tracks; 12] {
    [
        Tracks::Id,
        Tracks::CollectionId,
        Tracks::Filename,
        Tracks::Title,
        Tracks::RemoteUrl,
        Tracks::Format,
        Tracks::SourceType,
        Tracks::SourceZipUrl,
        Tracks::PathInZip,
        Tracks::FileSize,
        Tracks::Upvoted,
        Tracks::PlayCount,
    ]
}

/// INSERT INTO tracks (collection_id, filename, title, remote_url, format, source_type,
///                     source_zip_url, path_in_zip, file_size)
/// VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) ON CONFLICT DO NOTHING
///
/// The unique remote_url makes a re-crawl of the same file a no-op.
pub fn insert_or_ignore(track: &NewTrack) -> String {
    let (zip_url, path_in_zip): (Value, Value) = match &track.source {
        TrackSource::Direct => (Option::<String>::None.into(), Option::<String>::None.into()),
        TrackSource::Archived(member) => (
            member.archive_url.as_str().into(),
            member.entry_path.as_str().into(),
        ),
    };

    Query::insert()
        .into_table(Tracks::Table)
        .columns([
            Tracks::CollectionId,
            Tracks::Filename,
            Tracks::Title,
            Tracks::RemoteUrl,
            Tracks::Format,
            Tracks::SourceType,
            Tracks::SourceZipUrl,
            Tracks::PathInZip,
            Tracks::FileSize,
        ])
        .values_panic([
            track.collection_id.into(),
            track.filename.as_str().into(),
            track.title.as_str().into(),
            track.remote_url().into(),
            track.format.as_str().into(),
            track.source.kind().into(),
            zip_url.into(),
            path_in_zip.into(),
            track.file_size.into(),
        ])
        .on_conflict(OnConflict::new().do_nothing().to_owned())
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM tracks WHERE id = ?
pub fn select_by_id(id: i64) -> String {
    Query::select()
        .columns(all_columns())
        .from(Tracks::Table)
        .and_where(Expr::col(Tracks::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM tracks WHERE remote_url = ?
pub fn select_by_remote_url(remote_url: &str) -> String {
    Query::select()
        .columns(all_columns())
        .from(Tracks::Table)
        .and_where(Expr::col(Tracks::RemoteUrl).eq(remote_url))
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM tracks WHERE collection_id = ? ORDER BY filename
pub fn select_by_collection(collection_id: i64) -> String {
    Query::select()
        .columns(all_columns())
        .from(Tracks::Table)
        .and_where(Expr::col(Tracks::CollectionId).eq(collection_id))
        .order_by(Tracks::Filename, Order::Asc)
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM tracks WHERE id = (SELECT track_id FROM shuffle_history WHERE id = ?)
pub fn select_by_history_entry(history_id: i64) -> String {
    Query::select()
        .columns(all_columns())
        .from(Tracks::Table)
        .and_where(
            Expr::col(Tracks::Id).in_subquery(
                Query::select()
                    .column(ShuffleHistory::TrackId)
                    .from(ShuffleHistory::Table)
                    .and_where(Expr::col(ShuffleHistory::Id).eq(history_id))
                    .to_owned(),
            ),
        )
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM tracks
/// WHERE format NOT IN (<unsupported>)
///   [AND collection_id <> ?]
///   [AND id NOT IN (SELECT track_id FROM shuffle_history ORDER BY id DESC LIMIT ?)]
/// ORDER BY RANDOM() LIMIT 1
pub fn select_random_candidate(
    exclude_collection: Option<i64>,
    recent_window: Option<u32>,
) -> String {
    let mut query = Query::select();
    query
        .columns(all_columns())
        .from(Tracks::Table)
        .and_where(Expr::col(Tracks::Format).is_not_in(UNSUPPORTED_EXTENSIONS.iter().copied()));

    if let Some(collection_id) = exclude_collection {
        query.and_where(Expr::col(Tracks::CollectionId).ne(collection_id));
    }

    if let Some(window) = recent_window {
        query.and_where(
            Expr::col(Tracks::Id).not_in_subquery(
                Query::select()
                    .column(ShuffleHistory::TrackId)
                    .from(ShuffleHistory::Table)
                    .order_by(ShuffleHistory::Id, Order::Desc)
                    .limit(window as u64)
                    .to_owned(),
            ),
        );
    }

    query
        .order_by_expr(Expr::cust("RANDOM()"), Order::Asc)
        .limit(1)
        .to_string(SqliteQueryBuilder)
}

/// UPDATE tracks SET play_count = play_count + 1 WHERE id = ?
pub fn increment_play_count(id: i64) -> String {
    Query::update()
        .table(Tracks::Table)
        .value(Tracks::PlayCount, Expr::col(Tracks::PlayCount).add(1))
        .and_where(Expr::col(Tracks::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// SELECT COUNT(*) FROM tracks
pub fn count() -> String {
    Query::select()
        .expr(Func::count(Expr::col(Tracks::Id)))
        .from(Tracks::Table)
        .to_string(SqliteQueryBuilder)
}

/// SELECT COUNT(*) FROM tracks WHERE upvoted = 1
pub fn count_upvoted() -> String {
    Query::select()
        .expr(Func::count(Expr::col(Tracks::Id)))
        .from(Tracks::Table)
        .and_where(Expr::col(Tracks::Upvoted).eq(1))
        .to_string(SqliteQueryBuilder)
}
