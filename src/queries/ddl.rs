use sea_query::{ColumnDef, ForeignKey, ForeignKeyAction, Index, SqliteQueryBuilder, Table};

use crate::schema::{AppState, Categories, Collections, CrawlLog, ShuffleHistory, Tracks};

/// CREATE TABLE IF NOT EXISTS app_state (key TEXT PRIMARY KEY, value TEXT NOT NULL)
pub fn create_app_state_table() -> String {
    Table::create()
        .table(AppState::Table)
        .if_not_exists()
        .col(ColumnDef::new(AppState::Key).string().primary_key())
        .col(ColumnDef::new(AppState::Value).string().not_null())
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS categories (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     name TEXT UNIQUE NOT NULL,
///     remote_path TEXT NOT NULL
/// )
pub fn create_categories_table() -> String {
    Table::create()
        .table(Categories::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(Categories::Id)
                .integer()
                .primary_key()
                .auto_increment(),
        )
        .col(
            ColumnDef::new(Categories::Name)
                .string()
                .not_null()
                .unique_key(),
        )
        .col(ColumnDef::new(Categories::RemotePath).string().not_null())
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS collections (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     category_id INTEGER NOT NULL REFERENCES categories(id),
///     name TEXT NOT NULL,
///     remote_path TEXT UNIQUE NOT NULL,
///     art_url TEXT,
///     track_count INTEGER NOT NULL DEFAULT 0,
///     crawled_at TEXT
/// )
pub fn create_collections_table() -> String {
    Table::create()
        .table(Collections::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(Collections::Id)
                .integer()
                .primary_key()
                .auto_increment(),
        )
        .col(ColumnDef::new(Collections::CategoryId).integer().not_null())
        .col(ColumnDef::new(Collections::Name).string().not_null())
        .col(
            ColumnDef::new(Collections::RemotePath)
                .string()
                .not_null()
                .unique_key(),
        )
        .col(ColumnDef::new(Collections::ArtUrl).string())
        .col(
            ColumnDef::new(Collections::TrackCount)
                .integer()
                .not_null()
                .default(0),
        )
        .col(ColumnDef::new(Collections::CrawledAt).string())
        .foreign_key(
            ForeignKey::create()
                .from(Collections::Table, Collections::CategoryId)
                .to(Categories::Table, Categories::Id)
                .on_delete(ForeignKeyAction::Restrict),
        )
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS tracks (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     collection_id INTEGER NOT NULL REFERENCES collections(id),
///     filename TEXT NOT NULL,
///     title TEXT NOT NULL,
///     remote_url TEXT UNIQUE NOT NULL,
///     format TEXT NOT NULL,
///     source_type TEXT NOT NULL DEFAULT 'direct',
///     source_zip_url TEXT,
///     path_in_zip TEXT,
///     file_size INTEGER,
///     upvoted INTEGER NOT NULL DEFAULT 0,
///     play_count INTEGER NOT NULL DEFAULT 0
/// )
pub fn create_tracks_table() -> String {
    Table::create()
        .table(Tracks::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(Tracks::Id)
                .integer()
                .primary_key()
                .auto_increment(),
        )
        .col(ColumnDef::new(Tracks::CollectionId).integer().not_null())
        .col(ColumnDef::new(Tracks::Filename).string().not_null())
        .col(ColumnDef::new(Tracks::Title).string().not_null())
        .col(
            ColumnDef::new(Tracks::RemoteUrl)
                .string()
                .not_null()
                .unique_key(),
        )
        .col(ColumnDef::new(Tracks::Format).string().not_null())
        .col(
            ColumnDef::new(Tracks::SourceType)
                .string()
                .not_null()
                .default("direct"),
        )
        .col(ColumnDef::new(Tracks::SourceZipUrl).string())
        .col(ColumnDef::new(Tracks::PathInZip).string())
        .col(ColumnDef::new(Tracks::FileSize).big_integer())
        .col(
            ColumnDef::new(Tracks::Upvoted)
                .integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new(Tracks::PlayCount)
                .integer()
                .not_null()
                .default(0),
        )
        .foreign_key(
            ForeignKey::create()
                .from(Tracks::Table, Tracks::CollectionId)
                .to(Collections::Table, Collections::Id)
                .on_delete(ForeignKeyAction::Restrict),
        )
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS shuffle_history (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     track_id INTEGER NOT NULL REFERENCES tracks(id),
///     played_at TEXT NOT NULL
/// )
///
/// AUTOINCREMENT keeps ids strictly increasing, which is what previous/next navigation orders by.
pub fn create_shuffle_history_table() -> String {
    Table::create()
        .table(ShuffleHistory::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(ShuffleHistory::Id)
                .integer()
                .primary_key()
                .auto_increment(),
        )
        .col(ColumnDef::new(ShuffleHistory::TrackId).integer().not_null())
        .col(ColumnDef::new(ShuffleHistory::PlayedAt).string().not_null())
        .foreign_key(
            ForeignKey::create()
                .from(ShuffleHistory::Table, ShuffleHistory::TrackId)
                .to(Tracks::Table, Tracks::Id)
                .on_delete(ForeignKeyAction::Restrict),
        )
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS crawl_log (
///     url TEXT PRIMARY KEY,
///     crawled_at TEXT NOT NULL,
///     status_code INTEGER
/// )
pub fn create_crawl_log_table() -> String {
    Table::create()
        .table(CrawlLog::Table)
        .if_not_exists()
        .col(ColumnDef::new(CrawlLog::Url).string().primary_key())
        .col(ColumnDef::new(CrawlLog::CrawledAt).string().not_null())
        .col(ColumnDef::new(CrawlLog::StatusCode).integer())
        .to_string(SqliteQueryBuilder)
}

/// CREATE INDEX IF NOT EXISTS idx_tracks_collection ON tracks(collection_id)
pub fn create_tracks_collection_index() -> String {
    Index::create()
        .if_not_exists()
        .name("idx_tracks_collection")
        .table(Tracks::Table)
        .col(Tracks::CollectionId)
        .to_string(SqliteQueryBuilder)
}

/// CREATE INDEX IF NOT EXISTS idx_tracks_format ON tracks(format)
pub fn create_tracks_format_index() -> String {
    Index::create()
        .if_not_exists()
        .name("idx_tracks_format")
        .table(Tracks::Table)
        .col(Tracks::Format)
        .to_string(SqliteQueryBuilder)
}

/// CREATE INDEX IF NOT EXISTS idx_collections_category ON collections(category_id)
pub fn create_collections_category_index() -> String {
    Index::create()
        .if_not_exists()
        .name("idx_collections_category")
        .table(Collections::Table)
        .col(Collections::CategoryId)
        .to_string(SqliteQueryBuilder)
}
