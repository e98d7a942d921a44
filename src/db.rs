//! SQLite catalog store.
//!
//! SQL text comes from the sea-query builders in [`crate::queries`]; this module owns the pool,
//! the schema bootstrap and the typed helpers the crawler, shuffle engine and API use.
//! Helpers that participate in a transaction take any sqlx executor.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Executor, Row, Sqlite};
use std::path::Path;
use std::time::Duration;

use crate::constants::EXPECTED_DB_VERSION;
use crate::models::{CatalogStatus, CategorySummary, Collection, CollectionDetail, NewTrack, Track};
use crate::queries::{app_state, categories, collections, crawl_log, ddl, history, tracks};

pub type DynError = Box<dyn std::error::Error + Send + Sync>;

pub const STATE_VERSION: &str = "version";
pub const STATE_CRAWL_STATUS: &str = "crawl_status";
pub const STATE_LAST_CRAWL: &str = "last_crawl";
pub const STATE_SHUFFLE_POSITION: &str = "shuffle_position";

/// Open the catalog database, creating the file if needed.
/// Enables WAL mode and foreign keys on every pooled connection.
pub async fn open_database_connection(db_path: &Path) -> Result<SqlitePool, DynError> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Create a database in a fresh temporary directory.
/// Keep the returned guard alive for as long as the pool is used.
pub async fn create_test_connection_in_temporary_file(
) -> Result<(SqlitePool, tempfile::TempDir), DynError> {
    let temp_dir = tempfile::tempdir()?;
    let pool = open_database_connection(&temp_dir.path().join("test.sqlite")).await?;
    Ok((pool, temp_dir))
}

/// Create tables and indexes, then stamp or verify the schema version
pub async fn init_database_schema(pool: &SqlitePool) -> Result<(), DynError> {
    for sql in [
        ddl::create_app_state_table(),
        ddl::create_categories_table(),
        ddl::create_collections_table(),
        ddl::create_tracks_table(),
        ddl::create_shuffle_history_table(),
        ddl::create_crawl_log_table(),
        ddl::create_tracks_collection_index(),
        ddl::create_tracks_format_index(),
        ddl::create_collections_category_index(),
    ] {
        sqlx::query(&sql).execute(pool).await?;
    }

    match get_state(pool, STATE_VERSION).await? {
        None => {
            sqlx::query(&app_state::insert(STATE_VERSION, EXPECTED_DB_VERSION))
                .execute(pool)
                .await?;
        }
        Some(version) if version != EXPECTED_DB_VERSION => {
            return Err(format!(
                "Unsupported catalog version: '{}' (expected '{}')",
                version, EXPECTED_DB_VERSION
            )
            .into());
        }
        Some(_) => {}
    }

    Ok(())
}

// ----------------------------------------------------------------------------
// app_state
// ----------------------------------------------------------------------------

pub async fn get_state<'e, E>(executor: E, key: &str) -> Result<Option<String>, DynError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = app_state::select_by_key(key);
    let result = sqlx::query(&sql).fetch_optional(executor).await?;
    Ok(result.map(|row| row.get::<String, _>(0)))
}

pub async fn set_state<'e, E>(executor: E, key: &str, value: &str) -> Result<(), DynError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = app_state::upsert(key, value);
    sqlx::query(&sql).execute(executor).await?;
    Ok(())
}

pub async fn crawl_status(pool: &SqlitePool) -> Result<String, DynError> {
    Ok(get_state(pool, STATE_CRAWL_STATUS)
        .await?
        .unwrap_or_else(|| "idle".to_string()))
}

// ----------------------------------------------------------------------------
// Crawl writes
// ----------------------------------------------------------------------------

/// Insert the category if new and return its id
pub async fn ensure_category(
    pool: &SqlitePool,
    name: &str,
    remote_path: &str,
) -> Result<i64, DynError> {
    sqlx::query(&categories::insert_or_ignore(name, remote_path))
        .execute(pool)
        .await?;
    let id: i64 = sqlx::query_scalar(&categories::select_id_by_name(name))
        .fetch_one(pool)
        .await?;
    Ok(id)
}

/// Insert the collection if its remote path is new and return its id
pub async fn ensure_collection(
    pool: &SqlitePool,
    category_id: i64,
    name: &str,
    remote_path: &str,
) -> Result<i64, DynError> {
    sqlx::query(&collections::insert_or_ignore(category_id, name, remote_path))
        .execute(pool)
        .await?;
    let id: i64 = sqlx::query_scalar(&collections::select_id_by_remote_path(remote_path))
        .fetch_one(pool)
        .await?;
    Ok(id)
}

/// Returns true if a row was inserted, false if the locator was already known
pub async fn insert_track_or_ignore<'e, E>(executor: E, track: &NewTrack) -> Result<bool, DynError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = tracks::insert_or_ignore(track);
    let result = sqlx::query(&sql).execute(executor).await?;
    Ok(result.rows_affected() > 0)
}

/// Returns true if the art reference was stored, false if one was already set
pub async fn set_collection_art_if_unset<'e, E>(
    executor: E,
    collection_id: i64,
    art_url: &str,
) -> Result<bool, DynError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = collections::set_art_if_unset(collection_id, art_url);
    let result = sqlx::query(&sql).execute(executor).await?;
    Ok(result.rows_affected() > 0)
}

pub async fn refresh_collection_track_count<'e, E>(
    executor: E,
    collection_id: i64,
    crawled_at: &str,
) -> Result<(), DynError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = collections::refresh_track_count(collection_id, crawled_at);
    sqlx::query(&sql).execute(executor).await?;
    Ok(())
}

pub async fn log_crawl<'e, E>(
    executor: E,
    url: &str,
    crawled_at: &str,
    status_code: u16,
) -> Result<(), DynError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = crawl_log::upsert(url, crawled_at, status_code);
    sqlx::query(&sql).execute(executor).await?;
    Ok(())
}

pub async fn crawl_log_status(pool: &SqlitePool, url: &str) -> Result<Option<i64>, DynError> {
    let result: Option<Option<i64>> = sqlx::query_scalar(&crawl_log::select_status(url))
        .fetch_optional(pool)
        .await?;
    Ok(result.flatten())
}

// ----------------------------------------------------------------------------
// Catalog reads
// ----------------------------------------------------------------------------

pub async fn get_track(pool: &SqlitePool, id: i64) -> Result<Option<Track>, DynError> {
    let row = sqlx::query(&tracks::select_by_id(id))
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(Track::from_row).transpose()?)
}

pub async fn get_track_by_remote_url(
    pool: &SqlitePool,
    remote_url: &str,
) -> Result<Option<Track>, DynError> {
    let row = sqlx::query(&tracks::select_by_remote_url(remote_url))
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(Track::from_row).transpose()?)
}

pub async fn get_collection(pool: &SqlitePool, id: i64) -> Result<Option<Collection>, DynError> {
    let row = sqlx::query(&collections::select_by_id(id))
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(Collection::from_row).transpose()?)
}

pub async fn get_category_name(pool: &SqlitePool, id: i64) -> Result<Option<String>, DynError> {
    let name: Option<String> = sqlx::query_scalar(&categories::select_name_by_id(id))
        .fetch_optional(pool)
        .await?;
    Ok(name)
}

pub async fn list_tracks_in_collection(
    pool: &SqlitePool,
    collection_id: i64,
) -> Result<Vec<Track>, DynError> {
    let rows = sqlx::query(&tracks::select_by_collection(collection_id))
        .fetch_all(pool)
        .await?;
    let tracks = rows
        .iter()
        .map(Track::from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tracks)
}

pub async fn list_categories(pool: &SqlitePool) -> Result<Vec<CategorySummary>, DynError> {
    let rows = sqlx::query(&categories::select_all_with_counts())
        .fetch_all(pool)
        .await?;
    let summaries = rows
        .iter()
        .map(CategorySummary::from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(summaries)
}

/// Browse filter for [`list_collections`]
#[derive(Debug, Clone, Default)]
pub struct CollectionFilter {
    pub category: Option<String>,
    pub name_contains: Option<String>,
    pub offset: u64,
    pub limit: u64,
}

pub const MAX_PAGE_SIZE: u64 = 200;

pub async fn list_collections(
    pool: &SqlitePool,
    filter: &CollectionFilter,
) -> Result<Vec<Collection>, DynError> {
    let limit = filter.limit.clamp(1, MAX_PAGE_SIZE);
    let name_contains = filter
        .name_contains
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty());
    let sql = collections::select_filtered(
        filter.category.as_deref(),
        name_contains,
        filter.offset,
        limit,
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    let collections = rows
        .iter()
        .map(Collection::from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(collections)
}

/// Collection with its category name and tracks ordered by filename
pub async fn get_collection_detail(
    pool: &SqlitePool,
    id: i64,
) -> Result<Option<CollectionDetail>, DynError> {
    let Some(collection) = get_collection(pool, id).await? else {
        return Ok(None);
    };
    let category_name = get_category_name(pool, collection.category_id)
        .await?
        .unwrap_or_default();
    let tracks = list_tracks_in_collection(pool, id).await?;
    Ok(Some(CollectionDetail {
        collection,
        category_name,
        tracks,
    }))
}

pub async fn get_collection_art_url(
    pool: &SqlitePool,
    collection_id: i64,
) -> Result<Option<String>, DynError> {
    let art: Option<Option<String>> = sqlx::query_scalar(&collections::select_art_url(collection_id))
        .fetch_optional(pool)
        .await?;
    Ok(art.flatten())
}

pub async fn increment_play_count(pool: &SqlitePool, track_id: i64) -> Result<(), DynError> {
    sqlx::query(&tracks::increment_play_count(track_id))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count_tracks(pool: &SqlitePool) -> Result<i64, DynError> {
    let count: i64 = sqlx::query_scalar(&tracks::count()).fetch_one(pool).await?;
    Ok(count)
}

/// Catalog counts and crawl status. Cache sizes are measured by the caller.
pub async fn catalog_status(
    pool: &SqlitePool,
    download_cache_bytes: u64,
    converted_cache_bytes: u64,
) -> Result<CatalogStatus, DynError> {
    let total_categories: i64 = sqlx::query_scalar(&categories::count()).fetch_one(pool).await?;
    let total_collections: i64 = sqlx::query_scalar(&collections::count()).fetch_one(pool).await?;
    let total_tracks = count_tracks(pool).await?;
    let upvoted_count: i64 = sqlx::query_scalar(&tracks::count_upvoted()).fetch_one(pool).await?;

    Ok(CatalogStatus {
        crawl_status: crawl_status(pool).await?,
        total_categories,
        total_collections,
        total_tracks,
        upvoted_count,
        download_cache_mb: bytes_to_mb(download_cache_bytes),
        converted_cache_mb: bytes_to_mb(converted_cache_bytes),
    })
}

fn bytes_to_mb(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 10.0).round() / 10.0
}

// ----------------------------------------------------------------------------
// Shuffle history
// ----------------------------------------------------------------------------

/// Pick one random playable track, see [`tracks::select_random_candidate`]
pub async fn random_track(
    pool: &SqlitePool,
    exclude_collection: Option<i64>,
    recent_window: Option<u32>,
) -> Result<Option<Track>, DynError> {
    let sql = tracks::select_random_candidate(exclude_collection, recent_window);
    let row = sqlx::query(&sql).fetch_optional(pool).await?;
    Ok(row.as_ref().map(Track::from_row).transpose()?)
}

/// Append a history entry and return its id
pub async fn append_history<'e, E>(
    executor: E,
    track_id: i64,
    played_at: &str,
) -> Result<i64, DynError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = history::insert(track_id, played_at);
    let result = sqlx::query(&sql).execute(executor).await?;
    Ok(result.last_insert_rowid())
}

pub async fn previous_history_id(pool: &SqlitePool, before_id: i64) -> Result<Option<i64>, DynError> {
    let id: Option<i64> = sqlx::query_scalar(&history::select_previous_id(before_id))
        .fetch_optional(pool)
        .await?;
    Ok(id)
}

pub async fn track_for_history_entry(
    pool: &SqlitePool,
    history_id: i64,
) -> Result<Option<Track>, DynError> {
    let row = sqlx::query(&tracks::select_by_history_entry(history_id))
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(Track::from_row).transpose()?)
}

pub async fn count_history(pool: &SqlitePool) -> Result<i64, DynError> {
    let count: i64 = sqlx::query_scalar(&history::count()).fetch_one(pool).await?;
    Ok(count)
}

pub async fn latest_history_id(pool: &SqlitePool) -> Result<Option<i64>, DynError> {
    let id: Option<i64> = sqlx::query_scalar(&history::select_max_id())
        .fetch_one(pool)
        .await?;
    Ok(id)
}
