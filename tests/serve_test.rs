use axum::{
    extract::State,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use mirror_jukebox::cache::CacheDir;
use mirror_jukebox::config::TranscoderConfig;
use mirror_jukebox::db;
use mirror_jukebox::fetcher::{BoundedFetcher, FetchTimeouts};
use mirror_jukebox::media::{MediaPipeline, Transcoder};
use mirror_jukebox::models::NewTrack;
use mirror_jukebox::serve::{build_router, AppState};
use mirror_jukebox::shuffle::ShuffleEngine;

async fn mirror_handler(State(files): State<Arc<HashMap<String, Vec<u8>>>>, uri: Uri) -> Response {
    match files.get(uri.path()) {
        Some(body) => (StatusCode::OK, body.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, "Not Found").into_response(),
    }
}

async fn spawn(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    format!("http://{}", addr)
}

struct Fixture {
    api: String,
    pool: SqlitePool,
    fm_id: i64,
    orange_id: i64,
    mp3_id: i64,
    sid_id: i64,
    _db_guard: tempfile::TempDir,
    _cache: tempfile::TempDir,
}

/// Catalog with two collections, backed by a mock mirror serving the mp3 and the cover art
async fn setup() -> Fixture {
    let mut files = HashMap::new();
    files.insert("/music/groups/fm/tune.mp3".to_string(), b"ID3 mp3 bytes".to_vec());
    files.insert("/music/groups/fm/cover.gif".to_string(), b"GIF89a art".to_vec());
    let mirror = spawn(
        Router::new()
            .fallback(mirror_handler)
            .with_state(Arc::new(files)),
    )
    .await;

    let (pool, db_guard) = db::create_test_connection_in_temporary_file().await.unwrap();
    db::init_database_schema(&pool).await.unwrap();

    let groups = format!("{}/music/groups/", mirror);
    let category_id = db::ensure_category(&pool, "groups", &groups).await.unwrap();
    let fm_url = format!("{}fm/", groups);
    let fm_id = db::ensure_collection(&pool, category_id, "fm", &fm_url).await.unwrap();
    let orange_url = format!("{}orange/", groups);
    let orange_id = db::ensure_collection(&pool, category_id, "orange", &orange_url)
        .await
        .unwrap();

    let mp3_url = format!("{}tune.mp3", fm_url);
    let sid_url = format!("{}commando.sid", orange_url);
    for track in [
        NewTrack::direct(fm_id, "tune.mp3", &mp3_url, "mp3", Some(13)),
        NewTrack::direct(orange_id, "commando.sid", &sid_url, "sid", Some(4)),
    ] {
        db::insert_track_or_ignore(&pool, &track).await.unwrap();
        db::refresh_collection_track_count(&pool, track.collection_id, "2026-01-01T00:00:00Z")
            .await
            .unwrap();
    }
    db::set_collection_art_if_unset(&pool, fm_id, &format!("{}cover.gif", fm_url))
        .await
        .unwrap();

    let mp3_id = db::get_track_by_remote_url(&pool, &mp3_url).await.unwrap().unwrap().id;
    let sid_id = db::get_track_by_remote_url(&pool, &sid_url).await.unwrap().unwrap().id;

    let cache = tempfile::tempdir().unwrap();
    let media = pipeline(cache.path());
    let state = Arc::new(AppState {
        pool: pool.clone(),
        media,
        shuffle: ShuffleEngine::new(pool.clone(), 50),
    });
    let api = spawn(build_router(state)).await;

    Fixture {
        api,
        pool,
        fm_id,
        orange_id,
        mp3_id,
        sid_id,
        _db_guard: db_guard,
        _cache: cache,
    }
}

fn pipeline(dir: &Path) -> MediaPipeline {
    MediaPipeline::new(
        BoundedFetcher::new(2, FetchTimeouts::default()).unwrap(),
        CacheDir::new(dir.join("downloads"), 1024 * 1024),
        CacheDir::new(dir.join("converted"), 1024 * 1024),
        dir.join("art"),
        Transcoder::new(&TranscoderConfig {
            program: PathBuf::from("false"),
            ..TranscoderConfig::default()
        }),
    )
}

#[tokio::test]
async fn test_status_and_categories() {
    let fx = setup().await;
    let client = reqwest::Client::new();

    let status: Value = client
        .get(format!("{}/api/status", fx.api))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["crawl_status"], "idle");
    assert_eq!(status["total_categories"], 1);
    assert_eq!(status["total_collections"], 2);
    assert_eq!(status["total_tracks"], 2);

    let categories: Value = client
        .get(format!("{}/api/categories", fx.api))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(categories[0]["name"], "groups");
    assert_eq!(categories[0]["collection_count"], 2);
}

#[tokio::test]
async fn test_collections_filter_and_detail() {
    let fx = setup().await;
    let client = reqwest::Client::new();

    let found: Value = client
        .get(format!("{}/api/collections?category=groups&q=ORA", fx.api))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let found = found.as_array().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["id"], fx.orange_id);

    let detail: Value = client
        .get(format!("{}/api/collections/{}", fx.api, fx.fm_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["name"], "fm");
    assert_eq!(detail["category_name"], "groups");
    assert_eq!(detail["tracks"][0]["filename"], "tune.mp3");
    assert_eq!(detail["tracks"][0]["source_type"], "direct");

    let missing = client
        .get(format!("{}/api/collections/9999", fx.api))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stream_and_original() {
    let fx = setup().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/player/stream/{}", fx.api, fx.mp3_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "audio/mpeg");
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"ID3 mp3 bytes");

    let track = db::get_track(&fx.pool, fx.mp3_id).await.unwrap().unwrap();
    assert_eq!(track.play_count, 1);

    let original = client
        .get(format!("{}/api/player/original/{}", fx.api, fx.mp3_id))
        .send()
        .await
        .unwrap();
    assert_eq!(original.status(), reqwest::StatusCode::OK);
    assert_eq!(
        original.headers()["content-disposition"],
        "attachment; filename*=UTF-8''tune.mp3"
    );

    let unsupported = client
        .get(format!("{}/api/player/stream/{}", fx.api, fx.sid_id))
        .send()
        .await
        .unwrap();
    assert_eq!(unsupported.status(), reqwest::StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let missing = client
        .get(format!("{}/api/player/stream/9999", fx.api))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_player_endpoints() {
    let fx = setup().await;
    let client = reqwest::Client::new();

    let prev = client
        .post(format!("{}/api/player/prev", fx.api))
        .send()
        .await
        .unwrap();
    assert_eq!(prev.status(), reqwest::StatusCode::NOT_FOUND);

    let next: Value = client
        .post(format!("{}/api/player/next?scope=collection", fx.api))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    // The sid track is never offered
    assert_eq!(next["track"]["id"], fx.mp3_id);
    assert_eq!(next["category_name"], "groups");
    assert_eq!(next["has_prev"], false);

    let current: Value = client
        .get(format!("{}/api/player/current", fx.api))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(current["history_position"], next["history_position"]);

    let bad_scope = client
        .post(format!("{}/api/player/next?scope=album", fx.api))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_scope.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_art_endpoint() {
    let fx = setup().await;
    let client = reqwest::Client::new();

    let art = client
        .get(format!("{}/api/art/{}", fx.api, fx.fm_id))
        .send()
        .await
        .unwrap();
    assert_eq!(art.status(), reqwest::StatusCode::OK);
    assert_eq!(art.headers()["content-type"], "image/gif");
    assert_eq!(art.bytes().await.unwrap().as_ref(), b"GIF89a art");

    let none = client
        .get(format!("{}/api/art/{}", fx.api, fx.orange_id))
        .send()
        .await
        .unwrap();
    assert_eq!(none.status(), reqwest::StatusCode::NOT_FOUND);
}
