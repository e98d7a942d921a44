use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{error, info, warn};
use serde::Deserialize;
use sqlx::sqlite::SqlitePool;
use std::sync::Arc as StdArc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::config::AppConfig;
use crate::crawler::{needs_crawl, Crawler};
use crate::db::{self, CollectionFilter, DynError};
use crate::fetcher::{BoundedFetcher, FetchTimeouts};
use crate::media::{content_type_for_path, MediaError, MediaPipeline};
use crate::shuffle::{ShuffleEngine, ShuffleError, ShuffleScope};

const DEFAULT_PAGE_SIZE: u64 = 50;

// State for API handlers
pub struct AppState {
    pub pool: SqlitePool,
    pub media: MediaPipeline,
    pub shuffle: ShuffleEngine,
}

pub fn build_router(state: StdArc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/categories", get(categories_handler))
        .route("/api/collections", get(collections_handler))
        .route("/api/collections/{id}", get(collection_detail_handler))
        .route("/api/player/current", get(current_handler))
        .route("/api/player/next", post(next_handler))
        .route("/api/player/prev", post(prev_handler))
        .route("/api/player/stream/{id}", get(stream_handler))
        .route("/api/player/original/{id}", get(original_handler))
        .route("/api/art/{collection_id}", get(art_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve the catalog API, crawling in the background when the catalog is empty, stale,
/// or `force_crawl` is set. Ctrl-C stops the server and cancels the crawl.
pub async fn serve_catalog(config: AppConfig, force_crawl: bool) -> Result<(), DynError> {
    config.ensure_directories()?;

    let db_path = config.database_path();
    let pool = db::open_database_connection(&db_path).await?;
    db::init_database_schema(&pool).await?;
    println!("SQLite database: {}", db_path.display());

    let fetcher = BoundedFetcher::new(config.crawl.concurrency, FetchTimeouts::from(&config.crawl))?;
    let config = StdArc::new(config);
    let cancel = CancellationToken::new();

    let crawl_task = if force_crawl || needs_crawl(&pool, config.crawl.refresh_hours).await? {
        info!("Starting background crawl");
        let crawler = Crawler::new(config.clone(), pool.clone(), fetcher.clone(), cancel.clone());
        Some(tokio::spawn(async move {
            if let Err(e) = crawler.crawl_all().await {
                warn!("Background crawl ended: {}", e);
            }
        }))
    } else {
        None
    };

    let state = StdArc::new(AppState {
        pool: pool.clone(),
        media: MediaPipeline::from_config(&config, fetcher),
        shuffle: ShuffleEngine::new(pool.clone(), config.shuffle.recent_window),
    });

    let port = config.api_port;
    println!("Listening on: http://[::]:{} (IPv4 + IPv6)", port);
    println!("Endpoints:");
    println!("  GET  /api/status");
    println!("  GET  /api/categories");
    println!("  GET  /api/collections?category=<name>&q=<text>&offset=<N>&limit=<N>");
    println!("  GET  /api/collections/:id");
    println!("  GET  /api/player/current");
    println!("  POST /api/player/next?scope=track|collection");
    println!("  POST /api/player/prev");
    println!("  GET  /api/player/stream/:id");
    println!("  GET  /api/player/original/:id");
    println!("  GET  /api/art/:collection_id");

    let listener = tokio::net::TcpListener::bind(format!("[::]:{}", port))
        .await
        .map_err(|e| format!("Failed to bind to port {}: {}", port, e))?;

    let shutdown = cancel.clone();
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
            shutdown.cancel();
        })
        .await
        .map_err(|e| format!("Server error: {}", e))?;

    if let Some(task) = crawl_task {
        cancel.cancel();
        let _ = task.await;
    }
    pool.close().await;

    Ok(())
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn store_error(e: DynError) -> Response {
    error!("Database error: {}", e);
    json_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Database error: {}", e))
}

fn media_error(e: MediaError) -> Response {
    let status = match &e {
        MediaError::Unsupported(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        MediaError::Unavailable(_) | MediaError::Transcode(_) => StatusCode::SERVICE_UNAVAILABLE,
        MediaError::Io(_) | MediaError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Media error: {}", e);
    }
    json_error(status, e.to_string())
}

fn shuffle_error(e: ShuffleError) -> Response {
    match e {
        ShuffleError::Store(e) => store_error(e),
        other => json_error(StatusCode::NOT_FOUND, other.to_string()),
    }
}

/// Stream a local file as the response body
async fn file_response(
    path: &std::path::Path,
    content_type: &'static str,
    download_name: Option<&str>,
) -> Response {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            warn!("Prepared file {} vanished: {}", path.display(), e);
            return json_error(StatusCode::SERVICE_UNAVAILABLE, "Track unavailable");
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Ok(meta) = file.metadata().await {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.len()));
    }
    if let Some(name) = download_name {
        let disposition = format!(
            "attachment; filename*=UTF-8''{}",
            urlencoding::encode(name)
        );
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }

    (StatusCode::OK, headers, Body::from_stream(ReaderStream::new(file))).into_response()
}

async fn status_handler(State(state): State<StdArc<AppState>>) -> Response {
    let raw = state.media.raw_cache().current_size().await.unwrap_or(0);
    let converted = state.media.converted_cache().current_size().await.unwrap_or(0);
    match db::catalog_status(&state.pool, raw, converted).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => store_error(e),
    }
}

async fn categories_handler(State(state): State<StdArc<AppState>>) -> Response {
    match db::list_categories(&state.pool).await {
        Ok(categories) => Json(categories).into_response(),
        Err(e) => store_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct CollectionsQuery {
    category: Option<String>,
    q: Option<String>,
    offset: Option<u64>,
    limit: Option<u64>,
}

async fn collections_handler(
    State(state): State<StdArc<AppState>>,
    Query(query): Query<CollectionsQuery>,
) -> Response {
    let filter = CollectionFilter {
        category: query.category,
        name_contains: query.q,
        offset: query.offset.unwrap_or(0),
        limit: query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
    };
    match db::list_collections(&state.pool, &filter).await {
        Ok(collections) => Json(collections).into_response(),
        Err(e) => store_error(e),
    }
}

async fn collection_detail_handler(
    State(state): State<StdArc<AppState>>,
    Path(id): Path<i64>,
) -> Response {
    match db::get_collection_detail(&state.pool, id).await {
        Ok(Some(detail)) => Json(detail).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "Collection not found"),
        Err(e) => store_error(e),
    }
}

async fn current_handler(State(state): State<StdArc<AppState>>) -> Response {
    match state.shuffle.current().await {
        Ok(player) => Json(player).into_response(),
        Err(e) => shuffle_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct NextQuery {
    #[serde(default)]
    scope: ShuffleScope,
}

async fn next_handler(
    State(state): State<StdArc<AppState>>,
    Query(query): Query<NextQuery>,
) -> Response {
    match state.shuffle.next(query.scope).await {
        Ok(player) => Json(player).into_response(),
        Err(e) => shuffle_error(e),
    }
}

async fn prev_handler(State(state): State<StdArc<AppState>>) -> Response {
    match state.shuffle.previous().await {
        Ok(player) => Json(player).into_response(),
        Err(e) => shuffle_error(e),
    }
}

async fn stream_handler(State(state): State<StdArc<AppState>>, Path(id): Path<i64>) -> Response {
    let track = match db::get_track(&state.pool, id).await {
        Ok(Some(track)) => track,
        Ok(None) => return json_error(StatusCode::NOT_FOUND, "Track not found"),
        Err(e) => return store_error(e),
    };

    if let Err(e) = db::increment_play_count(&state.pool, id).await {
        return store_error(e);
    }

    match state.media.prepare_track(&track).await {
        Ok(path) => file_response(&path, content_type_for_path(&path), None).await,
        Err(e) => media_error(e),
    }
}

async fn original_handler(State(state): State<StdArc<AppState>>, Path(id): Path<i64>) -> Response {
    let track = match db::get_track(&state.pool, id).await {
        Ok(Some(track)) => track,
        Ok(None) => return json_error(StatusCode::NOT_FOUND, "Track not found"),
        Err(e) => return store_error(e),
    };

    match state.media.fetch_original(&track).await {
        Ok(path) => {
            file_response(&path, content_type_for_path(&path), Some(&track.filename)).await
        }
        Err(e) => media_error(e),
    }
}

async fn art_handler(
    State(state): State<StdArc<AppState>>,
    Path(collection_id): Path<i64>,
) -> Response {
    let art_url = match db::get_collection_art_url(&state.pool, collection_id).await {
        Ok(Some(url)) => url,
        Ok(None) => return json_error(StatusCode::NOT_FOUND, "No art available"),
        Err(e) => return store_error(e),
    };

    match state.media.fetch_art(collection_id, &art_url).await {
        Ok((data, content_type)) => {
            (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], data).into_response()
        }
        Err(e) => media_error(e),
    }
}
