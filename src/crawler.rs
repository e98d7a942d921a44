//! Crawl orchestration: category listings fan out into collections, collections into
//! subdirectory tasks, all sharing the fetcher's admission limiter.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use sqlx::sqlite::SqlitePool;
use std::future::Future;
use std::ops::AddAssign;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::archive;
use crate::config::AppConfig;
use crate::constants::{is_art_filename, is_audio_extension, ARCHIVE_EXTENSION, MISC_COLLECTION_PREFIX};
use crate::db::{self, DynError, STATE_CRAWL_STATUS, STATE_LAST_CRAWL};
use crate::fetcher::{BoundedFetcher, FetchOutcome, TextResponse};
use crate::listing::{parse_listing, Listing, ListingFile};
use crate::models::NewTrack;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("catalog store error: {0}")]
    Store(#[from] DynError),
    #[error("crawl cancelled")]
    Cancelled,
}

impl From<sqlx::Error> for CrawlError {
    fn from(e: sqlx::Error) -> Self {
        CrawlError::Store(Box::new(e))
    }
}

/// Running totals for one crawl
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CrawlStats {
    pub categories: usize,
    pub collections: usize,
    pub directories: usize,
    pub tracks_added: usize,
    pub archives_inspected: usize,
    /// Listings or archives that could not be fetched
    pub failed_requests: usize,
}

impl AddAssign for CrawlStats {
    fn add_assign(&mut self, other: Self) {
        self.categories += other.categories;
        self.collections += other.collections;
        self.directories += other.directories;
        self.tracks_added += other.tracks_added;
        self.archives_inspected += other.archives_inspected;
        self.failed_requests += other.failed_requests;
    }
}

type CrawlFuture = Pin<Box<dyn Future<Output = Result<CrawlStats, CrawlError>> + Send>>;

/// A directory still to visit, inside one collection
#[derive(Debug, Clone)]
struct DirectoryJob {
    url: String,
    collection_id: i64,
    depth: u32,
}

/// What one directory contributes, gathered before anything is written
#[derive(Default)]
struct DirectoryFindings {
    tracks: Vec<NewTrack>,
    /// Art references in priority order; the first one wins if the collection has none
    art: Vec<String>,
    archives_inspected: usize,
    failed_requests: usize,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

#[derive(Clone)]
pub struct Crawler {
    config: Arc<AppConfig>,
    pool: SqlitePool,
    fetcher: BoundedFetcher,
    cancel: CancellationToken,
}

impl Crawler {
    pub fn new(
        config: Arc<AppConfig>,
        pool: SqlitePool,
        fetcher: BoundedFetcher,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            pool,
            fetcher,
            cancel,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Crawl every configured category in order, recording the outcome in `crawl_status`
    pub async fn crawl_all(&self) -> Result<CrawlStats, CrawlError> {
        db::set_state(&self.pool, STATE_CRAWL_STATUS, "running").await?;
        info!("Starting full crawl of {}", self.config.mirror_base_url);

        let result = self.crawl_categories().await;

        match &result {
            Ok(stats) => {
                let total = db::count_tracks(&self.pool).await?;
                info!(
                    "Crawl complete. {} collections, {} directories, {} new tracks ({} total), {} failed requests",
                    stats.collections, stats.directories, stats.tracks_added, total, stats.failed_requests
                );
                db::set_state(&self.pool, STATE_CRAWL_STATUS, "complete").await?;
                db::set_state(&self.pool, STATE_LAST_CRAWL, &now_rfc3339()).await?;
            }
            Err(CrawlError::Cancelled) => {
                info!("Crawl cancelled; rows written so far are kept");
                db::set_state(&self.pool, STATE_CRAWL_STATUS, "cancelled").await?;
            }
            Err(CrawlError::Store(e)) => {
                error!("Crawl failed: {}", e);
                let status = format!("error: {}", e);
                if let Err(write_err) = db::set_state(&self.pool, STATE_CRAWL_STATUS, &status).await {
                    error!("Could not record crawl failure: {}", write_err);
                }
            }
        }

        result
    }

    async fn crawl_categories(&self) -> Result<CrawlStats, CrawlError> {
        let mut stats = CrawlStats::default();
        for name in &self.config.categories {
            let url = self.config.category_url(name);
            let category_id = db::ensure_category(&self.pool, name, &url).await?;
            stats += self.crawl_category(name, category_id, &url).await?;
        }
        Ok(stats)
    }

    /// Fetch a listing unless the crawl is cancelled first
    async fn fetch_listing(&self, url: &str) -> Result<FetchOutcome<TextResponse>, CrawlError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(CrawlError::Cancelled),
            outcome = self.fetcher.fetch_text(url) => Ok(outcome),
        }
    }

    /// Resolve a listing fetch into a parsed listing, recording the visit in the crawl log.
    /// Returns None when the listing could not be obtained.
    async fn visit(&self, url: &str, stats: &mut CrawlStats) -> Result<Option<Listing>, CrawlError> {
        match self.fetch_listing(url).await? {
            FetchOutcome::Ok(response) => {
                db::log_crawl(&self.pool, url, &now_rfc3339(), response.status).await?;
                let listing = parse_listing(&response.body, url);
                for skipped in &listing.skipped {
                    debug!("Skipped row in {}: {:?}", url, skipped);
                }
                Ok(Some(listing))
            }
            FetchOutcome::NotFound(status) => {
                db::log_crawl(&self.pool, url, &now_rfc3339(), status).await?;
                stats.failed_requests += 1;
                Ok(None)
            }
            FetchOutcome::Failed(reason) => {
                warn!("Listing unavailable {}: {}", url, reason);
                stats.failed_requests += 1;
                Ok(None)
            }
        }
    }

    async fn crawl_category(
        &self,
        name: &str,
        category_id: i64,
        url: &str,
    ) -> Result<CrawlStats, CrawlError> {
        info!("Crawling category: {}", name);
        let mut stats = CrawlStats {
            categories: 1,
            ..Default::default()
        };

        let Some(listing) = self.visit(url, &mut stats).await? else {
            warn!("Failed to fetch category listing: {}", name);
            return Ok(stats);
        };

        let total = listing.dirs.len();
        let batch_size = self.config.crawl.batch_size.max(1);
        let pause = Duration::from_millis(self.config.crawl.batch_pause_ms);
        let mut done = 0;

        for batch in listing.dirs.chunks(batch_size) {
            let mut tasks = JoinSet::new();
            for dir in batch {
                let collection_id =
                    db::ensure_collection(&self.pool, category_id, &dir.name, &dir.url).await?;
                stats.collections += 1;
                tasks.spawn(self.crawl_directory(DirectoryJob {
                    url: dir.url.clone(),
                    collection_id,
                    depth: 0,
                }));
            }
            stats += join_all(&mut tasks).await?;

            done += batch.len();
            let tracks_total = db::count_tracks(&self.pool).await?;
            info!(
                "  {}: {}/{} collections crawled, {} tracks total",
                name, done, total, tracks_total
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(CrawlError::Cancelled),
                _ = tokio::time::sleep(pause) => {}
            }
        }

        let root_audio: Vec<&ListingFile> = listing
            .files
            .iter()
            .filter(|f| is_audio_extension(&f.ext))
            .collect();
        if !root_audio.is_empty() {
            stats += self
                .store_misc_collection(name, category_id, url, &root_audio)
                .await?;
        }

        Ok(stats)
    }

    /// Audio sitting directly in a category listing goes into a synthetic collection
    /// keyed by the category URL
    async fn store_misc_collection(
        &self,
        category: &str,
        category_id: i64,
        url: &str,
        files: &[&ListingFile],
    ) -> Result<CrawlStats, CrawlError> {
        let misc_name = format!("{}{}", MISC_COLLECTION_PREFIX, category);
        let collection_id = db::ensure_collection(&self.pool, category_id, &misc_name, url).await?;

        let mut stats = CrawlStats {
            collections: 1,
            ..Default::default()
        };
        let mut tx = self.pool.begin().await?;
        for file in files {
            let track = NewTrack::direct(collection_id, &file.name, &file.url, &file.ext, file.size);
            if db::insert_track_or_ignore(&mut *tx, &track).await? {
                stats.tracks_added += 1;
            }
        }
        db::refresh_collection_track_count(&mut *tx, collection_id, &now_rfc3339()).await?;
        tx.commit().await?;

        info!("  {}: {} files in {}", category, files.len(), misc_name);
        Ok(stats)
    }

    /// Boxed so directory tasks can spawn their own subdirectory tasks
    fn crawl_directory(&self, job: DirectoryJob) -> CrawlFuture {
        let crawler = self.clone();
        Box::pin(async move { crawler.crawl_directory_inner(job).await })
    }

    async fn crawl_directory_inner(&self, job: DirectoryJob) -> Result<CrawlStats, CrawlError> {
        let mut stats = CrawlStats::default();
        let Some(listing) = self.visit(&job.url, &mut stats).await? else {
            return Ok(stats);
        };
        stats.directories += 1;

        let findings = self.examine(&listing, job.collection_id).await?;
        stats.archives_inspected += findings.archives_inspected;
        stats.failed_requests += findings.failed_requests;

        let mut tx = self.pool.begin().await?;
        for track in &findings.tracks {
            if db::insert_track_or_ignore(&mut *tx, track).await? {
                stats.tracks_added += 1;
            }
        }
        if let Some(art) = findings.art.first() {
            db::set_collection_art_if_unset(&mut *tx, job.collection_id, art).await?;
        }
        db::refresh_collection_track_count(&mut *tx, job.collection_id, &now_rfc3339()).await?;
        tx.commit().await?;

        debug!(
            "{} (depth {}): {} files, {} subdirectories",
            job.url,
            job.depth,
            listing.files.len(),
            listing.dirs.len()
        );

        if job.depth >= self.config.crawl.max_depth {
            if !listing.dirs.is_empty() {
                debug!("Depth cap reached at {}", job.url);
            }
            return Ok(stats);
        }

        let mut children = JoinSet::new();
        for dir in &listing.dirs {
            children.spawn(self.crawl_directory(DirectoryJob {
                url: dir.url.clone(),
                collection_id: job.collection_id,
                depth: job.depth + 1,
            }));
        }
        stats += join_all(&mut children).await?;

        Ok(stats)
    }

    /// Collect direct tracks, art and the contents of small archives for one directory
    async fn examine(
        &self,
        listing: &Listing,
        collection_id: i64,
    ) -> Result<DirectoryFindings, CrawlError> {
        let mut findings = DirectoryFindings::default();

        if let Some(art) = listing.files.iter().find(|f| is_art_filename(&f.name)) {
            findings.art.push(art.url.clone());
        }

        for file in &listing.files {
            if is_audio_extension(&file.ext) {
                findings.tracks.push(NewTrack::direct(
                    collection_id,
                    &file.name,
                    &file.url,
                    &file.ext,
                    file.size,
                ));
            } else if file.ext == ARCHIVE_EXTENSION {
                match file.size {
                    Some(size) if size <= self.config.crawl.zip_inspect_max_size => {
                        self.inspect_archive(file, collection_id, &mut findings).await?;
                    }
                    _ => debug!("Not inspecting archive {} (size {:?})", file.url, file.size),
                }
            }
        }

        Ok(findings)
    }

    async fn inspect_archive(
        &self,
        file: &ListingFile,
        collection_id: i64,
        findings: &mut DirectoryFindings,
    ) -> Result<(), CrawlError> {
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => return Err(CrawlError::Cancelled),
            outcome = self.fetcher.fetch_bytes(&file.url) => outcome,
        };
        let bytes = match outcome {
            FetchOutcome::Ok(bytes) => bytes,
            other => {
                warn!(
                    "Failed to download ZIP {}: {}",
                    file.url,
                    other.failure().unwrap_or_default()
                );
                findings.failed_requests += 1;
                return Ok(());
            }
        };

        match archive::inspect(&bytes, &file.url) {
            Ok(contents) => {
                findings.archives_inspected += 1;
                for (member, entry) in contents.audio {
                    findings.tracks.push(NewTrack::archived(
                        collection_id,
                        member,
                        &entry.ext,
                        Some(entry.size),
                    ));
                }
                if let Some(art) = contents.art {
                    findings.art.push(art.art_reference());
                }
            }
            Err(e) => warn!("Skipping ZIP {}: {}", file.url, e),
        }
        Ok(())
    }
}

/// Wait for every task in the set. The first error aborts the remaining tasks.
async fn join_all(tasks: &mut JoinSet<Result<CrawlStats, CrawlError>>) -> Result<CrawlStats, CrawlError> {
    let mut stats = CrawlStats::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(child)) => stats += child,
            Ok(Err(e)) => {
                tasks.abort_all();
                return Err(e);
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!("Crawl task panicked: {}", e),
        }
    }
    Ok(stats)
}

/// Whether `serve` should start a background crawl: empty catalog, or the last completed
/// crawl is older than `refresh_hours` (0 disables the age check)
pub async fn needs_crawl(pool: &SqlitePool, refresh_hours: u64) -> Result<bool, DynError> {
    if db::count_tracks(pool).await? == 0 {
        return Ok(true);
    }
    if refresh_hours == 0 {
        return Ok(false);
    }
    let Some(last) = db::get_state(pool, STATE_LAST_CRAWL).await? else {
        return Ok(true);
    };
    let last = match DateTime::parse_from_rfc3339(&last) {
        Ok(last) => last.with_timezone(&Utc),
        Err(_) => return Ok(true),
    };
    // An age too large to represent never goes stale
    let Some(max_age) = i64::try_from(refresh_hours)
        .ok()
        .and_then(chrono::Duration::try_hours)
    else {
        return Ok(false);
    };
    Ok(Utc::now() - last > max_age)
}
