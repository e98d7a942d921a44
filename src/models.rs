//! Catalog records as read from and written to the store.

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::archive::ArchiveMember;
use crate::listing::clean_title;

/// Where a track's bytes come from. Archived tracks always carry both archive URL and entry path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source_type", rename_all = "lowercase")]
pub enum TrackSource {
    Direct,
    Archived(ArchiveMember),
}

impl TrackSource {
    /// Value stored in tracks.source_type
    pub fn kind(&self) -> &'static str {
        match self {
            TrackSource::Direct => "direct",
            TrackSource::Archived(_) => "archived",
        }
    }
}

/// A track about to be inserted by the crawler
#[derive(Debug, Clone)]
pub struct NewTrack {
    pub collection_id: i64,
    pub filename: String,
    pub title: String,
    /// Plain URL for direct tracks; ignored for archived ones (derived from the member)
    pub url: String,
    pub format: String,
    pub source: TrackSource,
    pub file_size: Option<i64>,
}

impl NewTrack {
    pub fn direct(
        collection_id: i64,
        filename: &str,
        url: &str,
        format: &str,
        file_size: Option<u64>,
    ) -> Self {
        Self {
            collection_id,
            filename: filename.to_string(),
            title: clean_title(filename),
            url: url.to_string(),
            format: format.to_string(),
            source: TrackSource::Direct,
            file_size: file_size.map(|s| s as i64),
        }
    }

    pub fn archived(
        collection_id: i64,
        member: ArchiveMember,
        format: &str,
        file_size: Option<u64>,
    ) -> Self {
        let filename = member.leaf_name().to_string();
        Self {
            collection_id,
            title: clean_title(&filename),
            filename,
            url: member.locator(),
            format: format.to_string(),
            source: TrackSource::Archived(member),
            file_size: file_size.map(|s| s as i64),
        }
    }

    /// Globally unique remote locator
    pub fn remote_url(&self) -> String {
        match &self.source {
            TrackSource::Direct => self.url.clone(),
            TrackSource::Archived(member) => member.locator(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub id: i64,
    pub collection_id: i64,
    pub filename: String,
    pub title: String,
    #[serde(skip)]
    pub remote_url: String,
    pub format: String,
    #[serde(flatten)]
    pub source: TrackSource,
    pub file_size: Option<i64>,
    pub upvoted: bool,
    pub play_count: i64,
}

impl Track {
    pub fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let source_type: String = row.try_get("source_type")?;
        let source = match source_type.as_str() {
            "direct" => TrackSource::Direct,
            "archived" => {
                let archive_url: Option<String> = row.try_get("source_zip_url")?;
                let entry_path: Option<String> = row.try_get("path_in_zip")?;
                match (archive_url, entry_path) {
                    (Some(archive_url), Some(entry_path)) => TrackSource::Archived(ArchiveMember {
                        archive_url,
                        entry_path,
                    }),
                    _ => {
                        return Err(sqlx::Error::Decode(
                            "archived track is missing its archive URL or entry path".into(),
                        ))
                    }
                }
            }
            other => {
                return Err(sqlx::Error::Decode(
                    format!("unknown source_type '{}'", other).into(),
                ))
            }
        };

        Ok(Self {
            id: row.try_get("id")?,
            collection_id: row.try_get("collection_id")?,
            filename: row.try_get("filename")?,
            title: row.try_get("title")?,
            remote_url: row.try_get("remote_url")?,
            format: row.try_get("format")?,
            source,
            file_size: row.try_get("file_size")?,
            upvoted: row.try_get::<i64, _>("upvoted")? != 0,
            play_count: row.try_get("play_count")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Collection {
    pub id: i64,
    pub category_id: i64,
    pub name: String,
    pub remote_path: String,
    pub art_url: Option<String>,
    pub track_count: i64,
    pub crawled_at: Option<String>,
}

impl Collection {
    pub fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            category_id: row.try_get("category_id")?,
            name: row.try_get("name")?,
            remote_path: row.try_get("remote_path")?,
            art_url: row.try_get("art_url")?,
            track_count: row.try_get("track_count")?,
            crawled_at: row.try_get("crawled_at")?,
        })
    }
}

/// Category with derived counts, for browsing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySummary {
    pub id: i64,
    pub name: String,
    pub collection_count: i64,
    pub track_count: i64,
}

impl CategorySummary {
    pub fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            collection_count: row.try_get("collection_count")?,
            track_count: row.try_get("track_count")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionDetail {
    #[serde(flatten)]
    pub collection: Collection,
    pub category_name: String,
    pub tracks: Vec<Track>,
}

/// Snapshot of catalog and cache state
#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogStatus {
    pub crawl_status: String,
    pub total_categories: i64,
    pub total_collections: i64,
    pub total_tracks: i64,
    pub upvoted_count: i64,
    pub download_cache_mb: f64,
    pub converted_cache_mb: f64,
}
