use sea_query::Iden;

/// App state table - key-value store for schema version, crawl status and playback position
#[derive(Iden)]
pub enum AppState {
    Table,
    Key,
    Value,
}

/// Categories table - top-level remote groupings
#[derive(Iden)]
pub enum Categories {
    Table,
    Id,
    Name,
    RemotePath,
}

/// Collections table - directory-like groupings under a category
#[derive(Iden)]
pub enum Collections {
    Table,
    Id,
    CategoryId,
    Name,
    RemotePath,
    ArtUrl,
    TrackCount,
    CrawledAt,
}

/// Tracks table - playable units, direct or archive-embedded
#[derive(Iden)]
pub enum Tracks {
    Table,
    Id,
    CollectionId,
    Filename,
    Title,
    RemoteUrl,
    Format,
    SourceType,
    SourceZipUrl,
    PathInZip,
    FileSize,
    Upvoted,
    PlayCount,
}

/// Shuffle history table - append-only play log
#[derive(Iden)]
pub enum ShuffleHistory {
    Table,
    Id,
    TrackId,
    PlayedAt,
}

/// Crawl log table - one row per visited URL
#[derive(Iden)]
pub enum CrawlLog {
    Table,
    Url,
    CrawledAt,
    StatusCode,
}
