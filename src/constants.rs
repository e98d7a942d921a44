/// Expected catalog schema version, stored in app_state under "version"
pub const EXPECTED_DB_VERSION: &str = "1";

pub const DEFAULT_CRAWL_CONCURRENCY: usize = 5;
pub const DEFAULT_MAX_DEPTH: u32 = 3;
pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const DEFAULT_BATCH_PAUSE_MS: u64 = 200;
pub const DEFAULT_ZIP_INSPECT_MAX_SIZE: u64 = 5 * 1024 * 1024; // 5 MB

pub const DEFAULT_DOWNLOAD_CACHE_MAX: u64 = 2 * 1024 * 1024 * 1024; // 2 GB
pub const DEFAULT_CONVERTED_CACHE_MAX: u64 = 1024 * 1024 * 1024; // 1 GB

pub const DEFAULT_RECENT_REPEAT_WINDOW: u32 = 50;

/// Everything the crawler catalogs as a track
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "ogg", "wav", "flac", "mod", "xm", "it", "s3m", "stm", "mtm", "med", "669", "far",
    "ult", "sid",
];

/// Tracker/module formats; always rendered to Ogg before streaming
pub const TRACKER_EXTENSIONS: &[&str] = &[
    "mod", "xm", "it", "s3m", "stm", "mtm", "med", "669", "far", "ult",
];

/// Lossless/uncompressed formats reduced to Ogg for bandwidth
pub const LOSSLESS_EXTENSIONS: &[&str] = &["wav", "flac"];

/// Served as downloaded
pub const DIRECT_STREAM_EXTENSIONS: &[&str] = &["mp3", "ogg"];

/// No decoder available in this deployment
pub const UNSUPPORTED_EXTENSIONS: &[&str] = &["sid"];

pub const ART_FILENAMES: &[&str] = &[
    "cover.png",
    "cover.jpg",
    "cover.gif",
    "folder.png",
    "folder.jpg",
];

pub const ARCHIVE_EXTENSION: &str = "zip";

/// Prefix marking an art reference that lives inside an archive
pub const ARCHIVE_ART_PREFIX: &str = "zip:";

/// Separator between archive URL and entry path in a track locator
pub const ARCHIVE_MEMBER_SEPARATOR: &str = "!/";

pub const MISC_COLLECTION_PREFIX: &str = "_misc_";

pub fn is_audio_extension(ext: &str) -> bool {
    AUDIO_EXTENSIONS.contains(&ext)
}

pub fn is_tracker_extension(ext: &str) -> bool {
    TRACKER_EXTENSIONS.contains(&ext)
}

pub fn is_direct_stream_extension(ext: &str) -> bool {
    DIRECT_STREAM_EXTENSIONS.contains(&ext)
}

pub fn is_unsupported_extension(ext: &str) -> bool {
    UNSUPPORTED_EXTENSIONS.contains(&ext)
}

/// Whether a format must go through the transcoder before streaming
pub fn needs_conversion(ext: &str) -> bool {
    is_tracker_extension(ext) || LOSSLESS_EXTENSIONS.contains(&ext)
}

/// Case-insensitive match against the cover art filename set
pub fn is_art_filename(name: &str) -> bool {
    let lower = name.to_lowercase();
    ART_FILENAMES.contains(&lower.as_str())
}
