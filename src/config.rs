use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::constants::{
    DEFAULT_BATCH_PAUSE_MS, DEFAULT_BATCH_SIZE, DEFAULT_CONVERTED_CACHE_MAX,
    DEFAULT_CRAWL_CONCURRENCY, DEFAULT_DOWNLOAD_CACHE_MAX, DEFAULT_MAX_DEPTH,
    DEFAULT_RECENT_REPEAT_WINDOW, DEFAULT_ZIP_INSPECT_MAX_SIZE,
};

fn default_mirror_base_url() -> String {
    "http://128.237.157.9/pub/scene.org/music/".to_string()
}

fn default_categories() -> Vec<String> {
    ["artists", "groups", "compos", "compilations", "disks"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_api_port() -> u16 {
    3000
}

/// Top-level configuration file structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Root URL of the remote directory index (must end with '/')
    #[serde(default = "default_mirror_base_url")]
    pub mirror_base_url: String,
    /// Category subdirectories under the mirror root to crawl, in order
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    /// Directory holding the SQLite catalog (default: data)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// API server port (default: 3000)
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub shuffle: ShuffleConfig,
}

/// On-disk cache layout and byte budgets (maps to [cache] section in TOML)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Raw downloads (default: cache/downloads)
    pub download_dir: PathBuf,
    /// Transcoded audio (default: cache/converted)
    pub converted_dir: PathBuf,
    /// Collection cover art (default: cache/art)
    pub art_dir: PathBuf,
    pub download_max_bytes: u64,
    pub converted_max_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("cache/downloads"),
            converted_dir: PathBuf::from("cache/converted"),
            art_dir: PathBuf::from("cache/art"),
            download_max_bytes: DEFAULT_DOWNLOAD_CACHE_MAX,
            converted_max_bytes: DEFAULT_CONVERTED_CACHE_MAX,
        }
    }
}

/// Crawler tuning (maps to [crawl] section in TOML)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Maximum concurrent outbound requests to the mirror
    pub concurrency: usize,
    /// Maximum recursion depth below a collection root
    pub max_depth: u32,
    /// Number of sibling collections crawled concurrently
    pub batch_size: usize,
    /// Pause between batches in milliseconds
    pub batch_pause_ms: u64,
    /// ZIP archives larger than this (or of unknown size) are not inspected
    pub zip_inspect_max_size: u64,
    pub listing_timeout_secs: u64,
    pub archive_timeout_secs: u64,
    pub download_timeout_secs: u64,
    /// Catalog age after which `serve --crawl` is worth running again
    pub refresh_hours: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CRAWL_CONCURRENCY,
            max_depth: DEFAULT_MAX_DEPTH,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pause_ms: DEFAULT_BATCH_PAUSE_MS,
            zip_inspect_max_size: DEFAULT_ZIP_INSPECT_MAX_SIZE,
            listing_timeout_secs: 30,
            archive_timeout_secs: 60,
            download_timeout_secs: 120,
            refresh_hours: 24,
        }
    }
}

/// External transcoder invocation (maps to [transcoder] section in TOML)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    /// Executable name or path (default: ffmpeg)
    pub program: PathBuf,
    /// Output is cut at this many seconds (looping tracker modules never end)
    pub max_duration_secs: u64,
    /// Vorbis quality passed as -q:a
    pub quality: String,
    /// Wall-clock limit for one conversion
    pub timeout_secs: u64,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            max_duration_secs: 600,
            quality: "5".to_string(),
            timeout_secs: 300,
        }
    }
}

/// Shuffle behaviour (maps to [shuffle] section in TOML)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShuffleConfig {
    /// Avoid replaying any of the last N history entries
    pub recent_window: u32,
}

impl Default for ShuffleConfig {
    fn default() -> Self {
        Self {
            recent_window: DEFAULT_RECENT_REPEAT_WINDOW,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mirror_base_url: default_mirror_base_url(),
            categories: default_categories(),
            data_dir: default_data_dir(),
            api_port: default_api_port(),
            cache: CacheConfig::default(),
            crawl: CrawlConfig::default(),
            transcoder: TranscoderConfig::default(),
            shuffle: ShuffleConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load and validate a TOML configuration file
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate values that would otherwise stall or misdirect the crawler
    pub fn validate(&self) -> Result<(), String> {
        let base = url::Url::parse(&self.mirror_base_url)
            .map_err(|e| format!("Invalid mirror_base_url '{}': {}", self.mirror_base_url, e))?;
        if !base.path().ends_with('/') {
            return Err(format!(
                "mirror_base_url must end with '/', got '{}'",
                self.mirror_base_url
            ));
        }

        if self.categories.is_empty() {
            return Err("categories must list at least one category".to_string());
        }

        if self.crawl.concurrency == 0 {
            return Err("crawl.concurrency must be at least 1".to_string());
        }

        if self.crawl.batch_size == 0 {
            return Err("crawl.batch_size must be at least 1".to_string());
        }

        if self.shuffle.recent_window == 0 {
            return Err("shuffle.recent_window must be at least 1".to_string());
        }

        Ok(())
    }

    /// Absolute URL of a category listing
    pub fn category_url(&self, category: &str) -> String {
        format!("{}{}/", self.mirror_base_url, category)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("music.db")
    }

    /// Create every directory the catalog and caches write into
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [
            &self.data_dir,
            &self.cache.download_dir,
            &self.cache.converted_dir,
            &self.cache.art_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
