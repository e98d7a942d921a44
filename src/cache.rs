//! Byte-budgeted flat cache directories with least-recently-accessed eviction.

use log::{debug, info, warn};
use rand::Rng;
use std::fs::{self, FileTimes};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Hidden temporary sibling of `dest` for an in-flight write. The original extension is kept
/// last so tools that infer the format from the name still see it.
pub fn partial_path_for(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let suffix: u32 = rand::thread_rng().gen();
    match dest.extension() {
        Some(ext) => dest.with_file_name(format!(
            ".{}.{:08x}.part.{}",
            name,
            suffix,
            ext.to_string_lossy()
        )),
        None => dest.with_file_name(format!(".{}.{:08x}.part", name, suffix)),
    }
}

/// Write `data` to a temporary sibling, then rename it over `dest`
pub async fn write_atomic(dest: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = partial_path_for(dest);
    let result = async {
        tokio::fs::write(&partial, data).await?;
        tokio::fs::rename(&partial, dest).await
    }
    .await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&partial).await;
    }
    result
}

/// Whether a file name is an in-flight write made through [`partial_path_for`]
pub fn is_partial_name(name: &str) -> bool {
    name.starts_with('.') && (name.ends_with(".part") || name.contains(".part."))
}

#[derive(Debug, Clone)]
pub struct CacheDir {
    dir: PathBuf,
    budget: u64,
}

struct CachedFile {
    path: PathBuf,
    size: u64,
    accessed: SystemTime,
    partial: bool,
}

impl CacheDir {
    pub fn new(dir: impl Into<PathBuf>, budget: u64) -> Self {
        Self {
            dir: dir.into(),
            budget,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Regular files directly inside the directory, in-flight `.part` files included
    async fn files(&self) -> io::Result<Vec<CachedFile>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            // The file may vanish between listing and stat
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            if !metadata.is_file() {
                continue;
            }
            let accessed = metadata
                .accessed()
                .or_else(|_| metadata.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            files.push(CachedFile {
                partial: is_partial_name(&entry.file_name().to_string_lossy()),
                path: entry.path(),
                size: metadata.len(),
                accessed,
            });
        }
        Ok(files)
    }

    /// Total bytes of regular files at the top level
    pub async fn current_size(&self) -> io::Result<u64> {
        Ok(self.files().await?.iter().map(|f| f.size).sum())
    }

    /// Remove least-recently-accessed files until the total is within budget.
    /// In-flight writes count toward the total but are never removed.
    /// Returns the number of files removed.
    pub async fn evict(&self) -> io::Result<usize> {
        let files = self.files().await?;
        let mut total: u64 = files.iter().map(|f| f.size).sum();
        if total <= self.budget {
            return Ok(0);
        }

        let before = total;
        let mut candidates: Vec<CachedFile> = files.into_iter().filter(|f| !f.partial).collect();
        candidates.sort_by_key(|f| f.accessed);

        let mut removed = 0;
        for file in candidates {
            if total <= self.budget {
                break;
            }
            match tokio::fs::remove_file(&file.path).await {
                Ok(()) => {
                    debug!("Evicted {} ({} bytes)", file.path.display(), file.size);
                    removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Failed to evict {}: {}", file.path.display(), e);
                    continue;
                }
            }
            total = total.saturating_sub(file.size);
        }

        info!(
            "LRU eviction in {}: removed {} files (cache size: {} -> {} bytes)",
            self.dir.display(),
            removed,
            before,
            total
        );
        Ok(removed)
    }

    /// Mark a cached file as just used. Filesystems mounted relatime do not update atime on
    /// every read, so cache hits set it explicitly.
    pub async fn touch(&self, path: &Path) {
        let path = path.to_path_buf();
        let result = tokio::task::spawn_blocking(move || {
            fs::File::options()
                .append(true)
                .open(&path)
                .and_then(|file| file.set_times(FileTimes::new().set_accessed(SystemTime::now())))
                .map_err(|e| (path, e))
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err((path, e))) => {
                debug!("Could not update access time of {}: {}", path.display(), e)
            }
            Err(e) => debug!("Access time update task failed: {}", e),
        }
    }
}
