//! On-demand media preparation: raw acquisition into the download cache, transcoding into the
//! converted cache, and cover art.

use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

use crate::archive::{self, ArchiveMember};
use crate::cache::{partial_path_for, write_atomic, CacheDir};
use crate::config::{AppConfig, TranscoderConfig};
use crate::constants::{is_direct_stream_extension, is_unsupported_extension, needs_conversion};
use crate::db::DynError;
use crate::fetcher::{BoundedFetcher, FetchOutcome};
use crate::models::{Track, TrackSource};

#[derive(Debug, Error)]
pub enum MediaError {
    /// Permanent: no decoder for this format
    #[error("format '{0}' is not supported")]
    Unsupported(String),
    #[error("track unavailable: {0}")]
    Unavailable(String),
    #[error("transcoding failed: {0}")]
    Transcode(String),
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("catalog store error: {0}")]
    Store(DynError),
}

impl From<DynError> for MediaError {
    fn from(e: DynError) -> Self {
        MediaError::Store(e)
    }
}

/// Keep a cache file name to one safe path component
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "track".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn raw_file_name(track: &Track) -> String {
    format!("{}_{}", track.id, sanitize_filename(&track.filename))
}

pub fn converted_file_name(track_id: i64) -> String {
    format!("{}.ogg", track_id)
}

pub fn content_type_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "ogg" => "audio/ogg",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

/// Image type from magic bytes; PNG when unrecognised
pub fn sniff_image_type(data: &[u8]) -> &'static str {
    if data.starts_with(&[0xff, 0xd8, 0xff]) {
        "image/jpeg"
    } else if data.starts_with(b"GIF8") {
        "image/gif"
    } else {
        "image/png"
    }
}

/// External transcoder producing Ogg Vorbis
#[derive(Debug, Clone)]
pub struct Transcoder {
    program: PathBuf,
    max_duration_secs: u64,
    quality: String,
    timeout: Duration,
}

impl Transcoder {
    pub fn new(config: &TranscoderConfig) -> Self {
        Self {
            program: config.program.clone(),
            max_duration_secs: config.max_duration_secs,
            quality: config.quality.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Convert `input` into `output`. The output only appears once the transcoder exited 0 and
    /// produced a non-empty file; otherwise nothing is left behind.
    pub async fn convert(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
        let partial = partial_path_for(output);
        let result = self.run(input, &partial).await;

        let result = match result {
            Ok(()) => match tokio::fs::metadata(&partial).await {
                Ok(meta) if meta.len() > 0 => tokio::fs::rename(&partial, output)
                    .await
                    .map_err(MediaError::from),
                _ => Err(MediaError::Transcode(format!(
                    "{} produced no output for {}",
                    self.program.display(),
                    input.display()
                ))),
            },
            Err(e) => Err(e),
        };

        if result.is_err() {
            let _ = tokio::fs::remove_file(&partial).await;
        }
        result
    }

    async fn run(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
        let mut command = Command::new(&self.program);
        command
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-t")
            .arg(self.max_duration_secs.to_string())
            .arg("-c:a")
            .arg("libvorbis")
            .arg("-q:a")
            .arg(&self.quality)
            .arg("-vn")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            MediaError::Transcode(format!("failed to start {}: {}", self.program.display(), e))
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(MediaError::Transcode(e.to_string())),
            Err(_) => {
                warn!("Transcoder timed out for {}", input.display());
                return Err(MediaError::Transcode(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = {
                let chars: Vec<char> = stderr.chars().collect();
                chars[chars.len().saturating_sub(500)..].iter().collect()
            };
            warn!("Transcoder failed for {}: {}", input.display(), tail.trim());
            return Err(MediaError::Transcode(format!("exit status {}", output.status)));
        }

        Ok(())
    }
}

/// Turns catalog tracks into local files that can be streamed
#[derive(Clone)]
pub struct MediaPipeline {
    fetcher: BoundedFetcher,
    raw: CacheDir,
    converted: CacheDir,
    art_dir: PathBuf,
    transcoder: Transcoder,
}

impl MediaPipeline {
    pub fn new(
        fetcher: BoundedFetcher,
        raw: CacheDir,
        converted: CacheDir,
        art_dir: PathBuf,
        transcoder: Transcoder,
    ) -> Self {
        Self {
            fetcher,
            raw,
            converted,
            art_dir,
            transcoder,
        }
    }

    pub fn from_config(config: &AppConfig, fetcher: BoundedFetcher) -> Self {
        Self::new(
            fetcher,
            CacheDir::new(&config.cache.download_dir, config.cache.download_max_bytes),
            CacheDir::new(&config.cache.converted_dir, config.cache.converted_max_bytes),
            config.cache.art_dir.clone(),
            Transcoder::new(&config.transcoder),
        )
    }

    pub fn raw_cache(&self) -> &CacheDir {
        &self.raw
    }

    pub fn converted_cache(&self) -> &CacheDir {
        &self.converted
    }

    pub fn raw_path(&self, track: &Track) -> PathBuf {
        self.raw.path_for(&raw_file_name(track))
    }

    pub fn converted_path(&self, track: &Track) -> PathBuf {
        self.converted.path_for(&converted_file_name(track.id))
    }

    /// Return a local file ready for streaming, downloading and transcoding on demand
    pub async fn prepare_track(&self, track: &Track) -> Result<PathBuf, MediaError> {
        if is_unsupported_extension(&track.format) {
            info!("Skipping unsupported {} file: {}", track.format, track.filename);
            return Err(MediaError::Unsupported(track.format.clone()));
        }

        let converted = self.converted_path(track);
        if tokio::fs::try_exists(&converted).await? {
            self.converted.touch(&converted).await;
            return Ok(converted);
        }

        let raw = self.raw_path(track);
        if is_direct_stream_extension(&track.format) && tokio::fs::try_exists(&raw).await? {
            self.raw.touch(&raw).await;
            return Ok(raw);
        }

        let raw = self.acquire_raw(track).await?;

        if needs_conversion(&track.format) {
            self.converted.evict().await?;
            self.transcoder.convert(&raw, &converted).await?;
            info!("Converted track {} to {}", track.id, converted.display());
            return Ok(converted);
        }

        Ok(raw)
    }

    /// Return the untouched source file, downloading it if needed
    pub async fn fetch_original(&self, track: &Track) -> Result<PathBuf, MediaError> {
        if is_unsupported_extension(&track.format) {
            return Err(MediaError::Unsupported(track.format.clone()));
        }
        self.acquire_raw(track).await
    }

    async fn acquire_raw(&self, track: &Track) -> Result<PathBuf, MediaError> {
        let dest = self.raw_path(track);
        if tokio::fs::try_exists(&dest).await? {
            self.raw.touch(&dest).await;
            return Ok(dest);
        }

        self.raw.evict().await?;

        match &track.source {
            TrackSource::Direct => match self.fetcher.fetch_to_file(&track.remote_url, &dest).await {
                FetchOutcome::Ok(bytes) => {
                    debug!("Downloaded track {} ({} bytes)", track.id, bytes);
                }
                other => {
                    return Err(MediaError::Unavailable(format!(
                        "{}: {}",
                        track.remote_url,
                        other.failure().unwrap_or_default()
                    )))
                }
            },
            TrackSource::Archived(member) => {
                let data = self.extract_member(member).await?;
                write_atomic(&dest, &data).await?;
                debug!("Extracted track {} ({} bytes)", track.id, data.len());
            }
        }

        Ok(dest)
    }

    async fn extract_member(&self, member: &ArchiveMember) -> Result<Vec<u8>, MediaError> {
        let bytes = match self.fetcher.fetch_bytes(&member.archive_url).await {
            FetchOutcome::Ok(bytes) => bytes,
            other => {
                return Err(MediaError::Unavailable(format!(
                    "{}: {}",
                    member.archive_url,
                    other.failure().unwrap_or_default()
                )))
            }
        };

        let entry_path = member.entry_path.clone();
        let extracted = tokio::task::spawn_blocking(move || archive::extract(&bytes, &entry_path))
            .await
            .map_err(|e| MediaError::Unavailable(format!("extraction task failed: {}", e)))?;

        extracted.map_err(|e| {
            warn!("ZIP extraction error for {}: {}", member.locator(), e);
            MediaError::Unavailable(e.to_string())
        })
    }

    /// Cover art for a collection, cached as `<art_dir>/<collection_id>.img`.
    /// Returns the image bytes and their sniffed content type.
    pub async fn fetch_art(
        &self,
        collection_id: i64,
        art_url: &str,
    ) -> Result<(Vec<u8>, &'static str), MediaError> {
        let cached = self.art_dir.join(format!("{}.img", collection_id));
        if let Ok(data) = tokio::fs::read(&cached).await {
            let content_type = sniff_image_type(&data);
            return Ok((data, content_type));
        }

        let data = match ArchiveMember::parse_art_reference(art_url) {
            Some(member) => self.extract_member(&member).await?,
            None => match self.fetcher.fetch_bytes(art_url).await {
                FetchOutcome::Ok(bytes) => bytes.to_vec(),
                other => {
                    return Err(MediaError::Unavailable(format!(
                        "{}: {}",
                        art_url,
                        other.failure().unwrap_or_default()
                    )))
                }
            },
        };

        write_atomic(&cached, &data).await?;
        let content_type = sniff_image_type(&data);
        Ok((data, content_type))
    }
}
