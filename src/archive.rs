//! ZIP archive inspection: enumerate members, pick out audio and cover art, extract one entry.

use serde::Serialize;
use std::io::{Cursor, Read};
use thiserror::Error;

use crate::constants::{
    is_art_filename, is_audio_extension, ARCHIVE_ART_PREFIX, ARCHIVE_EXTENSION,
    ARCHIVE_MEMBER_SEPARATOR,
};
use crate::listing::extension_of;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("corrupt archive: {0}")]
    Corrupt(#[from] zip::result::ZipError),
    #[error("entry '{0}' not found in archive")]
    MissingEntry(String),
    #[error("failed to read entry '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// One file inside a remote archive, addressed by archive URL and in-archive path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ArchiveMember {
    #[serde(rename = "source_zip_url")]
    pub archive_url: String,
    #[serde(rename = "path_in_zip")]
    pub entry_path: String,
}

impl ArchiveMember {
    pub fn new(archive_url: impl Into<String>, entry_path: impl Into<String>) -> Self {
        Self {
            archive_url: archive_url.into(),
            entry_path: entry_path.into(),
        }
    }

    /// `<archive_url>!/<entry_path>`, the track's unique remote locator
    pub fn locator(&self) -> String {
        format!(
            "{}{}{}",
            self.archive_url, ARCHIVE_MEMBER_SEPARATOR, self.entry_path
        )
    }

    /// Last path component of the entry
    pub fn leaf_name(&self) -> &str {
        self.entry_path
            .rsplit('/')
            .next()
            .unwrap_or(self.entry_path.as_str())
    }

    /// Split a locator on the first `!/` that follows the `.zip` archive URL
    pub fn parse_locator(locator: &str) -> Option<Self> {
        let marker = format!(".{}{}", ARCHIVE_EXTENSION, ARCHIVE_MEMBER_SEPARATOR);
        let lower = locator.to_ascii_lowercase();
        let pos = lower.find(&marker)?;
        let split_at = pos + 1 + ARCHIVE_EXTENSION.len();
        let archive_url = &locator[..split_at];
        let entry_path = &locator[split_at + ARCHIVE_MEMBER_SEPARATOR.len()..];
        if entry_path.is_empty() {
            return None;
        }
        Some(Self::new(archive_url, entry_path))
    }

    /// `zip:<locator>`, stored as a collection's art reference
    pub fn art_reference(&self) -> String {
        format!("{}{}", ARCHIVE_ART_PREFIX, self.locator())
    }

    pub fn parse_art_reference(reference: &str) -> Option<Self> {
        reference
            .strip_prefix(ARCHIVE_ART_PREFIX)
            .and_then(Self::parse_locator)
    }
}

/// A non-directory entry in an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub ext: String,
    pub size: u64,
}

/// What an archive contributes to its collection
#[derive(Debug, Default)]
pub struct ArchiveContents {
    pub audio: Vec<(ArchiveMember, ArchiveEntry)>,
    /// First entry matching the cover art filename set, if any
    pub art: Option<ArchiveMember>,
}

/// List every file entry (directories skipped) in archive order
pub fn list_entries(bytes: &[u8]) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut entries = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let path = file.name().to_string();
        let leaf = path.rsplit('/').next().unwrap_or(path.as_str());
        entries.push(ArchiveEntry {
            ext: extension_of(leaf),
            size: file.size(),
            path,
        });
    }

    Ok(entries)
}

/// Read one entry's bytes
pub fn extract(bytes: &[u8], entry_path: &str) -> Result<Vec<u8>, ArchiveError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut file = match archive.by_name(entry_path) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(ArchiveError::MissingEntry(entry_path.to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    // The declared size comes from the archive header; never reserve far beyond the input
    let capacity = file.size().min(bytes.len() as u64 * 64);
    let mut data = Vec::with_capacity(capacity as usize);
    file.read_to_end(&mut data).map_err(|source| ArchiveError::Read {
        path: entry_path.to_string(),
        source,
    })?;
    Ok(data)
}

/// Classify an archive's entries into audio members and the first art member
pub fn inspect(bytes: &[u8], archive_url: &str) -> Result<ArchiveContents, ArchiveError> {
    let mut contents = ArchiveContents::default();

    for entry in list_entries(bytes)? {
        let member = ArchiveMember::new(archive_url, entry.path.as_str());
        if is_audio_extension(&entry.ext) {
            contents.audio.push((member, entry));
        } else if contents.art.is_none() && is_art_filename(member.leaf_name()) {
            contents.art = Some(member);
        }
    }

    Ok(contents)
}
