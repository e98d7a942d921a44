//! Apache-style directory index parsing.
//!
//! Handles the HTML table layout, one `<tr>` per entry:
//!
//! ```text
//! <td><a href="file.zip">file.zip</a></td><td align="right">14-Apr-2002 11:45  </td><td align="right"> 73K</td>
//! ```
//!
//! Every candidate row yields a [`RowOutcome`]; nothing here ever fails the whole listing.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static ROW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").expect("valid row regex"));

static HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<a href="([^"]+)">"#).expect("valid href regex"));

static ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"(?i)<a href="([^"]+)">([^<]+)</a></td>"#,
        r"\s*<td[^>]*>\s*(\d{2}-\w{3}-\d{4}\s+\d{2}:\d{2}|\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2})\s*</td>",
        r"\s*<td[^>]*>\s*([\d.]+[KMG]?|-)\s*</td>",
    ))
    .expect("valid entry regex")
});

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingDir {
    /// Decoded name without the trailing slash
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingFile {
    /// Decoded file name
    pub name: String,
    pub url: String,
    /// Lowercase extension, empty when the name has no dot
    pub ext: String,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingEntry {
    Dir(ListingDir),
    File(ListingFile),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// `?C=N;O=D` style sort/pagination links
    QueryLink,
    /// Parent directory and other server-absolute links
    AbsoluteLink,
    /// Row has a link but not the name/date/size column layout
    Unmatched,
    /// Percent-encoding does not decode to UTF-8
    UndecodableName,
    /// Link cannot be resolved against the listing URL
    InvalidUrl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    pub href: Option<String>,
    pub reason: SkipReason,
}

pub type RowOutcome = Result<ListingEntry, SkippedRow>;

/// Parsed directory listing, in document order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub dirs: Vec<ListingDir>,
    pub files: Vec<ListingFile>,
    pub skipped: Vec<SkippedRow>,
}

/// Parse a size column token: `73K` is 73 * 1024, `-` is unknown, bare digits are bytes
pub fn parse_size(token: &str) -> Option<u64> {
    let token = token.trim();
    if token == "-" {
        return None;
    }

    let multiplier = match token.chars().last()?.to_ascii_uppercase() {
        'K' => Some(1024u64),
        'M' => Some(1024 * 1024),
        'G' => Some(1024 * 1024 * 1024),
        _ => None,
    };

    match multiplier {
        Some(mult) => {
            let value: f64 = token[..token.len() - 1].parse().ok()?;
            if value < 0.0 {
                return None;
            }
            Some((value * mult as f64) as u64)
        }
        None => token.parse().ok(),
    }
}

/// Display title from a file name: drop the extension, turn `_`/`-` into spaces, collapse whitespace
pub fn clean_title(filename: &str) -> String {
    let stem = match filename.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => filename,
    };
    let spaced = stem.replace(['_', '-'], " ");
    let title = WHITESPACE_RE.replace_all(&spaced, " ").trim().to_string();
    if title.is_empty() {
        filename.to_string()
    } else {
        title
    }
}

/// Lowercase extension of a (decoded) file name
pub fn extension_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_lowercase(),
        None => String::new(),
    }
}

fn parse_row(row: &str, base: &Url) -> Option<RowOutcome> {
    // Rows without data cells (headers, separators) are not entries at all
    if !row.to_ascii_lowercase().contains("<td") {
        return None;
    }
    let href = HREF_RE.captures(row)?.get(1)?.as_str().to_string();

    let skip = |reason| {
        Some(Err(SkippedRow {
            href: Some(href.clone()),
            reason,
        }))
    };

    if href.starts_with('?') {
        return skip(SkipReason::QueryLink);
    }
    if href.starts_with('/') {
        return skip(SkipReason::AbsoluteLink);
    }

    let caps = match ENTRY_RE.captures(row) {
        Some(caps) => caps,
        None => return skip(SkipReason::Unmatched),
    };
    let size_token = caps.get(4).map(|m| m.as_str()).unwrap_or("-");

    let decoded = match urlencoding::decode(&href) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => return skip(SkipReason::UndecodableName),
    };

    let url = match base.join(&href) {
        Ok(url) => url.to_string(),
        Err(_) => return skip(SkipReason::InvalidUrl),
    };

    if href.ends_with('/') {
        Some(Ok(ListingEntry::Dir(ListingDir {
            name: decoded.trim_end_matches('/').to_string(),
            url,
        })))
    } else {
        Some(Ok(ListingEntry::File(ListingFile {
            ext: extension_of(&decoded),
            name: decoded,
            url,
            size: parse_size(size_token),
        })))
    }
}

/// Classify every candidate row of a listing page
///
/// Returns an empty list when `base_url` itself is not a valid URL.
pub fn parse_listing_rows(html: &str, base_url: &str) -> Vec<RowOutcome> {
    let base = match Url::parse(base_url) {
        Ok(base) => base,
        Err(_) => return Vec::new(),
    };

    let rows: Vec<&str> = ROW_RE
        .captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();

    if rows.is_empty() {
        // Some servers omit <tr>; fall back to one candidate per line
        html.lines().filter_map(|line| parse_row(line, &base)).collect()
    } else {
        rows.into_iter().filter_map(|row| parse_row(row, &base)).collect()
    }
}

/// Parse a listing into subdirectories and files, recording skipped rows
pub fn parse_listing(html: &str, base_url: &str) -> Listing {
    let mut listing = Listing::default();
    for outcome in parse_listing_rows(html, base_url) {
        match outcome {
            Ok(ListingEntry::Dir(dir)) => listing.dirs.push(dir),
            Ok(ListingEntry::File(file)) => listing.files.push(file),
            Err(skipped) => listing.skipped.push(skipped),
        }
    }
    listing
}
