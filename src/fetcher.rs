//! HTTP access to the mirror behind one shared admission limiter.
//!
//! Every request the crawler, archive inspection and media pipeline make goes through a
//! [`BoundedFetcher`]. Clones share the same semaphore, so the limit holds across all tasks.

use bytes::Bytes;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;

use crate::cache::partial_path_for;
use crate::config::CrawlConfig;

/// Result of one request. Transport errors and unexpected statuses never escape as panics or `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome<T> {
    Ok(T),
    /// 404/410: the resource is gone, not worth retrying
    NotFound(u16),
    /// Timeout, connection error, other non-2xx status, local write error
    Failed(String),
}

impl<T> FetchOutcome<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            FetchOutcome::Ok(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, FetchOutcome::Ok(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FetchOutcome<U> {
        match self {
            FetchOutcome::Ok(value) => FetchOutcome::Ok(f(value)),
            FetchOutcome::NotFound(status) => FetchOutcome::NotFound(status),
            FetchOutcome::Failed(reason) => FetchOutcome::Failed(reason),
        }
    }

    /// Human-readable failure description, None on success
    pub fn failure(&self) -> Option<String> {
        match self {
            FetchOutcome::Ok(_) => None,
            FetchOutcome::NotFound(status) => Some(format!("not found (HTTP {})", status)),
            FetchOutcome::Failed(reason) => Some(reason.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, Copy)]
pub struct FetchTimeouts {
    pub listing: Duration,
    pub archive: Duration,
    pub download: Duration,
}

impl Default for FetchTimeouts {
    fn default() -> Self {
        Self {
            listing: Duration::from_secs(30),
            archive: Duration::from_secs(60),
            download: Duration::from_secs(120),
        }
    }
}

impl From<&CrawlConfig> for FetchTimeouts {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            listing: Duration::from_secs(config.listing_timeout_secs),
            archive: Duration::from_secs(config.archive_timeout_secs),
            download: Duration::from_secs(config.download_timeout_secs),
        }
    }
}

#[derive(Clone)]
pub struct BoundedFetcher {
    client: Client,
    permits: Arc<Semaphore>,
    timeouts: FetchTimeouts,
}

fn classify_status<T>(status: StatusCode) -> Option<FetchOutcome<T>> {
    if status.is_success() {
        None
    } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        Some(FetchOutcome::NotFound(status.as_u16()))
    } else {
        Some(FetchOutcome::Failed(format!("HTTP {}", status.as_u16())))
    }
}

impl BoundedFetcher {
    /// Create a fetcher allowing at most `concurrency` requests in flight
    pub fn new(concurrency: usize, timeouts: FetchTimeouts) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, concurrency, timeouts))
    }

    pub fn with_client(client: Client, concurrency: usize, timeouts: FetchTimeouts) -> Self {
        Self {
            client,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            timeouts,
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// GET a directory listing as text
    pub async fn fetch_text(&self, url: &str) -> FetchOutcome<TextResponse> {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => return FetchOutcome::Failed(format!("limiter closed: {}", e)),
        };

        let response = match self
            .client
            .get(url)
            .timeout(self.timeouts.listing)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to fetch {}: {}", url, e);
                return FetchOutcome::Failed(e.to_string());
            }
        };

        let status = response.status();
        if let Some(outcome) = classify_status(status) {
            warn!("HTTP {} for {}", status.as_u16(), url);
            return outcome;
        }

        match response.text().await {
            Ok(body) => FetchOutcome::Ok(TextResponse {
                status: status.as_u16(),
                body,
            }),
            Err(e) => {
                warn!("Failed to read body of {}: {}", url, e);
                FetchOutcome::Failed(e.to_string())
            }
        }
    }

    /// GET a whole (size-bounded) resource into memory
    pub async fn fetch_bytes(&self, url: &str) -> FetchOutcome<Bytes> {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => return FetchOutcome::Failed(format!("limiter closed: {}", e)),
        };

        let response = match self
            .client
            .get(url)
            .timeout(self.timeouts.archive)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to fetch {}: {}", url, e);
                return FetchOutcome::Failed(e.to_string());
            }
        };

        if let Some(outcome) = classify_status(response.status()) {
            warn!("HTTP {} for {}", response.status().as_u16(), url);
            return outcome;
        }

        match response.bytes().await {
            Ok(bytes) => FetchOutcome::Ok(bytes),
            Err(e) => {
                warn!("Failed to read body of {}: {}", url, e);
                FetchOutcome::Failed(e.to_string())
            }
        }
    }

    /// Stream a resource to `dest` chunk by chunk.
    ///
    /// The body is written to a temporary sibling and renamed into place once complete, so
    /// `dest` either does not exist or holds the full body. Returns the number of bytes written.
    pub async fn fetch_to_file(&self, url: &str, dest: &Path) -> FetchOutcome<u64> {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => return FetchOutcome::Failed(format!("limiter closed: {}", e)),
        };

        let mut response = match self
            .client
            .get(url)
            .timeout(self.timeouts.download)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Download error {}: {}", url, e);
                return FetchOutcome::Failed(e.to_string());
            }
        };

        if let Some(outcome) = classify_status(response.status()) {
            warn!("Download failed HTTP {}: {}", response.status().as_u16(), url);
            return outcome;
        }

        if let Some(parent) = dest.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return FetchOutcome::Failed(format!("create {}: {}", parent.display(), e));
            }
        }

        let partial = partial_path_for(dest);
        let result: Result<u64, String> = async {
            let mut file = tokio::fs::File::create(&partial)
                .await
                .map_err(|e| format!("create {}: {}", partial.display(), e))?;
            let mut written = 0u64;
            while let Some(chunk) = response.chunk().await.map_err(|e| e.to_string())? {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| format!("write {}: {}", partial.display(), e))?;
                written += chunk.len() as u64;
            }
            file.flush()
                .await
                .map_err(|e| format!("flush {}: {}", partial.display(), e))?;
            drop(file);
            tokio::fs::rename(&partial, dest)
                .await
                .map_err(|e| format!("rename into {}: {}", dest.display(), e))?;
            Ok(written)
        }
        .await;

        match result {
            Ok(written) => {
                debug!("Downloaded {} ({} bytes) to {}", url, written, dest.display());
                FetchOutcome::Ok(written)
            }
            Err(reason) => {
                warn!("Download error {}: {}", url, reason);
                let _ = tokio::fs::remove_file(&partial).await;
                FetchOutcome::Failed(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(classify_status::<()>(StatusCode::OK).is_none());
        assert_eq!(
            classify_status::<()>(StatusCode::NOT_FOUND),
            Some(FetchOutcome::NotFound(404))
        );
        assert_eq!(
            classify_status::<()>(StatusCode::GONE),
            Some(FetchOutcome::NotFound(410))
        );
        assert!(matches!(
            classify_status::<()>(StatusCode::SERVICE_UNAVAILABLE),
            Some(FetchOutcome::Failed(_))
        ));
    }
}
