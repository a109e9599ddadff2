//! Remote source fetcher
//!
//! Downloads a URL-sourced job's audio into the uploads folder, reporting
//! integer download percent while the body streams in.

use crate::utils::sanitize_filename;
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("stemdeck/", env!("CARGO_PKG_VERSION"));

/// Source acquisition errors
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A downloaded source file
#[derive(Debug, Clone)]
pub struct FetchedSource {
    pub path: PathBuf,
    /// Name to show for the project (from the URL)
    pub display_name: String,
}

/// Fetches remote audio
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Download `url` into `dest_dir`, calling `progress` with 0-100
    async fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<FetchedSource, FetchError>;
}

/// Check a URL before any work starts
pub fn validate_url(url: &str) -> Result<reqwest::Url, FetchError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(FetchError::InvalidUrl(format!("Unsupported scheme: {}", other))),
    }
}

/// Last path segment of a URL, or "download"
pub fn name_from_url(url: &reqwest::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or("download")
        .to_string()
}

/// Plain HTTP(S) GET fetcher
pub struct HttpFetcher {
    http_client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FetchError::Download(e.to_string()))?;
        Ok(Self { http_client })
    }

    async fn download_to(
        &self,
        url: reqwest::Url,
        path: &Path,
        progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<(), FetchError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| FetchError::Download(e.to_string()))?;

        let total = response.content_length().filter(|&len| len > 0);
        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;
        let mut last_percent: Option<u8> = None;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::Download(e.to_string()))?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;

            if let Some(total) = total {
                let percent = ((received * 100) / total).min(100) as u8;
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    progress(percent);
                }
            }
        }
        file.flush().await?;
        debug!(bytes = received, "Download body complete");
        Ok(())
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<FetchedSource, FetchError> {
        let parsed = validate_url(url)?;
        let display_name = name_from_url(&parsed);
        let path = dest_dir.join(format!(
            "{}_{}",
            uuid::Uuid::new_v4(),
            sanitize_filename(&display_name)
        ));

        info!(url = %url, dest = %path.display(), "Downloading source");
        if let Err(e) = self.download_to(parsed, &path, progress).await {
            if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                debug!("No partial download to remove: {}", cleanup);
            }
            warn!(url = %url, "Download failed: {}", e);
            return Err(e);
        }

        Ok(FetchedSource { path, display_name })
    }
}
