//! Source image retrieval
//!
//! Sources are either `http(s)://` URLs, downloaded with `reqwest`, or
//! local files given as `file://` URLs or plain paths. Whether a local
//! source may be served at all is decided by `DomainPolicy`; remote hosts on
//! internal addresses are refused here unless private sources are allowed.

use crate::ssrf::{check_remote_source, is_internal_host};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum SourceFetchError {
    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("Source {url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("Source exceeds the maximum size of {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Source address is not allowed: {0}")]
    Blocked(String),

    #[error("Invalid source reference: {0}")]
    InvalidSource(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Copies a source image into a local working file
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Write the source to `destination` and return the number of bytes.
    async fn fetch(&self, source: &str, destination: &Path) -> Result<u64, SourceFetchError>;
}

pub fn is_remote(source: &str) -> bool {
    let lower = source.to_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Local path of a non-remote source
fn local_path(source: &str) -> Result<PathBuf, SourceFetchError> {
    if source.starts_with("file://") {
        let url = reqwest::Url::parse(source)
            .map_err(|e| SourceFetchError::InvalidSource(format!("{}: {}", source, e)))?;
        return url
            .to_file_path()
            .map_err(|_| SourceFetchError::InvalidSource(source.to_string()));
    }
    Ok(PathBuf::from(source))
}

/// `SourceFetcher` for HTTP(S) URLs and local files
#[derive(Clone)]
pub struct HttpSourceFetcher {
    client: reqwest::Client,
    max_size_bytes: usize,
    allow_private: bool,
}

const MAX_REDIRECTS: usize = 5;

fn redirect_policy(allow_private: bool) -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if !allow_private && attempt.url().host_str().is_some_and(is_internal_host) {
            attempt.error("redirect to an internal address")
        } else {
            attempt.follow()
        }
    })
}

impl HttpSourceFetcher {
    /// `allow_private` lets remote sources live on internal addresses.
    pub fn new(
        timeout: Duration,
        max_size_bytes: usize,
        allow_private: bool,
    ) -> Result<Self, SourceFetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("refract/", env!("CARGO_PKG_VERSION")))
            .redirect(redirect_policy(allow_private))
            .build()
            .map_err(|e| SourceFetchError::Request(e.to_string()))?;

        Ok(Self {
            client,
            max_size_bytes,
            allow_private,
        })
    }

    async fn fetch_remote(&self, url: &str, destination: &Path) -> Result<u64, SourceFetchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| SourceFetchError::InvalidSource(format!("{}: {}", url, e)))?;
        if !self.allow_private {
            check_remote_source(&parsed).await?;
        }

        let mut response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| SourceFetchError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceFetchError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(SourceFetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(length) = response.content_length() {
            if length > self.max_size_bytes as u64 {
                return Err(SourceFetchError::TooLarge {
                    limit: self.max_size_bytes,
                });
            }
        }

        let mut file = fs::File::create(destination).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| SourceFetchError::Request(e.to_string()))?
        {
            written += chunk.len() as u64;
            if written > self.max_size_bytes as u64 {
                return Err(SourceFetchError::TooLarge {
                    limit: self.max_size_bytes,
                });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(written)
    }

    async fn fetch_local(&self, source: &str, destination: &Path) -> Result<u64, SourceFetchError> {
        let path = local_path(source)?;
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceFetchError::NotFound(source.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if !metadata.is_file() {
            return Err(SourceFetchError::InvalidSource(format!(
                "{} is not a file",
                source
            )));
        }
        if metadata.len() > self.max_size_bytes as u64 {
            return Err(SourceFetchError::TooLarge {
                limit: self.max_size_bytes,
            });
        }

        Ok(fs::copy(&path, destination).await?)
    }
}

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    async fn fetch(&self, source: &str, destination: &Path) -> Result<u64, SourceFetchError> {
        let start = std::time::Instant::now();
        let size = if is_remote(source) {
            self.fetch_remote(source, destination).await?
        } else {
            self.fetch_local(source, destination).await?
        };

        tracing::debug!(
            source = %source,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Source fetched"
        );
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fetcher(max: usize) -> HttpSourceFetcher {
        HttpSourceFetcher::new(Duration::from_secs(5), max, false).unwrap()
    }

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://cdn.test/a.jpg"));
        assert!(is_remote("HTTP://cdn.test/a.jpg"));
        assert!(!is_remote("/srv/a.jpg"));
        assert!(!is_remote("file:///srv/a.jpg"));
    }

    #[tokio::test]
    async fn test_fetch_local_path() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("in.png");
        std::fs::write(&source, b"pixels").unwrap();
        let destination = dir.path().join("copy.png");

        let size = fetcher(1024)
            .fetch(source.to_str().unwrap(), &destination)
            .await
            .unwrap();
        assert_eq!(size, 6);
        assert_eq!(std::fs::read(&destination).unwrap(), b"pixels");
    }

    #[tokio::test]
    async fn test_fetch_file_url() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("in.gif");
        std::fs::write(&source, b"gif").unwrap();
        let url = reqwest::Url::from_file_path(&source).unwrap();

        let destination = dir.path().join("out.gif");
        fetcher(1024)
            .fetch(url.as_str(), &destination)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&destination).unwrap(), b"gif");
    }

    #[tokio::test]
    async fn test_fetch_missing_local_file() {
        let dir = tempdir().unwrap();
        let result = fetcher(1024)
            .fetch(
                dir.path().join("missing.jpg").to_str().unwrap(),
                &dir.path().join("out.jpg"),
            )
            .await;
        assert!(matches!(result, Err(SourceFetchError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_fetch_local_too_large() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("big.jpg");
        std::fs::write(&source, vec![0u8; 64]).unwrap();

        let result = fetcher(16)
            .fetch(source.to_str().unwrap(), &dir.path().join("out.jpg"))
            .await;
        assert!(matches!(result, Err(SourceFetchError::TooLarge { limit: 16 })));
    }

    #[tokio::test]
    async fn test_fetch_refuses_internal_hosts() {
        let dir = tempdir().unwrap();
        let destination = dir.path().join("out.jpg");

        let result = fetcher(1024)
            .fetch("http://127.0.0.1:9/a.jpg", &destination)
            .await;
        assert!(matches!(result, Err(SourceFetchError::Blocked(_))));
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_private_sources_can_be_allowed() {
        let dir = tempdir().unwrap();
        let fetcher = HttpSourceFetcher::new(Duration::from_secs(5), 1024, true).unwrap();

        // Nothing listens on the discard port; the request itself fails.
        let result = fetcher
            .fetch("http://127.0.0.1:9/a.jpg", &dir.path().join("out.jpg"))
            .await;
        assert!(matches!(result, Err(SourceFetchError::Request(_))));
    }
}
