//! Size- and time-bounded HTTP GET against a pinned address.

use super::ssrf::{ResolvedTarget, UrlSafetyResolver};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use picmirror_core::{AppError, Rejection};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::net::SocketAddr;
use std::time::Duration;

const USER_AGENT: &str = concat!("picmirror/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Unsafe(#[from] Rejection),

    #[error("resource not found")]
    NotFound,

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("response exceeds {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("request timed out")]
    Timeout,

    #[error("request failed: {0}")]
    Request(String),
}

impl FetchError {
    /// Whether another attempt against the same endpoint could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Status(_) | FetchError::Timeout | FetchError::Request(_)
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Request(err.to_string())
        }
    }
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Unsafe(reason) => AppError::InputRejected(reason),
            FetchError::NotFound => AppError::InputRejected(Rejection::NotFound),
            FetchError::TooLarge { size, limit } => {
                AppError::InputRejected(Rejection::PayloadTooLarge { size, limit })
            }
            FetchError::Status(code) => AppError::Transient(format!("HTTP status {}", code)),
            FetchError::Timeout => AppError::Transient("download timed out".to_string()),
            FetchError::Request(msg) => AppError::Transient(msg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BoundedFetcher {
    timeout: Duration,
}

impl BoundedFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// GET `url`, connecting only to `target.validated_ip`.
    ///
    /// Redirects and proxies are disabled so the pinned address is the only
    /// peer. The body is streamed and dropped as soon as it passes
    /// `max_bytes`.
    pub async fn fetch(
        &self,
        target: &ResolvedTarget,
        url: &str,
        max_bytes: u64,
    ) -> Result<Bytes, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout.min(Duration::from_secs(10)))
            .redirect(Policy::none())
            .no_proxy()
            .user_agent(USER_AGENT)
            .resolve(
                target.hostname(),
                SocketAddr::new(target.validated_ip(), target.port()),
            )
            .build()
            .map_err(|e| FetchError::Request(format!("failed to build HTTP client: {}", e)))?;

        let mut response = client.get(url).send().await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(FetchError::NotFound),
            status => {
                tracing::debug!(status = status.as_u16(), "Download returned non-200 status");
                return Err(FetchError::Status(status.as_u16()));
            }
        }

        if let Some(declared) = response.content_length() {
            if declared > max_bytes {
                return Err(FetchError::TooLarge {
                    size: declared,
                    limit: max_bytes,
                });
            }
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            let size = (body.len() + chunk.len()) as u64;
            if size > max_bytes {
                return Err(FetchError::TooLarge {
                    size,
                    limit: max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(bytes = body.len(), "Download complete");
        Ok(body.freeze())
    }
}

/// Safe download of an arbitrary URL: resolve, check, then fetch pinned.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, url: &str, max_bytes: u64) -> Result<Bytes, FetchError>;
}

#[derive(Clone)]
pub struct SafeDownloader {
    resolver: UrlSafetyResolver,
    fetcher: BoundedFetcher,
}

impl SafeDownloader {
    pub fn new(resolver: UrlSafetyResolver, fetcher: BoundedFetcher) -> Self {
        Self { resolver, fetcher }
    }
}

#[async_trait]
impl Downloader for SafeDownloader {
    async fn download(&self, url: &str, max_bytes: u64) -> Result<Bytes, FetchError> {
        let target = self.resolver.resolve(url).await?;
        self.fetcher.fetch(&target, url, max_bytes).await
    }
}
