//! User avatar download with endpoint fallback and retry.

use super::fetcher::Downloader;
use bytes::Bytes;
use picmirror_core::constants::AVATAR_SIZE;
use picmirror_core::{AppError, Rejection};
use std::sync::Arc;
use std::time::Duration;

const MAX_USER_ID_LEN: usize = 20;

/// Avatar endpoints tried in order; `{id}` and `{size}` are substituted.
pub const AVATAR_ENDPOINTS: &[&str] = &[
    "https://q1.qlogo.cn/g?b=qq&nk={id}&s={size}",
    "https://q2.qlogo.cn/headimg_dl?dst_uin={id}&spec={size}",
    "https://q4.qlogo.cn/headimg_dl?dst_uin={id}&spec={size}",
    "https://q.qlogo.cn/g?b=qq&nk={id}&s={size}",
];

pub struct AvatarFetcher {
    downloader: Arc<dyn Downloader>,
    size: u32,
    retries: u32,
    base_backoff: Duration,
}

impl AvatarFetcher {
    pub fn new(downloader: Arc<dyn Downloader>) -> Self {
        Self {
            downloader,
            size: AVATAR_SIZE,
            retries: 2,
            base_backoff: Duration::from_millis(500),
        }
    }

    pub fn with_retry(mut self, retries: u32, base_backoff: Duration) -> Self {
        self.retries = retries;
        self.base_backoff = base_backoff;
        self
    }

    /// Fetch the avatar of `user_id`, returning the first endpoint that
    /// answers. A 404 or an unsafe response moves on without retrying.
    pub async fn fetch(&self, user_id: &str, max_bytes: u64) -> Result<Bytes, AppError> {
        if user_id.is_empty()
            || user_id.len() > MAX_USER_ID_LEN
            || !user_id.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(Rejection::InvalidUserId.into());
        }

        let size = self.size.to_string();
        for template in AVATAR_ENDPOINTS {
            let url = template.replace("{id}", user_id).replace("{size}", &size);

            for attempt in 0..=self.retries {
                match self.downloader.download(&url, max_bytes).await {
                    Ok(bytes) => {
                        tracing::info!(user_id, bytes = bytes.len(), "Fetched avatar");
                        return Ok(bytes);
                    }
                    Err(e) if !e.is_retryable() => {
                        tracing::debug!(url = %url, error = %e, "Avatar endpoint gave up");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(url = %url, attempt, error = %e, "Avatar download failed");
                        if attempt < self.retries {
                            tokio::time::sleep(self.base_backoff * 2u32.pow(attempt)).await;
                        }
                    }
                }
            }
        }

        tracing::warn!(user_id, "All avatar endpoints failed");
        Err(AppError::Transient("avatar unavailable".to_string()))
    }
}

impl std::fmt::Debug for AvatarFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvatarFetcher")
            .field("size", &self.size)
            .field("retries", &self.retries)
            .finish()
    }
}
