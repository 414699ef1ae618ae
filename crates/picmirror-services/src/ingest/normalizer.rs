//! Input normalizer - turns an [`ImageSource`] into a staged temp file.

use super::staging::FileStager;
use crate::net::{AvatarFetcher, Downloader};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use picmirror_core::constants::{
    BASE64_PREFIX, HEADER_WINDOW_BYTES, MAX_BASE64_RAW_BYTES, TEMP_PREFIX_AVATAR,
    TEMP_PREFIX_BASE64, TEMP_PREFIX_DOWNLOADED, TEMP_PREFIX_LOCAL,
};
use picmirror_core::{AppError, ImageSource, PluginConfig, Rejection, StagedFile};
use picmirror_processing::ImageKind;
use regex::Regex;
use std::sync::{Arc, LazyLock};

static URL_EXTENSION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\.([a-zA-Z0-9]+)$").ok());

/// Encoded length that decodes to at most `raw_bytes`.
pub fn base64_budget(raw_bytes: usize) -> usize {
    raw_bytes.div_ceil(3) * 4
}

pub struct InputNormalizer {
    stager: FileStager,
    downloader: Arc<dyn Downloader>,
    avatars: AvatarFetcher,
    max_image_bytes: u64,
    /// Ceiling for downloads and local copies; the per-format limit is
    /// applied after staging.
    max_fetch_bytes: u64,
    max_base64_chars: usize,
}

impl InputNormalizer {
    pub fn new(stager: FileStager, downloader: Arc<dyn Downloader>, config: &PluginConfig) -> Self {
        Self {
            stager,
            avatars: AvatarFetcher::new(downloader.clone()),
            downloader,
            max_image_bytes: config.max_image_size_bytes(),
            max_fetch_bytes: config
                .max_image_size_bytes()
                .max(config.max_gif_size_bytes()),
            max_base64_chars: base64_budget(MAX_BASE64_RAW_BYTES),
        }
    }

    /// Override the pre-decode length budget for inline payloads.
    pub fn with_base64_budget(mut self, max_chars: usize) -> Self {
        self.max_base64_chars = max_chars;
        self
    }

    pub fn with_avatar_fetcher(mut self, avatars: AvatarFetcher) -> Self {
        self.avatars = avatars;
        self
    }

    pub fn stager(&self) -> &FileStager {
        &self.stager
    }

    #[tracing::instrument(skip(self), fields(kind = source.kind()))]
    pub async fn normalize(&self, source: &ImageSource) -> Result<StagedFile, AppError> {
        match source {
            ImageSource::Url(url) => self.from_url(url).await,
            ImageSource::Base64Payload(payload) => self.from_base64(payload).await,
            ImageSource::LocalRelativePath(path) => self.from_local(path).await,
        }
    }

    /// Download the avatar of a mentioned user into a temp file.
    pub async fn normalize_avatar(&self, user_id: &str) -> Result<StagedFile, AppError> {
        let bytes = self.avatars.fetch(user_id, self.max_fetch_bytes).await?;
        let ext = sniff_extension(&bytes).unwrap_or(ImageKind::Jpeg.extension());
        self.stager.stage_temp(TEMP_PREFIX_AVATAR, &bytes, ext).await
    }

    async fn from_url(&self, url: &str) -> Result<StagedFile, AppError> {
        let bytes = self.downloader.download(url, self.max_fetch_bytes).await?;
        if bytes.is_empty() {
            return Err(Rejection::EmptyFile.into());
        }

        let ext = sniff_extension(&bytes)
            .or_else(|| url_extension(url))
            .unwrap_or(ImageKind::Jpeg.extension());
        self.stager
            .stage_temp(TEMP_PREFIX_DOWNLOADED, &bytes, ext)
            .await
    }

    async fn from_base64(&self, payload: &str) -> Result<StagedFile, AppError> {
        let encoded = payload.strip_prefix(BASE64_PREFIX).unwrap_or(payload);

        if encoded.len() > self.max_base64_chars {
            tracing::warn!(
                chars = encoded.len(),
                limit = self.max_base64_chars,
                "Base64 payload over pre-decode budget"
            );
            return Err(Rejection::PayloadTooLarge {
                size: encoded.len() as u64,
                limit: self.max_base64_chars as u64,
            }
            .into());
        }

        let bytes = STANDARD.decode(encoded).map_err(|e| {
            tracing::warn!(error = %e, "Malformed base64 payload");
            Rejection::MalformedBase64
        })?;
        if bytes.is_empty() {
            return Err(Rejection::EmptyFile.into());
        }
        if bytes.len() as u64 > self.max_image_bytes {
            return Err(Rejection::PayloadTooLarge {
                size: bytes.len() as u64,
                limit: self.max_image_bytes,
            }
            .into());
        }

        let ext = sniff_extension(&bytes).unwrap_or(ImageKind::Png.extension());
        self.stager.stage_temp(TEMP_PREFIX_BASE64, &bytes, ext).await
    }

    /// Copy a file from the data directory into a temp, so the pipeline can
    /// delete its input without touching the original.
    async fn from_local(&self, raw: &str) -> Result<StagedFile, AppError> {
        let resolved = self.stager.data_dir().resolve_relative(raw).map_err(|e| {
            tracing::warn!(path = raw, reason = %e, "Rejected local path");
            e
        })?;

        let size = tokio::fs::metadata(&resolved).await?.len();
        if size > self.max_fetch_bytes {
            return Err(Rejection::PayloadTooLarge {
                size,
                limit: self.max_fetch_bytes,
            }
            .into());
        }

        let bytes = tokio::fs::read(&resolved).await?;
        if bytes.is_empty() {
            return Err(Rejection::EmptyFile.into());
        }

        let ext = sniff_extension(&bytes)
            .or_else(|| {
                resolved
                    .extension()
                    .and_then(|e| e.to_str())
                    .and_then(ImageKind::from_extension)
                    .map(ImageKind::extension)
            })
            .unwrap_or(ImageKind::Png.extension());
        self.stager.stage_temp(TEMP_PREFIX_LOCAL, &bytes, ext).await
    }
}

fn sniff_extension(bytes: &[u8]) -> Option<&'static str> {
    let window = &bytes[..bytes.len().min(HEADER_WINDOW_BYTES)];
    ImageKind::sniff(window).map(ImageKind::extension)
}

/// Extension named by the URL path, ignoring query and fragment.
fn url_extension(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next()?;
    let path = path.split_once("://").map_or(path, |(_, rest)| rest);
    let path = path.split_once('/').map(|(_, p)| p)?;
    let regex = URL_EXTENSION.as_ref()?;
    let ext = regex.captures(path)?.get(1)?.as_str();
    ImageKind::from_extension(ext).map(ImageKind::extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::FetchError;
    use async_trait::async_trait;
    use bytes::Bytes;
    use picmirror_core::DataDir;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];

    struct StaticDownloader {
        body: Result<Bytes, FetchError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Downloader for StaticDownloader {
        async fn download(&self, _url: &str, _max_bytes: u64) -> Result<Bytes, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.body {
                Ok(bytes) => Ok(bytes.clone()),
                Err(_) => Err(FetchError::Unsafe(Rejection::UnsafeUrl)),
            }
        }
    }

    fn normalizer_with(body: Result<Bytes, FetchError>) -> (TempDir, Arc<StaticDownloader>, InputNormalizer) {
        let dir = tempdir().unwrap();
        let stager = FileStager::new(DataDir::open(dir.path()).unwrap());
        let downloader = Arc::new(StaticDownloader {
            body,
            calls: AtomicUsize::new(0),
        });
        let normalizer = InputNormalizer::new(stager, downloader.clone(), &PluginConfig::default());
        (dir, downloader, normalizer)
    }

    fn normalizer() -> (TempDir, InputNormalizer) {
        let (dir, _, normalizer) = normalizer_with(Ok(Bytes::new()));
        (dir, normalizer)
    }

    #[test]
    fn test_base64_budget() {
        assert_eq!(base64_budget(3), 4);
        assert_eq!(base64_budget(4), 8);
        assert_eq!(base64_budget(20 * 1024 * 1024), 27_962_028);
    }

    #[test]
    fn test_url_extension() {
        assert_eq!(url_extension("https://a.example/x/cat.GIF?s=1"), Some(".gif"));
        assert_eq!(url_extension("https://a.example/cat.jpeg#frag"), Some(".jpg"));
        assert_eq!(url_extension("https://a.example/download?name=a.png"), None);
        assert_eq!(url_extension("https://a.example/file.exe"), None);
        assert_eq!(url_extension("https://a.png"), None);
    }

    #[tokio::test]
    async fn test_url_prefers_magic_bytes() {
        let (_dir, downloader, normalizer) = normalizer_with(Ok(Bytes::from_static(PNG_MAGIC)));
        let staged = normalizer
            .normalize(&ImageSource::Url("https://a.example/photo.gif".into()))
            .await
            .unwrap();
        assert!(staged.file_name().starts_with("downloaded_"));
        assert_eq!(staged.extension().as_deref(), Some("png"));
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_url_falls_back_to_path_extension() {
        let (_dir, _, normalizer) = normalizer_with(Ok(Bytes::from_static(b"opaque bytes")));
        let staged = normalizer
            .normalize(&ImageSource::Url("https://a.example/photo.webp?x=1".into()))
            .await
            .unwrap();
        assert_eq!(staged.extension().as_deref(), Some("webp"));

        let staged = normalizer
            .normalize(&ImageSource::Url("https://a.example/photo".into()))
            .await
            .unwrap();
        assert_eq!(staged.extension().as_deref(), Some("jpg"));
    }

    #[tokio::test]
    async fn test_url_rejection_propagates() {
        let (dir, _, normalizer) = normalizer_with(Err(FetchError::Timeout));
        let err = normalizer
            .normalize(&ImageSource::Url("http://169.254.169.254/".into()))
            .await
            .unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::UnsafeUrl));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_base64_decodes_and_sniffs() {
        let (_dir, normalizer) = normalizer();
        let payload = format!("base64://{}", STANDARD.encode(PNG_MAGIC));
        let staged = normalizer
            .normalize(&ImageSource::Base64Payload(payload))
            .await
            .unwrap();
        assert!(staged.file_name().starts_with("base64_"));
        assert_eq!(staged.extension().as_deref(), Some("png"));
        assert_eq!(std::fs::read(staged.path()).unwrap(), PNG_MAGIC);

        let payload = format!("base64://{}", STANDARD.encode(b"no magic here"));
        let staged = normalizer
            .normalize(&ImageSource::Base64Payload(payload))
            .await
            .unwrap();
        assert_eq!(staged.extension().as_deref(), Some("png"));
    }

    #[tokio::test]
    async fn test_base64_malformed_rejected() {
        let (_dir, normalizer) = normalizer();
        for payload in ["base64://not*base64", "base64://QUJD\nREVG", "base64://QUJ"] {
            let err = normalizer
                .normalize(&ImageSource::Base64Payload(payload.into()))
                .await
                .unwrap_err();
            assert_eq!(err.rejection(), Some(&Rejection::MalformedBase64), "{payload}");
        }
    }

    #[tokio::test]
    async fn test_base64_over_budget_rejected_before_decode() {
        let (dir, normalizer) = normalizer();
        let normalizer = normalizer.with_base64_budget(16);
        // Not valid base64 either; the length check must fire first.
        let payload = format!("base64://{}", "*".repeat(17));
        let err = normalizer
            .normalize(&ImageSource::Base64Payload(payload))
            .await
            .unwrap_err();
        assert!(matches!(
            err.rejection(),
            Some(Rejection::PayloadTooLarge { size: 17, limit: 16 })
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_base64_decoded_size_over_image_limit() {
        let dir = tempdir().unwrap();
        let stager = FileStager::new(DataDir::open(dir.path()).unwrap());
        let config = PluginConfig {
            image_size_limit_mb: 1,
            ..PluginConfig::default()
        };
        let downloader = Arc::new(StaticDownloader {
            body: Ok(Bytes::new()),
            calls: AtomicUsize::new(0),
        });
        let normalizer = InputNormalizer::new(stager, downloader, &config);

        let payload = format!("base64://{}", STANDARD.encode(vec![0u8; 1024 * 1024 + 1]));
        let err = normalizer
            .normalize(&ImageSource::Base64Payload(payload))
            .await
            .unwrap_err();
        assert!(matches!(
            err.rejection(),
            Some(Rejection::PayloadTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_local_path_copied_into_temp() {
        let (dir, normalizer) = normalizer();
        std::fs::create_dir(dir.path().join("uploads")).unwrap();
        let original = dir.path().join("uploads").join("cat.bmp");
        std::fs::write(&original, b"BM fake bitmap").unwrap();

        let staged = normalizer
            .normalize(&ImageSource::LocalRelativePath("uploads/cat.bmp".into()))
            .await
            .unwrap();
        assert!(staged.file_name().starts_with("local_"));
        assert_eq!(staged.extension().as_deref(), Some("bmp"));
        assert_ne!(staged.path(), original.as_path());
        assert!(original.exists());
    }

    #[tokio::test]
    async fn test_local_path_rejections() {
        let (dir, normalizer) = normalizer();
        std::fs::write(dir.path().join("empty.png"), b"").unwrap();

        let cases = [
            ("/etc/passwd", Rejection::AbsolutePath),
            ("../secret.png", Rejection::PathTraversal),
            ("a/../../secret.png", Rejection::PathTraversal),
            ("missing.png", Rejection::NotFound),
            ("empty.png", Rejection::EmptyFile),
        ];
        for (raw, expected) in cases {
            let err = normalizer
                .normalize(&ImageSource::LocalRelativePath(raw.into()))
                .await
                .unwrap_err();
            assert_eq!(err.rejection(), Some(&expected), "{raw}");
        }
    }
}
