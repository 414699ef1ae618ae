//! End-to-end mirror pipeline: ingest, guard, transform, schedule cleanup.

use crate::cleanup::{CleanupScheduler, ReapReport, SchedulerSettings};
use crate::ingest::{FileStager, InputNormalizer};
use crate::net::{AvatarFetcher, BoundedFetcher, Downloader, SafeDownloader, UrlSafetyResolver};
use picmirror_core::{AppError, DataDir, ImageSource, MirrorMode, PluginConfig, Rejection, StagedFile};
use picmirror_processing::{DecompressionGuard, ImageKind, MirrorProcessor, ProcessError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DNS_TIMEOUT: Duration = Duration::from_secs(5);
const AVATAR_TIMEOUT: Duration = Duration::from_secs(10);

/// Byte ceilings applied once the container is known.
#[derive(Debug, Clone, Copy)]
struct InputLimits {
    max_image_bytes: u64,
    max_gif_bytes: u64,
    enable_gif: bool,
}

pub struct MirrorPipeline {
    config: Arc<PluginConfig>,
    normalizer: InputNormalizer,
    processor: Arc<MirrorProcessor>,
    scheduler: CleanupScheduler,
}

impl MirrorPipeline {
    /// Pipeline resolving hosts through the system resolver.
    pub fn new(config: Arc<PluginConfig>, data_dir: DataDir) -> Self {
        let resolver = UrlSafetyResolver::system(DNS_TIMEOUT);
        let downloader = SafeDownloader::new(
            resolver.clone(),
            BoundedFetcher::new(Duration::from_secs(config.processing_timeout)),
        );
        let avatar_downloader = SafeDownloader::new(resolver, BoundedFetcher::new(AVATAR_TIMEOUT));

        let pipeline = Self::with_downloader(config, data_dir, Arc::new(downloader));
        Self {
            normalizer: pipeline
                .normalizer
                .with_avatar_fetcher(AvatarFetcher::new(Arc::new(avatar_downloader))),
            ..pipeline
        }
    }

    /// Pipeline fetching URLs and avatars through `downloader`.
    pub fn with_downloader(
        config: Arc<PluginConfig>,
        data_dir: DataDir,
        downloader: Arc<dyn Downloader>,
    ) -> Self {
        let normalizer = InputNormalizer::new(FileStager::new(data_dir.clone()), downloader, &config);
        let scheduler = CleanupScheduler::new(data_dir, SchedulerSettings::from_config(&config));
        Self {
            processor: Arc::new(MirrorProcessor::from_config(&config)),
            normalizer,
            scheduler,
            config,
        }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &CleanupScheduler {
        &self.scheduler
    }

    pub fn data_dir(&self) -> &DataDir {
        self.normalizer.stager().data_dir()
    }

    /// Mirror `source` and return the path of the produced file.
    ///
    /// The whole call is bounded by `processing_timeout`. The staged input
    /// is always deleted; the output is deleted on failure.
    #[tracing::instrument(skip(self))]
    pub async fn process_source(
        &self,
        source: &ImageSource,
        mode: MirrorMode,
    ) -> Result<PathBuf, AppError> {
        let cancel = CancellationToken::new();
        let _cancel_on_exit = cancel.clone().drop_guard();

        self.bounded(async {
            let staged = self.normalizer.normalize(source).await?;
            self.mirror_staged(staged, mode, cancel).await
        })
        .await
    }

    /// Mirror the avatar of `user_id`.
    #[tracing::instrument(skip(self))]
    pub async fn process_avatar(&self, user_id: &str, mode: MirrorMode) -> Result<PathBuf, AppError> {
        let cancel = CancellationToken::new();
        let _cancel_on_exit = cancel.clone().drop_guard();

        self.bounded(async {
            let staged = self.normalizer.normalize_avatar(user_id).await?;
            self.mirror_staged(staged, mode, cancel).await
        })
        .await
    }

    pub fn start(&self) -> bool {
        self.scheduler.start()
    }

    pub fn schedule_cleanup(&self, path: &Path, retention_hours: i64) -> Result<(), AppError> {
        self.scheduler.schedule(path, retention_hours)
    }

    pub async fn cleanup_all(&self) -> ReapReport {
        self.scheduler.cleanup_all().await
    }

    async fn bounded<F>(&self, work: F) -> Result<PathBuf, AppError>
    where
        F: std::future::Future<Output = Result<PathBuf, AppError>>,
    {
        let limit = Duration::from_secs(self.config.processing_timeout);
        match tokio::time::timeout(limit, work).await {
            Ok(Ok(path)) => Ok(path),
            Ok(Err(e)) => {
                if let Some(reason) = e.rejection() {
                    tracing::warn!(reason = %reason, "Input rejected");
                } else {
                    tracing::warn!(error = %e, "Mirror failed");
                }
                Err(e)
            }
            Err(_) => {
                tracing::warn!(timeout_secs = limit.as_secs(), "Processing timed out");
                Err(AppError::Transient(format!(
                    "processing exceeded {}s",
                    limit.as_secs()
                )))
            }
        }
    }

    async fn mirror_staged(
        &self,
        staged: StagedFile,
        mode: MirrorMode,
        cancel: CancellationToken,
    ) -> Result<PathBuf, AppError> {
        let temp = FileGuard::new(staged.path.clone());
        let fallback = staged.extension().as_deref().and_then(ImageKind::from_extension);
        let limits = InputLimits {
            max_image_bytes: self.config.max_image_size_bytes(),
            max_gif_bytes: self.config.max_gif_size_bytes(),
            enable_gif: self.config.enable_gif,
        };

        let guard = self.processor.guard().clone();
        let input = staged.path.clone();
        let kind = run_blocking(move || inspect(&guard, &input, fallback, limits)).await?;

        let output = self
            .normalizer
            .stager()
            .reserve_output(temp.path(), mode, kind.extension())
            .await?
            .path;
        let output_guard = FileGuard::new(output.clone());

        let processor = self.processor.clone();
        let input = staged.path.clone();
        let outcome = run_blocking(move || processor.process(&input, &output, kind, mode, &cancel))
            .await?;

        tracing::info!(
            kind = ?outcome.kind,
            width = outcome.width,
            height = outcome.height,
            frames = outcome.frames,
            "Mirrored image"
        );
        drop(temp);
        Ok(output_guard.keep())
    }
}

/// Pre-open checks and container detection for a staged file.
fn inspect(
    guard: &DecompressionGuard,
    input: &Path,
    fallback: Option<ImageKind>,
    limits: InputLimits,
) -> Result<ImageKind, ProcessError> {
    let precheck = guard.precheck(input)?;
    let kind = ImageKind::sniff(&precheck.header)
        .or(fallback)
        .ok_or_else(|| Rejection::UnsupportedFormat("unrecognized image header".to_string()))?;

    let limit = if kind == ImageKind::Gif {
        if !limits.enable_gif {
            return Err(Rejection::AnimationDisabled.into());
        }
        limits.max_gif_bytes
    } else {
        limits.max_image_bytes
    };
    if precheck.size_bytes > limit {
        return Err(Rejection::PayloadTooLarge {
            size: precheck.size_bytes,
            limit,
        }
        .into());
    }

    Ok(kind)
}

async fn run_blocking<T, F>(work: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, ProcessError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result.map_err(AppError::from),
        Err(e) if e.is_panic() => {
            tracing::error!(error = %e, "Image worker panicked");
            Err(AppError::Internal("image worker panicked".to_string()))
        }
        Err(e) => Err(AppError::Transient(format!("image worker cancelled: {}", e))),
    }
}

/// Deletes its file on drop unless kept.
struct FileGuard {
    path: PathBuf,
    armed: bool,
}

impl FileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed staged file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove staged file"),
        }
    }
}
