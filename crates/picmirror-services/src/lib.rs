//! PicMirror services
//!
//! Network access, input staging, the cleanup scheduler and the
//! [`MirrorPipeline`] tying them to the image processor.

pub mod cleanup;
pub mod ingest;
pub mod net;
pub mod pipeline;

pub use cleanup::{CleanupScheduler, ReapReport, SchedulerSettings, SchedulerState};
pub use ingest::{FileStager, InputNormalizer};
pub use net::{
    AvatarFetcher, BoundedFetcher, Downloader, FetchError, HostResolver, ResolvedTarget,
    SafeDownloader, SystemResolver, UrlSafetyResolver,
};
pub use pipeline::MirrorPipeline;
