//! Outbound network access: URL safety checks, pinned fetches and avatars.

pub mod avatar;
pub mod fetcher;
pub mod ssrf;

pub use avatar::{AvatarFetcher, AVATAR_ENDPOINTS};
pub use fetcher::{BoundedFetcher, Downloader, FetchError, SafeDownloader};
pub use ssrf::{is_disallowed_ip, HostResolver, ResolvedTarget, SystemResolver, UrlSafetyResolver};
