//! Constants shared across crates.

/// Plugin identifier used for the data directory and log targets.
pub const PLUGIN_NAME: &str = "picmirror";

/// Literal prefix marking an inline base64 payload.
pub const BASE64_PREFIX: &str = "base64://";

/// Raw-size ceiling for inline base64 payloads, checked on the encoded length
/// before decoding.
pub const MAX_BASE64_RAW_BYTES: usize = 20 * 1024 * 1024;

/// Prefix of every mirrored output file.
pub const OUTPUT_PREFIX: &str = "mirror_";

/// Temp file prefixes written by the input normalizer.
pub const TEMP_PREFIX_DOWNLOADED: &str = "downloaded";
pub const TEMP_PREFIX_BASE64: &str = "base64";
pub const TEMP_PREFIX_AVATAR: &str = "avatar";
pub const TEMP_PREFIX_LOCAL: &str = "local";

/// Prefixes considered stale temp files by the data-directory sweep.
pub const SWEEPABLE_PREFIXES: &[&str] = &[
    TEMP_PREFIX_DOWNLOADED,
    TEMP_PREFIX_BASE64,
    TEMP_PREFIX_AVATAR,
    TEMP_PREFIX_LOCAL,
];

/// Hard pixel ceiling for a single frame (width x height).
pub const HARD_PIXEL_LIMIT: u64 = 10_000 * 10_000;

/// Pixel count above which processing is logged as a large image.
pub const WARN_PIXEL_LIMIT: u64 = 5_000 * 5_000;

/// Frame count above which an animation is logged as large.
pub const LARGE_ANIMATION_FRAMES: usize = 100;

/// Bytes read from the head of a staged file for the non-empty check and
/// magic-byte sniffing.
pub const HEADER_WINDOW_BYTES: usize = 32;

/// Default avatar edge length requested from the avatar endpoints.
pub const AVATAR_SIZE: u32 = 640;
