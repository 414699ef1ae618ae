//! Image processing for PicMirror
//!
//! This crate provides:
//! - Magic-byte format sniffing (format)
//! - Decompression-bomb checks before and during decode (guard)
//! - The axis mirror transform and colour handling (transform)
//! - Output downscaling and per-format encoding (compression)
//! - Frame-by-frame animated GIF processing (animation)
//! - The blocking entry point tying them together (processor)

pub mod animation;
pub mod compression;
pub mod error;
pub mod format;
pub mod guard;
pub mod processor;
pub mod transform;

pub use error::ProcessError;
pub use format::ImageKind;
pub use guard::{DecompressionGuard, FrameBudget, GuardLimits, Precheck};
pub use transform::{apply_mirror, apply_mirror_by_name};
pub use processor::{MirrorProcessor, ProcessOutcome};
