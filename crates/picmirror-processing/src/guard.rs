//! Decompression-bomb checks.
//!
//! Three layers, each applied before the work it protects:
//! - `precheck` looks only at file metadata and a small header window
//! - `check_dimensions` runs once the container header is parsed
//! - `FrameBudget::admit` runs per animation frame, before that frame is decoded

use picmirror_core::constants::{HARD_PIXEL_LIMIT, HEADER_WINDOW_BYTES, WARN_PIXEL_LIMIT};
use picmirror_core::{PluginConfig, Rejection};
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardLimits {
    /// Byte ceiling for a staged file before it is opened.
    pub precheck_bytes: u64,
    /// Per-frame pixel count that is always rejected.
    pub hard_pixels: u64,
    /// Per-frame pixel count that is logged as large.
    pub warn_pixels: u64,
    pub max_frames: u32,
    /// Running pixel budget across all frames of an animation.
    pub max_total_pixels: u64,
}

impl GuardLimits {
    pub fn from_config(config: &PluginConfig) -> Self {
        Self {
            precheck_bytes: config.precheck_file_size_bytes(),
            hard_pixels: HARD_PIXEL_LIMIT,
            warn_pixels: WARN_PIXEL_LIMIT,
            max_frames: config.max_gif_frames,
            max_total_pixels: config.max_total_pixels,
        }
    }
}

/// Result of the pre-open check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precheck {
    pub size_bytes: u64,
    /// First bytes of the file, at most `HEADER_WINDOW_BYTES`.
    pub header: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct DecompressionGuard {
    limits: GuardLimits,
}

impl DecompressionGuard {
    pub fn new(limits: GuardLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &GuardLimits {
        &self.limits
    }

    /// Confirm the file exists, is non-empty and under the byte ceiling,
    /// reading only the header window.
    pub fn precheck(&self, path: &Path) -> Result<Precheck, Rejection> {
        let metadata = fs::metadata(path).map_err(|_| Rejection::NotFound)?;
        if !metadata.is_file() {
            return Err(Rejection::NotFound);
        }

        let size_bytes = metadata.len();
        if size_bytes == 0 {
            return Err(Rejection::EmptyFile);
        }
        if size_bytes > self.limits.precheck_bytes {
            return Err(Rejection::PayloadTooLarge {
                size: size_bytes,
                limit: self.limits.precheck_bytes,
            });
        }

        let mut header = Vec::with_capacity(HEADER_WINDOW_BYTES);
        File::open(path)
            .and_then(|f| f.take(HEADER_WINDOW_BYTES as u64).read_to_end(&mut header))
            .map_err(|_| Rejection::NotFound)?;
        if header.is_empty() {
            return Err(Rejection::EmptyFile);
        }

        Ok(Precheck { size_bytes, header })
    }

    /// Check decoded dimensions before pixel buffers are allocated.
    pub fn check_dimensions(&self, width: u32, height: u32) -> Result<(), Rejection> {
        let pixels = u64::from(width) * u64::from(height);
        if pixels == 0 {
            return Err(Rejection::UnsupportedFormat(format!(
                "empty canvas {}x{}",
                width, height
            )));
        }
        if pixels > self.limits.hard_pixels {
            return Err(Rejection::DecompressionBomb(format!(
                "{}x{} exceeds {} pixels",
                width, height, self.limits.hard_pixels
            )));
        }
        if pixels > self.limits.warn_pixels {
            tracing::warn!(width, height, pixels, "Processing large image");
        }
        Ok(())
    }

    pub fn frame_budget(&self) -> FrameBudget {
        FrameBudget {
            max_frames: self.limits.max_frames,
            max_total_pixels: self.limits.max_total_pixels,
            frames_seen: 0,
            pixels_seen: 0,
        }
    }
}

/// Incremental frame and pixel accounting for one animation.
#[derive(Debug, Clone)]
pub struct FrameBudget {
    max_frames: u32,
    max_total_pixels: u64,
    frames_seen: u32,
    pixels_seen: u64,
}

impl FrameBudget {
    /// Account for the next frame. Must be called before the frame is decoded.
    pub fn admit(&mut self, width: u32, height: u32) -> Result<(), Rejection> {
        let frames = self.frames_seen + 1;
        if frames > self.max_frames {
            return Err(Rejection::DecompressionBomb(format!(
                "more than {} frames",
                self.max_frames
            )));
        }

        let pixels = self
            .pixels_seen
            .saturating_add(u64::from(width) * u64::from(height));
        if pixels > self.max_total_pixels {
            return Err(Rejection::DecompressionBomb(format!(
                "animation exceeds {} total pixels at frame {}",
                self.max_total_pixels, frames
            )));
        }

        self.frames_seen = frames;
        self.pixels_seen = pixels;
        Ok(())
    }

    pub fn frames_seen(&self) -> u32 {
        self.frames_seen
    }

    pub fn pixels_seen(&self) -> u64 {
        self.pixels_seen
    }
}
