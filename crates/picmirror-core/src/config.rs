//! Configuration module
//!
//! The host framework hands the plugin a loosely typed key/value map. Each
//! value is coerced on its own so one bad entry only resets that key, then the
//! whole struct is range-checked. A range failure falls back to the complete
//! default configuration.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use validator::Validate;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Plugin settings, immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PluginConfig {
    #[validate(range(min = 1, max = 100, message = "image_size_limit_mb must be 1-100"))]
    pub image_size_limit_mb: u64,

    #[validate(range(min = 1, max = 200, message = "gif_size_limit_mb must be 1-200"))]
    pub gif_size_limit_mb: u64,

    #[validate(range(min = 10, max = 500, message = "precheck_file_size_mb must be 10-500"))]
    pub precheck_file_size_mb: u64,

    /// Whole-pipeline timeout, seconds.
    #[validate(range(min = 5, max = 300, message = "processing_timeout must be 5-300"))]
    pub processing_timeout: u64,

    #[validate(range(min = 1, max = 100, message = "output_quality must be 1-100"))]
    pub output_quality: u8,

    #[validate(range(
        min = 512,
        max = 8192,
        message = "max_compression_dimension must be 512-8192"
    ))]
    pub max_compression_dimension: u32,

    /// Running pixel budget across every frame of an animation.
    #[validate(range(
        min = 250_000,
        max = 100_000_000,
        message = "max_total_pixels must be 250000-100000000"
    ))]
    pub max_total_pixels: u64,

    #[validate(range(min = 10, max = 1000, message = "max_gif_frames must be 10-1000"))]
    pub max_gif_frames: u32,

    /// Lifetime of mirrored outputs. Zero deletes shortly after the reply.
    #[validate(range(min = 0, max = 168, message = "keep_files_hours must be 0-168"))]
    pub keep_files_hours: u32,

    /// Cleanup loop period, seconds.
    #[validate(range(min = 60, max = 1800, message = "cleanup_loop_interval must be 60-1800"))]
    pub cleanup_loop_interval: u64,

    /// Grace period for the cleanup loop on shutdown, seconds.
    #[validate(range(min = 1.0, max = 30.0, message = "cleanup_timeout must be 1.0-30.0"))]
    pub cleanup_timeout: f64,

    pub enable_gif: bool,
    pub enable_compression: bool,
    pub silent_mode: bool,
    pub enable_auto_cleanup: bool,
    pub enable_at_avatar: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            image_size_limit_mb: 10,
            gif_size_limit_mb: 15,
            precheck_file_size_mb: 100,
            processing_timeout: 30,
            output_quality: 85,
            max_compression_dimension: 2048,
            max_total_pixels: 16_000_000,
            max_gif_frames: 200,
            keep_files_hours: 1,
            cleanup_loop_interval: 300,
            cleanup_timeout: 5.0,
            enable_gif: true,
            enable_compression: true,
            silent_mode: true,
            enable_auto_cleanup: true,
            enable_at_avatar: true,
        }
    }
}

impl PluginConfig {
    /// Build a configuration from the host-provided map.
    pub fn load_from_map(map: Option<&Map<String, Value>>) -> Self {
        let map = match map {
            Some(map) if !map.is_empty() => map,
            _ => return Self::default(),
        };

        let defaults = Self::default();
        let mut config = Self::default();

        for (key, value) in map {
            match key.as_str() {
                "image_size_limit_mb" => {
                    config.image_size_limit_mb =
                        coerce_int(key, value).unwrap_or(defaults.image_size_limit_mb)
                }
                "gif_size_limit_mb" => {
                    config.gif_size_limit_mb =
                        coerce_int(key, value).unwrap_or(defaults.gif_size_limit_mb)
                }
                "precheck_file_size_mb" => {
                    config.precheck_file_size_mb =
                        coerce_int(key, value).unwrap_or(defaults.precheck_file_size_mb)
                }
                "processing_timeout" => {
                    config.processing_timeout =
                        coerce_int(key, value).unwrap_or(defaults.processing_timeout)
                }
                "output_quality" => {
                    config.output_quality =
                        coerce_int(key, value).unwrap_or(defaults.output_quality)
                }
                "max_compression_dimension" => {
                    config.max_compression_dimension =
                        coerce_int(key, value).unwrap_or(defaults.max_compression_dimension)
                }
                "max_total_pixels" => {
                    config.max_total_pixels =
                        coerce_int(key, value).unwrap_or(defaults.max_total_pixels)
                }
                "max_gif_frames" => {
                    config.max_gif_frames =
                        coerce_int(key, value).unwrap_or(defaults.max_gif_frames)
                }
                "keep_files_hours" => {
                    config.keep_files_hours =
                        coerce_int(key, value).unwrap_or(defaults.keep_files_hours)
                }
                "cleanup_loop_interval" => {
                    config.cleanup_loop_interval =
                        coerce_int(key, value).unwrap_or(defaults.cleanup_loop_interval)
                }
                "cleanup_timeout" => {
                    config.cleanup_timeout =
                        coerce_float(key, value).unwrap_or(defaults.cleanup_timeout)
                }
                "enable_gif" => {
                    config.enable_gif = coerce_bool(key, value).unwrap_or(defaults.enable_gif)
                }
                "enable_compression" => {
                    config.enable_compression =
                        coerce_bool(key, value).unwrap_or(defaults.enable_compression)
                }
                "silent_mode" => {
                    config.silent_mode = coerce_bool(key, value).unwrap_or(defaults.silent_mode)
                }
                "enable_auto_cleanup" => {
                    config.enable_auto_cleanup =
                        coerce_bool(key, value).unwrap_or(defaults.enable_auto_cleanup)
                }
                "enable_at_avatar" => {
                    config.enable_at_avatar =
                        coerce_bool(key, value).unwrap_or(defaults.enable_at_avatar)
                }
                other => tracing::debug!(key = other, "Ignoring unknown configuration key"),
            }
        }

        if let Err(e) = config.validate() {
            tracing::error!(error = %e, "Configuration out of range, using defaults");
            return defaults;
        }

        config
    }

    /// Read a JSON object from disk and apply the same coercion rules.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid JSON in config file {}", path.display()))?;
        match value {
            Value::Object(map) => Ok(Self::load_from_map(Some(&map))),
            _ => anyhow::bail!("Config file {} must contain a JSON object", path.display()),
        }
    }

    pub fn max_image_size_bytes(&self) -> u64 {
        self.image_size_limit_mb * BYTES_PER_MB
    }

    pub fn max_gif_size_bytes(&self) -> u64 {
        self.gif_size_limit_mb * BYTES_PER_MB
    }

    pub fn precheck_file_size_bytes(&self) -> u64 {
        self.precheck_file_size_mb * BYTES_PER_MB
    }

    /// One-line description for startup logging.
    pub fn summary(&self) -> String {
        format!(
            "image<={}MB gif<={}MB precheck<={}MB timeout={}s quality={} max_dim={} \
             max_pixels={} max_frames={} keep={}h cleanup_every={}s gif={} compression={} \
             silent={} auto_cleanup={} at_avatar={}",
            self.image_size_limit_mb,
            self.gif_size_limit_mb,
            self.precheck_file_size_mb,
            self.processing_timeout,
            self.output_quality,
            self.max_compression_dimension,
            self.max_total_pixels,
            self.max_gif_frames,
            self.keep_files_hours,
            self.cleanup_loop_interval,
            self.enable_gif,
            self.enable_compression,
            self.silent_mode,
            self.enable_auto_cleanup,
            self.enable_at_avatar,
        )
    }
}

fn coerce_int<T: TryFrom<i64>>(key: &str, value: &Value) -> Option<T> {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    match parsed.and_then(|n| T::try_from(n).ok()) {
        Some(v) => Some(v),
        None => {
            tracing::warn!(key, value = %value, "Invalid integer config value, using default");
            None
        }
    }
}

fn coerce_float(key: &str, value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    if parsed.is_none() {
        tracing::warn!(key, value = %value, "Invalid numeric config value, using default");
    }
    parsed.filter(|f| f.is_finite())
}

fn coerce_bool(key: &str, value: &Value) -> Option<bool> {
    let parsed = match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    };
    if parsed.is_none() {
        tracing::warn!(key, value = %value, "Invalid boolean config value, using default");
    }
    parsed
}
