//! PicMirror Infrastructure Library
//!
//! Shared plumbing for the plugin and the CLI:
//! - Tracing subscriber initialization
//! - Level-aware error logging

pub mod error;
pub mod telemetry;

pub use error::log_error;
pub use telemetry::{init_telemetry, shutdown_telemetry, LogFormat, TelemetryConfig};
