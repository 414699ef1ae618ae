//! PicMirror Core Library
//!
//! This crate provides the domain types, error taxonomy, configuration and
//! data-directory confinement shared by every PicMirror component.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod paths;

// Re-export commonly used types
pub use config::PluginConfig;
pub use error::{AppError, ErrorMetadata, LogLevel, Rejection};
pub use models::{ImageSource, MirrorMode, OriginKind, StagedFile};
pub use paths::DataDir;
