use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Why a staged file exists and who owns its deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginKind {
    /// Input materialized by the normalizer; deleted right after the transform reads it.
    Temp,
    /// Mirrored result; owned by the cleanup scheduler until reaped.
    Output,
}

/// A file materialized inside the plugin data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub origin: OriginKind,
    pub created_at: DateTime<Utc>,
}

impl StagedFile {
    pub fn new(path: PathBuf, size_bytes: u64, origin: OriginKind) -> Self {
        Self {
            path,
            size_bytes,
            origin,
            created_at: Utc::now(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lowercased extension without the dot, if any.
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
