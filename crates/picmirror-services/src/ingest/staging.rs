//! Collision-resistant file naming inside the data directory.
//!
//! Every name carries the first 12 hex chars of a SHA-256 over the content
//! digest, a tag, the current timestamp and a random UUID. The file is then
//! created with `create_new`, so a name already on disk is never reused; on
//! collision `_1`, `_2`, ... are appended to the stem.

use chrono::Utc;
use picmirror_core::constants::OUTPUT_PREFIX;
use picmirror_core::{AppError, DataDir, MirrorMode, OriginKind, StagedFile};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const MAX_NAME_ATTEMPTS: u32 = 64;

#[derive(Debug, Clone)]
pub struct FileStager {
    data_dir: DataDir,
}

impl FileStager {
    pub fn new(data_dir: DataDir) -> Self {
        Self { data_dir }
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    /// Write `bytes` to a fresh `{prefix}_{hash12}{ext}` temp file.
    pub async fn stage_temp(
        &self,
        prefix: &str,
        bytes: &[u8],
        ext: &str,
    ) -> Result<StagedFile, AppError> {
        let digest = Sha256::digest(bytes);
        let stem = format!("{}_{}", prefix, hash12(&digest, prefix));
        let (path, mut file) = self.create_unique(&stem, ext).await?;

        let written = async {
            file.write_all(bytes).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Staged temp file");
        Ok(StagedFile::new(path, bytes.len() as u64, OriginKind::Temp))
    }

    /// Reserve an empty `mirror_{mode}_{hash12}{ext}` output file.
    pub async fn reserve_output(
        &self,
        source: &Path,
        mode: MirrorMode,
        ext: &str,
    ) -> Result<StagedFile, AppError> {
        let digest = Sha256::digest(source.to_string_lossy().as_bytes());
        let stem = format!(
            "{}{}_{}",
            OUTPUT_PREFIX,
            mode.as_str(),
            hash12(&digest, mode.as_str())
        );
        let (path, _file) = self.create_unique(&stem, ext).await?;
        Ok(StagedFile::new(path, 0, OriginKind::Output))
    }

    async fn create_unique(&self, stem: &str, ext: &str) -> Result<(PathBuf, File), AppError> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{}{}", stem, ext)
            } else {
                format!("{}_{}{}", stem, attempt, ext)
            };
            let path = self.data_dir.file_path(&name)?;

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    tracing::debug!(name = %name, "Staging name collision");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Transient(format!(
            "no free file name for {} after {} attempts",
            stem, MAX_NAME_ATTEMPTS
        )))
    }
}

fn hash12(digest: &[u8], tag: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(digest);
    hasher.update(tag.as_bytes());
    hasher.update(Utc::now().timestamp_micros().to_le_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(12);
    hex
}
