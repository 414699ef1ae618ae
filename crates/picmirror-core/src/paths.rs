//! Data-directory confinement.
//!
//! Every file the plugin reads, writes or deletes must resolve (symlink targets
//! included) to a strict descendant of the plugin's exclusive data directory.
//! Paths failing that check are never opened, read or deleted.

use crate::error::Rejection;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Canonicalized root of the plugin's exclusive data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Create the directory if needed and pin its canonical form.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path)?;
        let root = path.canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join a generated file name onto the root. The name must be a single
    /// normal path component.
    pub fn file_path(&self, file_name: &str) -> Result<PathBuf, Rejection> {
        let mut components = Path::new(file_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(file_name)),
            _ => Err(Rejection::PathTraversal),
        }
    }

    /// Whether an already-canonical path lies strictly inside the root.
    pub fn is_strict_descendant(&self, canonical: &Path) -> bool {
        canonical != self.root && canonical.starts_with(&self.root)
    }

    /// Resolve an untrusted relative path to an existing file inside the root.
    ///
    /// Absolute paths and any `..` segment are refused before the filesystem
    /// is touched.
    pub fn resolve_relative(&self, raw: &str) -> Result<PathBuf, Rejection> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Rejection::NotFound);
        }

        let candidate = Path::new(raw);
        if candidate.is_absolute()
            || candidate.has_root()
            || raw.starts_with('\\')
            || candidate
                .components()
                .any(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
        {
            return Err(Rejection::AbsolutePath);
        }

        if raw.split(['/', '\\']).any(|segment| segment == "..")
            || candidate
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(Rejection::PathTraversal);
        }

        let canonical = self
            .root
            .join(candidate)
            .canonicalize()
            .map_err(|_| Rejection::NotFound)?;

        if !self.is_strict_descendant(&canonical) {
            return Err(Rejection::PathTraversal);
        }

        if !canonical.is_file() {
            return Err(Rejection::NotFound);
        }

        Ok(canonical)
    }

    /// Re-validate a path produced elsewhere before scheduling or deleting it.
    ///
    /// Returns the path with its parent canonicalized. A symlink is accepted
    /// only when its resolved target is also inside the root; a path that does
    /// not exist yet is accepted when its parent is confined.
    pub fn confine(&self, path: &Path) -> Result<PathBuf, Rejection> {
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(Rejection::PathTraversal);
        }

        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        let file_name = absolute.file_name().ok_or(Rejection::PathTraversal)?;
        let parent = absolute.parent().ok_or(Rejection::PathTraversal)?;
        let parent = parent.canonicalize().map_err(|_| Rejection::NotFound)?;
        let lexical = parent.join(file_name);

        if !self.is_strict_descendant(&lexical) {
            return Err(Rejection::PathTraversal);
        }

        match fs::symlink_metadata(&lexical) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let target = lexical
                    .canonicalize()
                    .map_err(|_| Rejection::PathTraversal)?;
                if !self.is_strict_descendant(&target) {
                    return Err(Rejection::PathTraversal);
                }
                Ok(lexical)
            }
            Ok(_) => Ok(lexical),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(lexical),
            Err(_) => Err(Rejection::NotFound),
        }
    }
}
