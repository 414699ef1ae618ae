//! Removal of temp files left behind by a crash.

use picmirror_core::constants::SWEEPABLE_PREFIXES;
use picmirror_core::DataDir;
use std::fs;
use std::io;
use std::time::{Duration, SystemTime};

/// Delete temp files in the data directory older than `max_age`.
///
/// Only regular files whose name starts with a temp prefix followed by `_`
/// are considered; outputs and anything else are left alone. Returns the
/// number of files removed.
pub fn sweep_stale_temps(data_dir: &DataDir, max_age: Duration) -> io::Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in fs::read_dir(data_dir.root())? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !is_temp_name(name) {
            continue;
        }

        // symlink_metadata: never follow a link out of the directory
        let meta = match entry.path().symlink_metadata() {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(file = name, error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        let age = meta
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        match fs::remove_file(entry.path()) {
            Ok(()) => {
                tracing::info!(file = name, age_secs = age.as_secs(), "Swept stale temp file");
                removed += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(file = name, error = %e, "Failed to sweep temp file"),
        }
    }

    Ok(removed)
}

fn is_temp_name(name: &str) -> bool {
    SWEEPABLE_PREFIXES.iter().any(|prefix| {
        name.strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('_'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_temp_names() {
        assert!(is_temp_name("downloaded_abc123.png"));
        assert!(is_temp_name("base64_abc.png"));
        assert!(is_temp_name("avatar_abc.jpg"));
        assert!(is_temp_name("local_abc.bmp"));
        assert!(!is_temp_name("mirror_left_to_right_abc.png"));
        assert!(!is_temp_name("downloadedabc.png"));
        assert!(!is_temp_name("notes.txt"));
    }

    #[test]
    fn test_sweep_only_touches_old_temp_files() {
        let dir = tempdir().unwrap();
        let data_dir = DataDir::open(dir.path()).unwrap();
        for name in ["downloaded_1.png", "mirror_top_to_bottom_1.png", "keep.txt"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        // Nothing is old enough yet.
        assert_eq!(
            sweep_stale_temps(&data_dir, Duration::from_secs(3600)).unwrap(),
            0
        );

        assert_eq!(sweep_stale_temps(&data_dir, Duration::ZERO).unwrap(), 1);
        assert!(!dir.path().join("downloaded_1.png").exists());
        assert!(dir.path().join("mirror_top_to_bottom_1.png").exists());
        assert!(dir.path().join("keep.txt").exists());
    }
}
