//! Whole-file replacement with crash recovery.
//!
//! Compaction writes a complete new store next to the original and swaps it
//! in with two renames:
//!
//! ```text
//! original     -> original.old
//! original.new -> original
//! remove original.old
//! ```
//!
//! A crash between the renames leaves `original.old` behind with no
//! `original`, which [`recover`] undoes on the next open.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::BlobResult;
use crate::record::HEADER;

/// What [`recover`] found next to a store file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// No leftovers from an interrupted replace.
    Clean,
    /// The replace had finished; only the backup was left to delete.
    RemovedStaleBackup,
    /// The replace was interrupted before the new file was in place; the
    /// backup was moved back.
    RestoredBackup,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Where the original is kept while a replace is in progress.
#[must_use]
pub fn backup_path(path: &Path) -> PathBuf {
    with_suffix(path, ".old")
}

/// Where a replacement is built before being swapped in.
#[must_use]
pub fn scratch_path(path: &Path) -> PathBuf {
    with_suffix(path, ".new")
}

/// Whether `path` exists and starts with the store header.
fn is_store(path: &Path) -> bool {
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let mut header = [0u8; HEADER.len()];
    file.read_exact(&mut header).is_ok() && &header == HEADER
}

/// Swap `replacement` in for `original`.
///
/// `replacement` must already be complete and synced.
pub fn atomic_replace(original: &Path, replacement: &Path) -> BlobResult<()> {
    let backup = backup_path(original);
    if original.exists() {
        fs::rename(original, &backup)?;
    }
    fs::rename(replacement, original)?;
    if backup.exists() {
        fs::remove_file(&backup)?;
    }
    tracing::debug!(
        "Replaced {} with {}",
        original.display(),
        replacement.display()
    );
    Ok(())
}

/// Clean up after an interrupted [`atomic_replace`] of `path`.
///
/// A leftover scratch file is always discarded: it was either never swapped
/// in or is about to be superseded by the restored backup.
pub fn recover(path: &Path) -> BlobResult<Recovery> {
    let backup = backup_path(path);
    let scratch = scratch_path(path);

    if scratch.exists() {
        tracing::debug!("Discarding abandoned {}", scratch.display());
        fs::remove_file(&scratch)?;
    }

    if !backup.exists() {
        return Ok(Recovery::Clean);
    }

    if is_store(path) {
        fs::remove_file(&backup)?;
        Ok(Recovery::RemovedStaleBackup)
    } else {
        fs::rename(&backup, path)?;
        Ok(Recovery::RestoredBackup)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::{BlobStore, StoreConfig};

    fn store_with(path: &Path, payload: &[u8]) -> crate::Blob {
        let store = BlobStore::create(path, StoreConfig::default()).unwrap();
        let blob = store.write_compressed(payload).unwrap();
        store.sync().unwrap();
        blob
    }

    #[test]
    fn test_replace_swaps_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timeline.rwd");
        store_with(&path, b"before");
        let blob = store_with(&scratch_path(&path), b"after");

        atomic_replace(&path, &scratch_path(&path)).unwrap();

        assert!(!backup_path(&path).exists());
        assert!(!scratch_path(&path).exists());
        let store = BlobStore::open(&path, StoreConfig::default()).unwrap();
        assert_eq!(store.read(blob).unwrap(), b"after");
    }

    #[test]
    fn test_interrupted_between_renames_restores_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timeline.rwd");
        let blob = store_with(&path, b"before");
        store_with(&scratch_path(&path), b"after");

        // First rename done, second never happened.
        fs::rename(&path, backup_path(&path)).unwrap();

        assert_eq!(recover(&path).unwrap(), Recovery::RestoredBackup);
        assert!(!scratch_path(&path).exists());
        let store = BlobStore::open(&path, StoreConfig::default()).unwrap();
        assert_eq!(store.read(blob).unwrap(), b"before");
    }

    #[test]
    fn test_interrupted_before_delete_keeps_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timeline.rwd");
        store_with(&path, b"before");
        let blob = store_with(&scratch_path(&path), b"after");

        fs::rename(&path, backup_path(&path)).unwrap();
        fs::rename(scratch_path(&path), &path).unwrap();

        // Opening the store runs recovery.
        let store = BlobStore::open(&path, StoreConfig::default()).unwrap();
        assert!(!backup_path(&path).exists());
        assert_eq!(store.read(blob).unwrap(), b"after");
    }

    #[test]
    fn test_clean_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timeline.rwd");
        store_with(&path, b"only");
        assert_eq!(recover(&path).unwrap(), Recovery::Clean);
    }
}
