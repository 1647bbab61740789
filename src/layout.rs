//! On-disk layout: deterministic file naming and segment pre-sizing for the
//! archive directory.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::ArchiveResult;

/// Extension used for both metadata and segment files.
const REC_EXT: &str = "rec";

/// Path to a recording's metadata file: `<archiveDir>/<recordingId>.rec`.
pub fn metadata_path(archive_dir: &Path, recording_id: u64) -> PathBuf {
    archive_dir.join(format!("{recording_id}.{REC_EXT}"))
}

/// Path to one of a recording's segment files:
/// `<archiveDir>/<recordingId>-<segmentIndex>.rec`.
pub fn segment_path(archive_dir: &Path, recording_id: u64, segment_index: u64) -> PathBuf {
    archive_dir.join(format!("{recording_id}-{segment_index}.{REC_EXT}"))
}

/// Creates and pre-sizes a brand new segment file to exactly
/// `segment_file_length` bytes. Fails if the file already exists.
pub fn create_segment_file(path: &Path, segment_file_length: u64) -> ArchiveResult<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)?;
    file.set_len(segment_file_length)?;
    Ok(file)
}

/// Opens an existing segment file read-only, verifying it is exactly
/// `segment_file_length` bytes (a shorter file indicates corruption or a
/// write that was interrupted mid-preallocation).
pub fn open_segment_file_read_only(path: &Path, segment_file_length: u64) -> ArchiveResult<File> {
    let file = OpenOptions::new().read(true).open(path)?;
    let len = file.metadata()?.len();
    if len != segment_file_length {
        return Err(crate::error::ArchiveError::InvalidDescriptor(format!(
            "segment file {path:?} has length {len}, expected {segment_file_length}"
        )));
    }
    Ok(file)
}

/// Opens an existing segment file read-write, for a recorder resuming a
/// segment it already created (used only on the write-from-start bootstrap
/// path; mid-life reopen never happens within one recorder's lifetime).
pub fn open_segment_file_read_write(path: &Path) -> ArchiveResult<File> {
    Ok(OpenOptions::new().read(true).write(true).open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn deterministic_and_collision_free_names() {
        let dir = PathBuf::from("/archive");
        assert_eq!(metadata_path(&dir, 42), PathBuf::from("/archive/42.rec"));
        assert_eq!(segment_path(&dir, 42, 0), PathBuf::from("/archive/42-0.rec"));
        assert_ne!(segment_path(&dir, 42, 0), segment_path(&dir, 42, 1));
        assert_ne!(segment_path(&dir, 42, 0), segment_path(&dir, 43, 0));
    }

    #[test]
    fn segment_file_is_presized() {
        let dir = tempdir().unwrap();
        let path = segment_path(dir.path(), 1, 0);
        let file = create_segment_file(&path, 16384).unwrap();
        assert_eq!(file.metadata().unwrap().len(), 16384);
    }

    #[test]
    fn create_segment_file_fails_if_exists() {
        let dir = tempdir().unwrap();
        let path = segment_path(dir.path(), 1, 0);
        create_segment_file(&path, 4096).unwrap();
        assert!(create_segment_file(&path, 4096).is_err());
    }
}
