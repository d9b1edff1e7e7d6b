//! Builds a wire [`Attributes`] record from host filesystem metadata.

use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::wire::{Attributes, EntryType, SYMLINK_PLACEHOLDER_SIZE};

/// Probes `path`'s attributes, reporting symlinks (not following them) with
/// `type=2` and substituting `size=4096` when the host reports zero, so the
/// guest's readlink buffer sizing stays correct.
pub async fn probe(path: &Path) -> std::io::Result<Attributes> {
    let metadata = tokio::fs::symlink_metadata(path).await?;
    Ok(from_metadata(&metadata))
}

fn from_metadata(metadata: &std::fs::Metadata) -> Attributes {
    let kind = if metadata.is_dir() {
        EntryType::Directory
    } else if metadata.file_type().is_symlink() {
        EntryType::Symlink
    } else {
        EntryType::RegularFile
    };

    let mut size = metadata.size();
    if kind == EntryType::Symlink && size == 0 {
        size = SYMLINK_PLACEHOLDER_SIZE;
    }

    Attributes {
        fsid: metadata.dev(),
        fileid: metadata.ino(),
        size,
        used: size,
        kind: kind.as_u32(),
        mode: kind.mode_bits(),
        nlink: metadata.nlink() as u32,
        uid: metadata.uid(),
        gid: metadata.gid(),
        atime: metadata.atime().max(0) as u32,
        mtime: metadata.mtime().max(0) as u32,
        ctime: metadata.ctime().max(0) as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn directory_reports_directory_type() {
        let dir = tempfile::tempdir().unwrap();
        let attrs = probe(dir.path()).await.unwrap();
        assert_eq!(attrs.entry_type(), EntryType::Directory);
        assert_eq!(attrs.mode, EntryType::Directory.mode_bits());
    }

    #[tokio::test]
    async fn regular_file_reports_actual_size() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a");
        std::fs::write(&file_path, b"hello").unwrap();
        let attrs = probe(&file_path).await.unwrap();
        assert_eq!(attrs.entry_type(), EntryType::RegularFile);
        assert_eq!(attrs.size, 5);
    }

    #[tokio::test]
    async fn zero_size_symlink_is_reported_as_4096() {
        let dir = tempfile::tempdir().unwrap();
        let link_path = dir.path().join("link");
        std::os::unix::fs::symlink("target-that-does-not-exist", &link_path).unwrap();
        let attrs = probe(&link_path).await.unwrap();
        assert_eq!(attrs.entry_type(), EntryType::Symlink);
        assert!(attrs.size >= SYMLINK_PLACEHOLDER_SIZE);
    }
}
