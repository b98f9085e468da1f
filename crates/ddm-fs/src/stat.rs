//! lstat wrapper exposing the extended fields the standard
//! `std::fs::Metadata` accessors scatter across platform extension traits.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::error::FsError;
use crate::owner::{lookup_group, lookup_user};

/// File type as far as this tool is concerned. FIFOs, devices and
/// sockets all collapse into `Unknown`: their presence is tracked,
/// nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    Unknown,
}

impl FileKind {
    /// Decode the type nibble of a raw `st_mode`.
    fn from_mode(mode: u32) -> Self {
        match (mode >> 12) & 0xf {
            0o04 => FileKind::Directory,
            0o10 => FileKind::Regular,
            0o12 => FileKind::Symlink,
            _ => FileKind::Unknown,
        }
    }
}

/// One lstat worth of metadata: type, 12-bit mode, owner, mtime, size
/// and hard link count, all from a single syscall.
#[derive(Debug, Clone)]
pub struct ExtFileStatus {
    kind: FileKind,
    mode: u32,
    uid: u32,
    gid: u32,
    mtime: i64,
    size: u64,
    nlink: u64,
}

impl ExtFileStatus {
    /// lstat `path`; never follows symlinks.
    pub fn symlink_status(path: &Path) -> Result<Self, FsError> {
        let md = fs::symlink_metadata(path).map_err(|source| FsError::Stat {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            kind: FileKind::from_mode(md.mode()),
            mode: md.mode() & 0o7777,
            uid: md.uid(),
            gid: md.gid(),
            mtime: md.mtime(),
            size: md.size(),
            nlink: md.nlink(),
        })
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    /// Permission bits including setuid/setgid/sticky (12 bits).
    pub fn permissions(&self) -> u32 {
        self.mode
    }

    /// Owner resolved to a name, or the decimal uid if unknown.
    pub fn user(&self) -> Result<String, FsError> {
        lookup_user(self.uid)
    }

    /// Group resolved to a name, or the decimal gid if unknown.
    pub fn group(&self) -> Result<String, FsError> {
        lookup_group(self.gid)
    }

    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn hard_link_count(&self) -> u64 {
        self.nlink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_mode_nibble() {
        assert_eq!(FileKind::from_mode(0o100644), FileKind::Regular);
        assert_eq!(FileKind::from_mode(0o040755), FileKind::Directory);
        assert_eq!(FileKind::from_mode(0o120777), FileKind::Symlink);
        // FIFO, character device, block device, socket
        assert_eq!(FileKind::from_mode(0o010644), FileKind::Unknown);
        assert_eq!(FileKind::from_mode(0o020644), FileKind::Unknown);
        assert_eq!(FileKind::from_mode(0o060644), FileKind::Unknown);
        assert_eq!(FileKind::from_mode(0o140755), FileKind::Unknown);
    }

    #[test]
    fn status_of_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("f.txt");
        std::fs::write(&p, b"hello").unwrap();
        let st = ExtFileStatus::symlink_status(&p).unwrap();
        assert_eq!(st.kind(), FileKind::Regular);
        assert_eq!(st.size(), 5);
        assert_eq!(st.hard_link_count(), 1);
    }

    #[test]
    fn status_does_not_follow_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        let link = dir.path().join("link");
        std::fs::write(&target, b"x").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();
        let st = ExtFileStatus::symlink_status(&link).unwrap();
        assert_eq!(st.kind(), FileKind::Symlink);
    }
}
