//! Thin capability surface over the host filesystem.
//!
//! The standard library covers most of what a metadata-preserving backup
//! tool needs, but not all of it: there is no portable way to read a
//! file's owner as a name, to change ownership without following a
//! symlink, or to set a symlink's mtime. This crate fills those gaps,
//! plus the streaming SHA-1 fingerprint used for change detection.

pub mod copy;
pub mod error;
pub mod hasher;
pub mod owner;
pub mod stat;
pub mod times;

pub use copy::{copy_file, copy_symlink, create_dir, create_symlink, remove_all};
pub use error::FsError;
pub use hasher::hash_file;
pub use owner::{change_ownership, lookup_gid, lookup_group, lookup_uid, lookup_user};
pub use stat::{ExtFileStatus, FileKind};
pub use times::set_symlink_mtime;

use std::path::Path;

/// Relative-path string for a path under `top`.
///
/// The metadata file format is plain text, so names must be valid UTF-8.
pub fn relative_to(path: &Path, top: &Path) -> Result<String, FsError> {
    let rel = path
        .strip_prefix(top)
        .map_err(|_| FsError::NotUnderTop {
            path: path.to_path_buf(),
            top: top.to_path_buf(),
        })?;
    rel.to_str()
        .map(|s| s.to_string())
        .ok_or_else(|| FsError::NonUtf8Path(path.to_path_buf()))
}
