//! Symlink-preserving modification time updates.

use std::path::Path;

use filetime::FileTime;

use crate::error::FsError;

/// Set the mtime of `path` without following symlinks.
///
/// The atime is re-read from the entry and written back unchanged, since
/// the underlying call sets both timestamps at once.
pub fn set_symlink_mtime(path: &Path, mtime: i64) -> Result<(), FsError> {
    let md = std::fs::symlink_metadata(path).map_err(|source| FsError::Stat {
        path: path.to_path_buf(),
        source,
    })?;
    let atime = FileTime::from_last_access_time(&md);
    let mtime = FileTime::from_unix_time(mtime, 0);
    filetime::set_symlink_file_times(path, atime, mtime).map_err(|source| {
        FsError::SetMtime {
            path: path.to_path_buf(),
            source,
        }
    })
}
