//! Copy, create and delete primitives used by the tree-and-filesystem
//! mutations.

use std::path::Path;

use crate::error::FsError;

/// Copy a regular file. Content and permission bits are preserved;
/// timestamps and ownership are the caller's business.
pub fn copy_file(from: &Path, to: &Path) -> Result<(), FsError> {
    std::fs::copy(from, to).map_err(|source| FsError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Re-create the symlink at `from` as `to`, target taken verbatim from
/// `readlink` — never resolved.
pub fn copy_symlink(from: &Path, to: &Path) -> Result<(), FsError> {
    let target = std::fs::read_link(from).map_err(|source| FsError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })?;
    std::os::unix::fs::symlink(&target, to).map_err(|source| FsError::CreateSymlink {
        path: to.to_path_buf(),
        source,
    })
}

/// Create a symlink at `path` pointing at `target` (stored verbatim).
pub fn create_symlink(target: &Path, path: &Path) -> Result<(), FsError> {
    std::os::unix::fs::symlink(target, path).map_err(|source| FsError::CreateSymlink {
        path: path.to_path_buf(),
        source,
    })
}

pub fn create_dir(path: &Path) -> Result<(), FsError> {
    std::fs::create_dir(path).map_err(|source| FsError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Recursively delete `path`, which may be a file, symlink or directory.
/// Returns how many filesystem entries were removed.
pub fn remove_all(path: &Path) -> Result<u64, FsError> {
    let md = std::fs::symlink_metadata(path).map_err(|source| FsError::Remove {
        path: path.to_path_buf(),
        source,
    })?;
    if md.is_dir() {
        let mut count = 1;
        let entries = std::fs::read_dir(path).map_err(|source| FsError::Remove {
            path: path.to_path_buf(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| FsError::Remove {
                path: path.to_path_buf(),
                source,
            })?;
            count += remove_all(&entry.path())?;
        }
        std::fs::remove_dir(path).map_err(|source| FsError::Remove {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(count)
    } else {
        std::fs::remove_file(path).map_err(|source| FsError::Remove {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn copy_file_preserves_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, b"data").unwrap();
        std::fs::set_permissions(&a, std::fs::Permissions::from_mode(0o640)).unwrap();
        copy_file(&a, &b).unwrap();
        assert_eq!(std::fs::read(&b).unwrap(), b"data");
        let mode = std::fs::metadata(&b).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    fn copy_symlink_keeps_target_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("link");
        let copy = dir.path().join("copy");
        // Dangling on purpose: the target must not be resolved.
        std::os::unix::fs::symlink("../does/not/exist", &link).unwrap();
        copy_symlink(&link, &copy).unwrap();
        assert_eq!(
            std::fs::read_link(&copy).unwrap(),
            std::path::PathBuf::from("../does/not/exist")
        );
    }

    #[test]
    fn remove_all_counts_entries() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("x"), b"1").unwrap();
        std::fs::write(sub.join("y"), b"2").unwrap();
        std::fs::create_dir(sub.join("inner")).unwrap();
        std::fs::write(sub.join("inner/z"), b"3").unwrap();
        assert_eq!(remove_all(&sub).unwrap(), 5);
        assert!(!sub.exists());
    }

    #[test]
    fn remove_all_on_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("f");
        std::fs::write(&f, b"x").unwrap();
        assert_eq!(remove_all(&f).unwrap(), 1);
    }
}
