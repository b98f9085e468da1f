use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("cannot stat {path}: {source}")]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),
    #[error("{path} is not under top directory {top}")]
    NotUnderTop { path: PathBuf, top: PathBuf },
    #[error("user {0} not found in the system")]
    UserNotFound(String),
    #[error("group {0} not found in the system")]
    GroupNotFound(String),
    #[error("user/group database lookup failed (errno {0})")]
    IdLookup(i32),
    #[error("cannot change ownership of {path}: {source}")]
    ChangeOwnership {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot set modification time of {path}: {source}")]
    SetMtime {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot create symbolic link {path}: {source}")]
    CreateSymlink {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot remove {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot hash {path}: {source}")]
    Hash {
        path: PathBuf,
        source: std::io::Error,
    },
}
