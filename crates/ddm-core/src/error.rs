use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{file}: {msg} at line {line}, wrong line is '{content}'")]
    ParseLine {
        file: String,
        line: u32,
        msg: String,
        content: String,
    },
    #[error("{file}: {msg} before line {line}")]
    ParseBlock { file: String, line: u32, msg: String },
    #[error("{op}: could not find the path {path}")]
    PathNotFound { op: &'static str, path: String },
    #[error("{op}: {path} is not a directory")]
    NotADirectory { op: &'static str, path: String },
    #[error("{op}: {path} already exists in the tree")]
    AlreadyExists { op: &'static str, path: String },
    #[error("copy: source relative path must not be empty")]
    EmptySourcePath,
    #[error("refusing to remove the tree root")]
    RemoveRoot,
    #[error("not a symbolic link: {0}")]
    NotASymlink(String),
    #[error("{0}: tree was not constructed from the filesystem")]
    NoTopPath(&'static str),
    #[error("{0} is not a directory")]
    ScanRootNotDirectory(PathBuf),
    #[error("cannot copy unknown file type: {0}")]
    UnsupportedCopy(String),
    #[error("ignore option {0} not valid")]
    InvalidIgnoreOption(String),
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("could not open for writing: {0}")]
    CreateFile(PathBuf),
    #[error(transparent)]
    Fs(#[from] ddm_fs::FsError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
