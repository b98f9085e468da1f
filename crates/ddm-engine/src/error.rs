use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] ddm_core::CoreError),
    #[error(transparent)]
    Fs(#[from] ddm_fs::FsError),
    #[error("{0}")]
    Scan(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
