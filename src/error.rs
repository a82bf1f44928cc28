use std::io;
use thiserror::Error;

/// Central error type for the ravel server core.
#[derive(Debug, Error)]
pub enum RavelError {
    /// Underlying I/O error from the OS or network.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Invalid or unreadable configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Worker pool could not be constructed (bad parameters or spawn failure).
    #[error("worker pool: {0}")]
    PoolBuild(String),
    /// No credential-store handle became available within the acquire timeout.
    #[error("credential store exhausted")]
    StoreUnavailable,
}

pub type RavelResult<T> = Result<T, RavelError>;
