use thiserror::Error;

use crate::ftp::FtpError;
use crate::local::LocalError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Ftp(#[from] FtpError),

    #[error(transparent)]
    Local(#[from] LocalError),

    #[error("Another operation is already in progress")]
    Busy,

    #[error("No console or drive selected")]
    NoBackend,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Whether the active session should be dropped after this error.
    pub fn requires_reconnect(&self) -> bool {
        match self {
            Error::Ftp(e) => e.requires_reconnect(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
