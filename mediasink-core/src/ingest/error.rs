use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::proto::Status;
use crate::transcode::TranscodeError;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("queue at capacity")]
    QueueFull,
    #[error("duplicate upload (hash {hash})")]
    Duplicate { hash: String },
    #[error("compression failed: {0}")]
    Compression(#[from] TranscodeError),
    #[error("transfer failed: {detail}")]
    Transfer { detail: String },
    #[error("transfer failed: {source}")]
    TransferIo { source: io::Error },
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

pub type HandlerResult<T> = Result<T, HandlerError>;

impl HandlerError {
    pub(crate) fn transfer(detail: impl Into<String>) -> Self {
        HandlerError::Transfer {
            detail: detail.into(),
        }
    }

    /// The producer-visible status for this failure.
    pub fn status(&self) -> Status {
        match self {
            HandlerError::QueueFull => Status::QueueFull,
            HandlerError::Duplicate { .. } => Status::DuplicateFile,
            HandlerError::Compression(_) => Status::CompressionFailed,
            HandlerError::Transfer { .. } | HandlerError::TransferIo { .. } => {
                Status::TransferError
            }
            HandlerError::Io { .. } => Status::InternalError,
        }
    }
}
