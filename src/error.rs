use thiserror::Error;

use crate::{store::StoreError, types::ErrorKind};

pub type Result<T> = std::result::Result<T, TransferError>;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("a transfer is already in progress")]
    TransferInProgress,

    #[error("invalid transfer request: {0}")]
    InvalidRequest(String),

    #[error("connection to the share failed: {source:#}")]
    ConnectionFailed { source: anyhow::Error },

    #[error("could not determine the size of '{path}'")]
    MetadataUnavailable { path: String },

    #[error("I/O failed on '{path}': {source:#}")]
    FileIoFailed {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(
        "transfer of '{item_path}' failed after {completed_count} of {total_items} items: {source:#}"
    )]
    PartialFailure {
        item_path: String,
        completed_count: u64,
        total_items: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("transfer cancelled")]
    Cancelled,

    #[error("checkpoint expired {age_secs}s after it was written")]
    CheckpointExpired { age_secs: u64 },

    #[error("checkpoint is not usable: {reason}")]
    CheckpointInvalid { reason: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::TransferInProgress => ErrorKind::TransferInProgress,
            TransferError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            TransferError::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            TransferError::MetadataUnavailable { .. } => ErrorKind::MetadataUnavailable,
            TransferError::FileIoFailed { .. } => ErrorKind::FileIoFailed,
            TransferError::PartialFailure { .. } => ErrorKind::PartialFailure,
            TransferError::Cancelled => ErrorKind::Cancelled,
            TransferError::CheckpointExpired { .. } => ErrorKind::CheckpointExpired,
            TransferError::CheckpointInvalid { .. } => ErrorKind::CheckpointInvalid,
            TransferError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn from_store(path: &str, source: anyhow::Error) -> Self {
        if is_disconnect(&source) {
            TransferError::ConnectionFailed { source }
        } else {
            TransferError::FileIoFailed {
                path: path.to_string(),
                source,
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }

    pub(crate) fn into_underlying(self) -> anyhow::Error {
        match self {
            TransferError::ConnectionFailed { source }
            | TransferError::FileIoFailed { source, .. }
            | TransferError::PartialFailure { source, .. } => source,
            other => anyhow::Error::new(other),
        }
    }
}

fn is_disconnect(e: &anyhow::Error) -> bool {
    use std::io::ErrorKind as Io;

    e.chain().any(|cause| {
        if let Some(StoreError::Disconnected) = cause.downcast_ref::<StoreError>() {
            return true;
        }

        // Readers and writers can only report io::Error; stores wrap the
        // disconnect inside it.
        match cause.downcast_ref::<std::io::Error>() {
            Some(io) => {
                matches!(
                    io.get_ref().and_then(|inner| inner.downcast_ref::<StoreError>()),
                    Some(StoreError::Disconnected)
                ) || matches!(
                    io.kind(),
                    Io::ConnectionReset | Io::ConnectionAborted | Io::NotConnected | Io::BrokenPipe
                )
            }
            None => false,
        }
    })
}
