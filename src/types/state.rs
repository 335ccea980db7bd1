use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::TransferProgress;
use crate::error::TransferError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum TransferState {
    #[default]
    Idle,
    Queued,
    Running(TransferProgress),
    Completed(TransferSummary),
    Failed(ErrorInfo),
    Cancelled,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed(_) | TransferState::Failed(_) | TransferState::Cancelled
        )
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, TransferState::Queued | TransferState::Running(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferSummary {
    pub name: String,
    pub item_count: u64,
    pub total_bytes: u64,
    pub duration: Duration,
    pub average_speed: f64,
    pub sampled_average_speed: f64,
    pub max_speed: f64,
}

impl TransferSummary {
    pub fn preferred_speed(&self) -> f64 {
        self.sampled_average_speed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransferInProgress,
    InvalidRequest,
    ConnectionFailed,
    MetadataUnavailable,
    FileIoFailed,
    PartialFailure,
    Cancelled,
    CheckpointExpired,
    CheckpointInvalid,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransferInProgress => "transfer_in_progress",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::ConnectionFailed => "connection_failed",
            ErrorKind::MetadataUnavailable => "metadata_unavailable",
            ErrorKind::FileIoFailed => "file_io_failed",
            ErrorKind::PartialFailure => "partial_failure",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::CheckpointExpired => "checkpoint_expired",
            ErrorKind::CheckpointInvalid => "checkpoint_invalid",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&TransferError> for ErrorInfo {
    fn from(e: &TransferError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}
