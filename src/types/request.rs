use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::TransferError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    ToLocal,
    ToRemote,
}

impl TransferDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferDirection::ToLocal => "to_local",
            TransferDirection::ToRemote => "to_remote",
        }
    }
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub direction: TransferDirection,
    pub remote_path: String,
    pub local_path: PathBuf,
    pub is_directory: bool,
}

impl TransferRequest {
    pub fn file(
        direction: TransferDirection,
        remote_path: impl Into<String>,
        local_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            direction,
            remote_path: remote_path.into(),
            local_path: local_path.into(),
            is_directory: false,
        }
    }

    pub fn directory(
        direction: TransferDirection,
        remote_path: impl Into<String>,
        local_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            is_directory: true,
            ..Self::file(direction, remote_path, local_path)
        }
    }

    pub fn validate(&self) -> Result<(), TransferError> {
        if self.remote_path.trim().is_empty() {
            return Err(TransferError::InvalidRequest(
                "remote path is empty".to_string(),
            ));
        }

        if self.local_path.as_os_str().is_empty() {
            return Err(TransferError::InvalidRequest("local path is empty".to_string()));
        }

        Ok(())
    }

    pub fn local_path_str(&self) -> String {
        self.local_path.to_string_lossy().to_string()
    }

    pub fn source_path(&self) -> String {
        match self.direction {
            TransferDirection::ToLocal => self.remote_path.clone(),
            TransferDirection::ToRemote => self.local_path_str(),
        }
    }

    pub fn destination_path(&self) -> String {
        match self.direction {
            TransferDirection::ToLocal => self.local_path_str(),
            TransferDirection::ToRemote => self.remote_path.clone(),
        }
    }
}
