use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferProgress {
    File {
        fraction_done: f64,
        total_bytes: u64,
        instant_speed_bps: f64,
    },
    Directory {
        completed_items: u64,
        total_items: u64,
        current_item: Option<String>,
        bytes_sent: u64,
    },
}

impl TransferProgress {
    pub fn file(done: u64, total_bytes: u64) -> Self {
        let fraction_done = if total_bytes == 0 {
            1.0
        } else {
            (done as f64 / total_bytes as f64).min(1.0)
        };

        TransferProgress::File {
            fraction_done,
            total_bytes,
            instant_speed_bps: 0.0,
        }
    }

    pub fn with_speed(self, speed: f64) -> Self {
        match self {
            TransferProgress::File {
                fraction_done,
                total_bytes,
                ..
            } => TransferProgress::File {
                fraction_done,
                total_bytes,
                instant_speed_bps: speed,
            },
            p => p,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub session_bytes: u64,
    pub progress: TransferProgress,
}
