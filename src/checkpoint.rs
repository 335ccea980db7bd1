use std::{
    collections::{BTreeSet, HashSet},
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, trace, warn};

use crate::{
    error::{Result, TransferError},
    types::{TransferDirection, TransferRequest},
};

pub const CHECKPOINT_VERSION: u32 = 1;

const RECORD_EXT: &str = "json";
const TEMP_EXT: &str = "json.tmp";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointKey {
    pub remote_path: String,
    pub local_path: PathBuf,
    pub direction: TransferDirection,
}

impl CheckpointKey {
    pub fn new(
        remote_path: impl Into<String>,
        local_path: impl Into<PathBuf>,
        direction: TransferDirection,
    ) -> Self {
        Self {
            remote_path: remote_path.into(),
            local_path: local_path.into(),
            direction,
        }
    }

    pub fn file_name(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.direction.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(self.remote_path.as_bytes());
        hasher.update([0]);
        hasher.update(self.local_path.to_string_lossy().as_bytes());

        format!("{}.{}", hex::encode(hasher.finalize()), RECORD_EXT)
    }
}

impl From<&TransferRequest> for CheckpointKey {
    fn from(req: &TransferRequest) -> Self {
        Self::new(req.remote_path.clone(), req.local_path.clone(), req.direction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub remote_path: String,
    pub local_path: PathBuf,
    pub completed_items: BTreeSet<String>,
    pub total_items: u64,
    pub bytes_transferred: u64,
    pub direction: TransferDirection,
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(key: &CheckpointKey, total_items: u64) -> Self {
        Self {
            remote_path: key.remote_path.clone(),
            local_path: key.local_path.clone(),
            completed_items: BTreeSet::new(),
            total_items,
            bytes_transferred: 0,
            direction: key.direction,
            timestamp: Utc::now(),
        }
    }

    pub fn key(&self) -> CheckpointKey {
        CheckpointKey::new(self.remote_path.clone(), self.local_path.clone(), self.direction)
    }

    pub fn completed_count(&self) -> u64 {
        self.completed_items.len() as u64
    }

    pub fn is_complete(&self, item: &str) -> bool {
        self.completed_items.contains(item)
    }

    pub fn is_finished(&self) -> bool {
        self.completed_count() >= self.total_items
    }

    /// Records `item` as transferred. Returns false if it was already recorded
    /// or the record is full.
    pub fn mark_complete(&mut self, item: &str, bytes: u64) -> bool {
        if self.completed_items.contains(item) || self.is_finished() {
            return false;
        }

        self.completed_items.insert(item.to_string());
        self.bytes_transferred += bytes;
        self.timestamp = Utc::now();
        true
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) < max_age
    }

    pub fn reconcile(&mut self, items: &HashSet<&str>, total_items: u64) -> usize {
        let before = self.completed_items.len();
        self.completed_items.retain(|i| items.contains(i.as_str()));
        self.total_items = total_items;
        before - self.completed_items.len()
    }

    fn check_consistent(&self) -> Result<()> {
        if self.completed_count() > self.total_items {
            return Err(TransferError::CheckpointInvalid {
                reason: format!(
                    "{} completed items recorded for {} total",
                    self.completed_count(),
                    self.total_items
                ),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct VersionProbe {
    version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    version: u32,
    #[serde(flatten)]
    checkpoint: Checkpoint,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    max_age: Duration,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            dir: dir.into(),
            max_age,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    fn record_path(&self, key: &CheckpointKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Loads the checkpoint for `key`.
    ///
    /// `Ok(None)` means there is nothing to resume. Expired and unusable
    /// records are removed and reported as
    /// [`TransferError::CheckpointExpired`] or
    /// [`TransferError::CheckpointInvalid`].
    pub async fn load(&self, key: &CheckpointKey) -> Result<Option<Checkpoint>> {
        let path = self.record_path(key);

        let json = match fs::read_to_string(&path).await {
            Ok(j) => j,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path, e)),
        };

        let checkpoint = match parse_record(&json).and_then(|c| {
            if c.key() != *key {
                return Err(TransferError::CheckpointInvalid {
                    reason: "record belongs to a different transfer".to_string(),
                });
            }
            Ok(c)
        }) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discarding unusable checkpoint");
                self.remove_file(&path).await?;
                return Err(e);
            }
        };

        let age = checkpoint.age(Utc::now());
        if age >= self.max_age {
            warn!(
                path = %path.display(),
                age_secs = age.as_secs(),
                "Discarding expired checkpoint"
            );
            self.remove_file(&path).await?;
            return Err(TransferError::CheckpointExpired {
                age_secs: age.as_secs(),
            });
        }

        Ok(Some(checkpoint))
    }

    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        checkpoint.check_consistent()?;

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_err(&self.dir, e))?;

        let path = self.record_path(&checkpoint.key());
        let tmp = path.with_extension(TEMP_EXT);

        let record = CheckpointRecord {
            version: CHECKPOINT_VERSION,
            checkpoint: checkpoint.clone(),
        };
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| io_err(&path, io::Error::new(io::ErrorKind::InvalidData, e)))?;

        let mut file = fs::File::create(&tmp).await.map_err(|e| io_err(&tmp, e))?;
        file.write_all(&json).await.map_err(|e| io_err(&tmp, e))?;
        file.sync_all().await.map_err(|e| io_err(&tmp, e))?;
        drop(file);

        fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_err(&path, e))?;

        trace!(
            path = %path.display(),
            completed = checkpoint.completed_count(),
            total = checkpoint.total_items,
            "Checkpoint persisted"
        );
        Ok(())
    }

    pub async fn delete(&self, key: &CheckpointKey) -> Result<()> {
        let path = self.record_path(key);
        self.remove_file(&path).await?;
        debug!(path = %path.display(), "Checkpoint removed");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Checkpoint>> {
        let mut checkpoints = Vec::new();

        for path in self.record_files().await? {
            if let Ok(json) = fs::read_to_string(&path).await {
                if let Ok(c) = parse_record(&json) {
                    checkpoints.push(c);
                }
            }
        }

        Ok(checkpoints)
    }

    pub async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;

        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_err(&self.dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_err(&self.dir, e))?
        {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();

            let stale = if name.ends_with(TEMP_EXT) {
                true
            } else if name.ends_with(RECORD_EXT) {
                match fs::read_to_string(&path).await {
                    Ok(json) => match parse_record(&json) {
                        Ok(c) => !c.is_valid_at(now, self.max_age),
                        Err(_) => true,
                    },
                    Err(_) => false,
                }
            } else {
                false
            };

            if stale {
                self.remove_file(&path).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, dir = %self.dir.display(), "Purged stale checkpoints");
        }
        Ok(removed)
    }

    async fn record_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(io_err(&self.dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_err(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some(RECORD_EXT) {
                files.push(path);
            }
        }

        Ok(files)
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(path, e)),
        }
    }
}

fn parse_record(json: &str) -> Result<Checkpoint> {
    let probe: VersionProbe =
        serde_json::from_str(json).map_err(|e| TransferError::CheckpointInvalid {
            reason: format!("unreadable record: {}", e),
        })?;

    if probe.version != CHECKPOINT_VERSION {
        return Err(TransferError::CheckpointInvalid {
            reason: format!("unsupported record version {}", probe.version),
        });
    }

    let record: CheckpointRecord =
        serde_json::from_str(json).map_err(|e| TransferError::CheckpointInvalid {
            reason: format!("malformed record: {}", e),
        })?;

    record.checkpoint.check_consistent()?;
    Ok(record.checkpoint)
}

fn io_err(path: &Path, e: io::Error) -> TransferError {
    TransferError::FileIoFailed {
        path: path.to_string_lossy().to_string(),
        source: anyhow::Error::new(e),
    }
}
