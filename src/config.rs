use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

const APP_DIR_NAME: &str = "share-transfer";
const CHECKPOINT_DIR_NAME: &str = "checkpoints";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub checkpoint_dir: PathBuf,
    pub checkpoint_max_age_secs: u64,
    pub drop_missing_on_resume: bool,
    pub chunk_size: usize,
    pub sample_interval_ms: u64,
    pub completed_display_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let checkpoint_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME)
            .join(CHECKPOINT_DIR_NAME);

        Self {
            checkpoint_dir,
            checkpoint_max_age_secs: 24 * 60 * 60,
            drop_missing_on_resume: true,
            chunk_size: 256 * 1024,
            sample_interval_ms: 500,
            completed_display_ms: 3_000,
        }
    }
}

impl EngineConfig {
    pub fn with_checkpoint_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: dir.into(),
            ..Default::default()
        }
    }

    pub fn load_or_default(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let path = match path {
            None => return Ok(Self::default()),
            Some(p) => p,
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file '{}'", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file '{}'", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than zero");
        }
        if self.sample_interval_ms == 0 {
            anyhow::bail!("sample_interval_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn checkpoint_max_age(&self) -> Duration {
        Duration::from_secs(self.checkpoint_max_age_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn completed_display(&self) -> Duration {
        Duration::from_millis(self.completed_display_ms)
    }
}
