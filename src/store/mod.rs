mod local;

pub use local::LocalStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{BoxedAsyncRead, BoxedAsyncWrite};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Dir,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
    pub size: Option<u64>,
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Dir)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection to the share was lost")]
    Disconnected,
    #[error("'{0}' does not exist")]
    NotFound(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn meta(&self, path: &str) -> anyhow::Result<Entry>;

    async fn list(&self, path: &str) -> anyhow::Result<Vec<Entry>>;

    async fn read(&self, path: &str) -> anyhow::Result<BoxedAsyncRead<'static>>;

    async fn write(&self, path: &str) -> anyhow::Result<BoxedAsyncWrite<'static>>;

    async fn create_dir(&self, path: &str) -> anyhow::Result<()>;

    async fn delete(&self, path: &str) -> anyhow::Result<()>;

    async fn exists(&self, path: &str) -> anyhow::Result<bool> {
        match self.meta(path).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn join(&self, base: &str, relative: &str) -> String {
        if relative.is_empty() {
            return base.to_string();
        }
        format!("{}/{}", base.trim_end_matches('/'), relative)
    }

    fn refresh(&self, _path: &str) {}
}

pub(crate) fn is_not_found(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        if let Some(StoreError::NotFound(_)) = cause.downcast_ref::<StoreError>() {
            return true;
        }
        matches!(
            cause.downcast_ref::<std::io::Error>(),
            Some(io) if io.kind() == std::io::ErrorKind::NotFound
        )
    })
}
