use std::path;

use anyhow::Context;
use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use tokio::fs;
use tokio_stream::wrappers as tsw;
use unwrap_or::unwrap_ok_or;

use super::{Entry, EntryKind, Store};
use crate::types::{BoxedAsyncRead, BoxedAsyncWrite};

#[derive(Debug, Clone, Default)]
pub struct LocalStore;

impl LocalStore {
    pub fn new() -> Self {
        Self
    }
}

pub async fn get_meta(path: &path::Path) -> anyhow::Result<Entry> {
    let id = path.to_string_lossy().to_string();

    let name = match path.file_name() {
        Some(n) => n.to_string_lossy().to_string(),
        None => id.clone(),
    };

    let meta = fs::metadata(path)
        .await
        .with_context(|| format!("Could not get metadata for file '{}'", id))?;

    let (kind, size) = if meta.is_file() {
        (EntryKind::File, Some(meta.len()))
    } else if meta.is_dir() {
        (EntryKind::Dir, None)
    } else {
        (EntryKind::Other, None)
    };

    Ok(Entry {
        name,
        path: id,
        kind,
        size,
    })
}

pub fn list_meta(path: &path::Path) -> impl Stream<Item = anyhow::Result<Entry>> + '_ {
    stream! {
        let id = path.to_string_lossy().to_string();
        let rd = fs::read_dir(path)
            .await
            .with_context(|| format!("Could not read directory '{}'", id));
        let rd = unwrap_ok_or!(rd, e, {
            yield Err(e);
            return;
        });

        let s = tsw::ReadDirStream::new(rd)
            .map_err(move |e| {
                anyhow::Error::new(e).context(format!("Error while reading directory '{}'", id))
            })
            .and_then(|d| async move { get_meta(d.path().as_path()).await });
        for await v in s { yield v; }
    }
}

#[async_trait]
impl Store for LocalStore {
    async fn meta(&self, path: &str) -> anyhow::Result<Entry> {
        get_meta(path::Path::new(path)).await
    }

    async fn list(&self, path: &str) -> anyhow::Result<Vec<Entry>> {
        list_meta(path::Path::new(path)).try_collect().await
    }

    async fn read(&self, path: &str) -> anyhow::Result<BoxedAsyncRead<'static>> {
        let file = fs::File::open(path)
            .await
            .with_context(|| format!("Could not read file '{}'", path))?;

        Ok(Box::pin(file))
    }

    async fn write(&self, path: &str) -> anyhow::Result<BoxedAsyncWrite<'static>> {
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await
            .with_context(|| format!("Could not write to file '{}'", path))?;

        Ok(Box::pin(file))
    }

    async fn create_dir(&self, path: &str) -> anyhow::Result<()> {
        fs::create_dir_all(path)
            .await
            .with_context(|| format!("Could not create directory '{}'", path))
    }

    async fn delete(&self, path: &str) -> anyhow::Result<()> {
        let entry = get_meta(path::Path::new(path)).await?;

        let res = if entry.is_dir() {
            fs::remove_dir(path).await
        } else {
            fs::remove_file(path).await
        };

        res.with_context(|| format!("Could not delete '{}'", path))
    }

    fn join(&self, base: &str, relative: &str) -> String {
        relative
            .split('/')
            .filter(|c| !c.is_empty())
            .fold(path::PathBuf::from(base), |p, c| p.join(c))
            .to_string_lossy()
            .to_string()
    }
}
