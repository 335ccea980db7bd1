#![allow(dead_code)]

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    io,
    path::Path,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll},
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::io::{AsyncWrite, DuplexStream};

use share_transfer::{
    BoxedAsyncRead, BoxedAsyncWrite, EngineConfig, Entry, EntryKind, Store, StoreError,
    TransferCoordinator,
};

#[derive(Default)]
struct State {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    fail_reads: HashSet<String>,
    fail_writes: HashSet<String>,
    held_paths: HashSet<String>,
    held: Vec<(String, DuplexStream)>,
    writes: Vec<String>,
    refreshed: Vec<String>,
    disconnected: bool,
}

/// In-memory [`Store`] with `/`-separated paths and failure injection.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

fn parent(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(p, _)| p)
}

fn name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_dir(&self, path: &str) {
        let mut state = self.lock();
        let mut current = Some(path);
        while let Some(p) = current {
            if p.is_empty() {
                break;
            }
            state.dirs.insert(p.to_string());
            current = parent(p);
        }
    }

    pub fn add_file(&self, path: &str, content: impl Into<Vec<u8>>) {
        if let Some(p) = parent(path) {
            self.add_dir(p);
        }
        self.lock().files.insert(path.to_string(), content.into());
    }

    pub fn remove_file(&self, path: &str) {
        self.lock().files.remove(path);
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.lock().dirs.contains(path)
    }

    pub fn fail_read(&self, path: &str) {
        self.lock().fail_reads.insert(path.to_string());
    }

    pub fn fail_write(&self, path: &str) {
        self.lock().fail_writes.insert(path.to_string());
    }

    /// Reads of `path` return a pipe the test feeds through [`Self::take_held`].
    pub fn hold_read(&self, path: &str) {
        self.lock().held_paths.insert(path.to_string());
    }

    pub fn clear_faults(&self) {
        let mut state = self.lock();
        state.fail_reads.clear();
        state.fail_writes.clear();
        state.held_paths.clear();
        state.disconnected = false;
    }

    pub fn set_disconnected(&self, disconnected: bool) {
        self.lock().disconnected = disconnected;
    }

    /// Paths opened for writing, in order.
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    pub fn refreshed(&self) -> Vec<String> {
        self.lock().refreshed.clone()
    }

    /// Waits until a held read of `path` was opened and hands over its feeding
    /// end.
    pub async fn take_held(&self, path: &str) -> DuplexStream {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let mut state = self.lock();
                    if let Some(i) = state.held.iter().position(|(p, _)| p == path) {
                        return state.held.remove(i).1;
                    }
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("held read was never opened")
    }

    fn check_connected(&self) -> anyhow::Result<()> {
        if self.lock().disconnected {
            Err(StoreError::Disconnected.into())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn meta(&self, path: &str) -> anyhow::Result<Entry> {
        self.check_connected()?;
        let state = self.lock();

        if let Some(content) = state.files.get(path) {
            return Ok(Entry {
                name: name(path),
                path: path.to_string(),
                kind: EntryKind::File,
                size: Some(content.len() as u64),
            });
        }

        if state.dirs.contains(path) {
            return Ok(Entry {
                name: name(path),
                path: path.to_string(),
                kind: EntryKind::Dir,
                size: None,
            });
        }

        Err(StoreError::NotFound(path.to_string()).into())
    }

    async fn list(&self, path: &str) -> anyhow::Result<Vec<Entry>> {
        self.check_connected()?;
        let state = self.lock();

        if !state.dirs.contains(path) {
            return Err(StoreError::NotFound(path.to_string()).into());
        }

        let mut entries: Vec<Entry> = state
            .dirs
            .iter()
            .filter(|d| parent(d) == Some(path))
            .map(|d| Entry {
                name: name(d),
                path: d.clone(),
                kind: EntryKind::Dir,
                size: None,
            })
            .collect();

        entries.extend(
            state
                .files
                .iter()
                .filter(|(f, _)| parent(f) == Some(path))
                .map(|(f, c)| Entry {
                    name: name(f),
                    path: f.clone(),
                    kind: EntryKind::File,
                    size: Some(c.len() as u64),
                }),
        );

        // Listing order is up to the store.
        entries.reverse();
        Ok(entries)
    }

    async fn read(&self, path: &str) -> anyhow::Result<BoxedAsyncRead<'static>> {
        self.check_connected()?;
        let mut state = self.lock();

        if state.fail_reads.contains(path) {
            return Err(anyhow!("injected read failure on {}", path));
        }

        if state.held_paths.contains(path) {
            let (feed, reader) = tokio::io::duplex(64);
            state.held.push((path.to_string(), feed));
            return Ok(Box::pin(reader));
        }

        match state.files.get(path) {
            Some(content) => Ok(Box::pin(io::Cursor::new(content.clone()))),
            None => Err(StoreError::NotFound(path.to_string()).into()),
        }
    }

    async fn write(&self, path: &str) -> anyhow::Result<BoxedAsyncWrite<'static>> {
        self.check_connected()?;
        let mut state = self.lock();

        state.writes.push(path.to_string());
        if state.fail_writes.contains(path) {
            return Err(anyhow!("injected write failure on {}", path));
        }

        state.files.insert(path.to_string(), Vec::new());
        Ok(Box::pin(MemoryWriter {
            state: Arc::clone(&self.state),
            path: path.to_string(),
        }))
    }

    async fn create_dir(&self, path: &str) -> anyhow::Result<()> {
        self.check_connected()?;
        self.add_dir(path);
        Ok(())
    }

    async fn delete(&self, path: &str) -> anyhow::Result<()> {
        self.check_connected()?;
        let mut state = self.lock();
        if state.files.remove(path).is_none() && !state.dirs.remove(path) {
            return Err(StoreError::NotFound(path.to_string()).into());
        }
        Ok(())
    }

    fn refresh(&self, path: &str) {
        self.lock().refreshed.push(path.to_string());
    }
}

struct MemoryWriter {
    state: Arc<Mutex<State>>,
    path: String,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.state.lock().unwrap();
        if state.disconnected {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::Other,
                StoreError::Disconnected,
            )));
        }
        state
            .files
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

pub fn config(checkpoint_dir: &Path) -> EngineConfig {
    let mut config = EngineConfig::with_checkpoint_dir(checkpoint_dir);
    config.chunk_size = 4;
    config.completed_display_ms = 60_000;
    config
}

pub fn coordinator(
    remote: &MemoryStore,
    local: &MemoryStore,
    config: EngineConfig,
) -> TransferCoordinator {
    TransferCoordinator::new(Arc::new(remote.clone()), Arc::new(local.clone()), config)
}

/// Five small files below `/share/photos`.
pub fn photo_share() -> MemoryStore {
    let remote = MemoryStore::new();
    for (i, n) in ["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"].iter().enumerate() {
        remote.add_file(&format!("/share/photos/{}", n), vec![i as u8; 10 + i]);
    }
    remote
}
