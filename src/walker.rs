use std::collections::HashSet;

use futures::{pin_mut, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use unwrap_or::unwrap_ok_or;

use crate::{
    checkpoint::{Checkpoint, CheckpointKey, CheckpointStore},
    copy::{copy_file, ensure_active},
    error::{Result, TransferError},
    store::{Entry, EntryKind, Store},
    task::ProgressSink,
    types::{ProgressUpdate, TransferProgress},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Dir,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkItem {
    pub id: String,
    pub source_path: String,
    pub kind: ItemKind,
    pub size: Option<u64>,
}

pub async fn enumerate(source: &dyn Store, root: &str) -> Result<Vec<WalkItem>> {
    let mut items = vec![];
    let mut stack: Vec<(Entry, String)> = vec![];

    push_children(source, root, "", &mut stack).await?;

    while let Some((entry, id)) = stack.pop() {
        match entry.kind {
            EntryKind::Dir => {
                push_children(source, &entry.path, &id, &mut stack).await?;
                items.push(WalkItem {
                    id,
                    source_path: entry.path,
                    kind: ItemKind::Dir,
                    size: None,
                });
            }
            EntryKind::File => items.push(WalkItem {
                id,
                source_path: entry.path,
                kind: ItemKind::File,
                size: entry.size,
            }),
            EntryKind::Other => debug!(path = %entry.path, "Skipping special file"),
        }
    }

    Ok(items)
}

async fn push_children(
    source: &dyn Store,
    dir: &str,
    prefix: &str,
    stack: &mut Vec<(Entry, String)>,
) -> Result<()> {
    let mut entries = unwrap_ok_or!(source.list(dir).await, e, {
        return Err(TransferError::from_store(dir, e));
    });

    entries.sort_by(|a, b| a.name.cmp(&b.name));

    for entry in entries.into_iter().rev() {
        let id = if prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{}/{}", prefix, entry.name)
        };
        stack.push((entry, id));
    }

    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkReport {
    pub total_items: u64,
    pub transferred_items: u64,
    pub skipped_items: u64,
    pub session_bytes: u64,
}

pub struct FolderWalker<'a> {
    pub source: &'a dyn Store,
    pub dest: &'a dyn Store,
    pub checkpoints: &'a CheckpointStore,
    pub key: CheckpointKey,
    pub source_root: String,
    pub dest_root: String,
    pub chunk_size: usize,
    pub drop_missing_on_resume: bool,
    pub cancel: &'a CancellationToken,
    pub progress: &'a ProgressSink,
}

impl<'a> FolderWalker<'a> {
    pub async fn run(self) -> Result<WalkReport> {
        ensure_active(self.cancel)?;

        let items = enumerate(self.source, &self.source_root).await?;
        let total_items = items.iter().filter(|i| i.kind == ItemKind::File).count() as u64;

        ensure_active(self.cancel)?;
        self.dest
            .create_dir(&self.dest_root)
            .await
            .map_err(|e| TransferError::from_store(&self.dest_root, e))?;

        if total_items == 0 {
            for item in items.iter() {
                ensure_active(self.cancel)?;
                self.create_dir(item, 0, 0).await?;
            }
            self.checkpoints.delete(&self.key).await?;
            info!(root = %self.source_root, "Directory has no files to transfer");
            return Ok(WalkReport::default());
        }

        let mut checkpoint = self.resume_or_fresh(&items, total_items).await;
        self.checkpoints.save(&checkpoint).await?;

        let mut report = WalkReport {
            total_items,
            ..Default::default()
        };

        for item in items.iter() {
            if self.cancel.is_cancelled() {
                self.checkpoints.save(&checkpoint).await?;
                info!(
                    completed = checkpoint.completed_count(),
                    total = total_items,
                    "Directory transfer cancelled; checkpoint kept for resume"
                );
                return Err(TransferError::Cancelled);
            }

            match item.kind {
                ItemKind::Dir => {
                    self.create_dir(item, checkpoint.completed_count(), total_items)
                        .await?;
                }
                ItemKind::File if checkpoint.is_complete(&item.id) => {
                    report.skipped_items += 1;
                }
                ItemKind::File => {
                    let bytes = self
                        .transfer_item(item, &checkpoint, report.session_bytes)
                        .await;

                    let bytes = match bytes {
                        Ok(b) => b,
                        Err(TransferError::Cancelled) => {
                            self.checkpoints.save(&checkpoint).await?;
                            info!(
                                item = %item.id,
                                completed = checkpoint.completed_count(),
                                total = total_items,
                                "Directory transfer cancelled mid-item; checkpoint kept for resume"
                            );
                            return Err(TransferError::Cancelled);
                        }
                        Err(e) => {
                            warn!(item = %item.id, error = %e, "Item transfer failed");
                            return Err(TransferError::PartialFailure {
                                item_path: item.id.clone(),
                                completed_count: checkpoint.completed_count(),
                                total_items,
                                source: e.into_underlying(),
                            });
                        }
                    };

                    report.session_bytes += bytes;
                    report.transferred_items += 1;

                    let recorded = checkpoint.mark_complete(&item.id, bytes);
                    debug_assert!(recorded, "item '{}' recorded twice", item.id);
                    self.checkpoints.save(&checkpoint).await?;
                    debug!(
                        item = %item.id,
                        bytes,
                        completed = checkpoint.completed_count(),
                        total = total_items,
                        "Item transferred"
                    );

                    self.emit(
                        report.session_bytes,
                        &checkpoint,
                        Some(item.id.clone()),
                        checkpoint.bytes_transferred,
                    );
                }
            }
        }

        self.checkpoints.delete(&self.key).await?;
        info!(
            root = %self.source_root,
            transferred = report.transferred_items,
            skipped = report.skipped_items,
            bytes = report.session_bytes,
            "Directory transfer finished"
        );

        Ok(report)
    }

    async fn resume_or_fresh(&self, items: &[WalkItem], total_items: u64) -> Checkpoint {
        let existing = match self.checkpoints.load(&self.key).await {
            Ok(Some(c)) => c,
            Ok(None) => return Checkpoint::new(&self.key, total_items),
            Err(e) => {
                warn!(error = %e, "Checkpoint declined; starting a fresh transfer");
                return Checkpoint::new(&self.key, total_items);
            }
        };

        let ids: HashSet<&str> = items
            .iter()
            .filter(|i| i.kind == ItemKind::File)
            .map(|i| i.id.as_str())
            .collect();

        let mut checkpoint = existing;
        let missing = checkpoint
            .completed_items
            .iter()
            .filter(|i| !ids.contains(i.as_str()))
            .count();

        if missing > 0 && !self.drop_missing_on_resume {
            warn!(
                missing,
                "Source changed since the checkpoint was written; starting a fresh transfer"
            );
            return Checkpoint::new(&self.key, total_items);
        }

        let dropped = checkpoint.reconcile(&ids, total_items);
        info!(
            completed = checkpoint.completed_count(),
            total = total_items,
            dropped,
            "Resuming directory transfer from checkpoint"
        );

        checkpoint
    }

    async fn create_dir(&self, item: &WalkItem, completed: u64, total_items: u64) -> Result<()> {
        let dst = self.dest.join(&self.dest_root, &item.id);

        self.dest
            .create_dir(&dst)
            .await
            .map_err(|e| TransferError::PartialFailure {
                item_path: item.id.clone(),
                completed_count: completed,
                total_items,
                source: e,
            })
    }

    async fn transfer_item(
        &self,
        item: &WalkItem,
        checkpoint: &Checkpoint,
        session_before: u64,
    ) -> Result<u64> {
        let dst = self.dest.join(&self.dest_root, &item.id);
        let copy = copy_file(
            self.source,
            &item.source_path,
            self.dest,
            &dst,
            self.chunk_size,
            self.cancel,
        );
        pin_mut!(copy);

        let mut bytes = 0u64;
        while let Some(chunk) = copy.next().await {
            bytes += chunk?;
            self.emit(
                session_before + bytes,
                checkpoint,
                Some(item.id.clone()),
                checkpoint.bytes_transferred + bytes,
            );
        }

        Ok(bytes)
    }

    fn emit(
        &self,
        session_bytes: u64,
        checkpoint: &Checkpoint,
        current_item: Option<String>,
        bytes_sent: u64,
    ) {
        let _ = self.progress.send(ProgressUpdate {
            session_bytes,
            progress: TransferProgress::Directory {
                completed_items: checkpoint.completed_count(),
                total_items: checkpoint.total_items,
                current_item,
                bytes_sent,
            },
        });
    }
}
