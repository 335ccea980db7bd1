use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use chrono::{DateTime, Utc};
use futures::{pin_mut, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    checkpoint::{CheckpointKey, CheckpointStore},
    copy::{copy_file, ensure_active},
    error::{Result, TransferError},
    store::{EntryKind, Store},
    types::{ErrorInfo, ProgressUpdate, TransferDirection, TransferProgress, TransferRequest},
    utils,
    walker::FolderWalker,
};

pub type ProgressSink = mpsc::UnboundedSender<ProgressUpdate>;

#[derive(Clone)]
pub struct TaskContext {
    pub remote: Arc<dyn Store>,
    pub local: Arc<dyn Store>,
    pub checkpoints: Arc<CheckpointStore>,
    pub chunk_size: usize,
    pub drop_missing_on_resume: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub name: String,
    pub item_count: u64,
    pub bytes: u64,
}

#[derive(Debug)]
pub struct TransferTask {
    id: Uuid,
    request: TransferRequest,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    completed: AtomicBool,
    last_error: Mutex<Option<ErrorInfo>>,
}

impl TransferTask {
    pub fn new(request: TransferRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
            completed: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request(&self) -> &TransferRequest {
        &self.request
    }

    pub fn direction(&self) -> TransferDirection {
        self.request.direction
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn last_error(&self) -> Option<ErrorInfo> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn record_error(&self, e: &TransferError) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = Some(ErrorInfo::from(e));
        }
    }

    pub fn start(
        self: &Arc<Self>,
        ctx: TaskContext,
        progress: ProgressSink,
    ) -> JoinHandle<Result<TaskReport>> {
        let task = Arc::clone(self);

        tokio::spawn(async move {
            let res = task.run(&ctx, &progress).await;

            match &res {
                Ok(_) => {
                    task.completed.store(true, Ordering::SeqCst);
                    let dest = task.destination(&ctx);
                    dest.refresh(&task.request.destination_path());
                }
                Err(TransferError::Cancelled) => {}
                Err(e) => task.record_error(e),
            }

            res
        })
    }

    fn source<'c>(&self, ctx: &'c TaskContext) -> &'c dyn Store {
        match self.request.direction {
            TransferDirection::ToLocal => ctx.remote.as_ref(),
            TransferDirection::ToRemote => ctx.local.as_ref(),
        }
    }

    fn destination<'c>(&self, ctx: &'c TaskContext) -> &'c dyn Store {
        match self.request.direction {
            TransferDirection::ToLocal => ctx.local.as_ref(),
            TransferDirection::ToRemote => ctx.remote.as_ref(),
        }
    }

    async fn run(&self, ctx: &TaskContext, progress: &ProgressSink) -> Result<TaskReport> {
        ensure_active(&self.cancel)?;

        if self.request.is_directory {
            self.run_directory(ctx, progress).await
        } else {
            self.run_file(ctx, progress).await
        }
    }

    async fn run_file(&self, ctx: &TaskContext, progress: &ProgressSink) -> Result<TaskReport> {
        let source = self.source(ctx);
        let dest = self.destination(ctx);
        let src = self.request.source_path();
        let dst = self.request.destination_path();

        let entry = match source.meta(&src).await {
            Ok(e) => e,
            Err(e) => {
                warn!(path = %src, error = %format!("{:#}", e), "Metadata lookup failed");
                return Err(match TransferError::from_store(&src, e) {
                    c @ TransferError::ConnectionFailed { .. } => c,
                    _ => TransferError::MetadataUnavailable { path: src },
                });
            }
        };

        if entry.kind == EntryKind::Dir {
            return Err(TransferError::InvalidRequest(format!(
                "'{}' is a directory",
                src
            )));
        }

        let total = entry
            .size
            .ok_or_else(|| TransferError::MetadataUnavailable { path: src.clone() })?;

        debug!(id = %self.id, src = %src, dst = %dst, total, "Copying file");

        let copy = copy_file(source, &src, dest, &dst, ctx.chunk_size, &self.cancel);
        pin_mut!(copy);

        let mut done = 0u64;
        while let Some(chunk) = copy.next().await {
            done += chunk?;
            let _ = progress.send(ProgressUpdate {
                session_bytes: done,
                progress: TransferProgress::file(done, total),
            });
        }

        if done == 0 {
            let _ = progress.send(ProgressUpdate {
                session_bytes: 0,
                progress: TransferProgress::file(0, total),
            });
        }

        Ok(TaskReport {
            name: utils::file_name(&src),
            item_count: 1,
            bytes: done,
        })
    }

    async fn run_directory(
        &self,
        ctx: &TaskContext,
        progress: &ProgressSink,
    ) -> Result<TaskReport> {
        let src = self.request.source_path();

        let walker = FolderWalker {
            source: self.source(ctx),
            dest: self.destination(ctx),
            checkpoints: ctx.checkpoints.as_ref(),
            key: CheckpointKey::from(&self.request),
            source_root: src.clone(),
            dest_root: self.request.destination_path(),
            chunk_size: ctx.chunk_size,
            drop_missing_on_resume: ctx.drop_missing_on_resume,
            cancel: &self.cancel,
            progress,
        };

        let report = walker.run().await?;

        Ok(TaskReport {
            name: utils::file_name(&src),
            item_count: report.total_items,
            bytes: report.session_bytes,
        })
    }
}
