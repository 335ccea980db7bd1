use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::{
    sync::{broadcast, mpsc, oneshot, watch, Mutex},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    checkpoint::{Checkpoint, CheckpointKey, CheckpointStore},
    config::EngineConfig,
    error::{Result, TransferError},
    sampler::SpeedSampler,
    store::Store,
    task::{TaskContext, TaskReport, TransferTask},
    types::{
        ErrorInfo, ProgressUpdate, TransferDirection, TransferProgress, TransferRequest,
        TransferState, TransferSummary,
    },
};

const TRANSITION_CAPACITY: usize = 256;

#[derive(Debug)]
pub enum TransferOutcome {
    Completed(TransferSummary),
    Cancelled,
    Failed(TransferError),
}

impl TransferOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TransferOutcome::Completed(_))
    }
}

pub struct TaskHandle {
    id: Uuid,
    cancel: CancellationToken,
    outcome: oneshot::Receiver<TransferOutcome>,
}

impl TaskHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> TransferOutcome {
        match self.outcome.await {
            Ok(outcome) => outcome,
            Err(_) => TransferOutcome::Failed(TransferError::Internal(
                "transfer driver stopped without reporting an outcome".to_string(),
            )),
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish()
    }
}

#[derive(Default)]
struct Slot {
    current: Option<Arc<TransferTask>>,
    generation: u64,
}

struct Inner {
    remote: Arc<dyn Store>,
    local: Arc<dyn Store>,
    checkpoints: Arc<CheckpointStore>,
    config: EngineConfig,
    state: watch::Sender<TransferState>,
    transitions: broadcast::Sender<TransferState>,
    slot: Mutex<Slot>,
}

impl Inner {
    fn publish(&self, state: TransferState) {
        self.state.send_replace(state.clone());
        let _ = self.transitions.send(state);
    }

    fn current_state(&self) -> TransferState {
        self.state.borrow().clone()
    }

    fn context(&self) -> TaskContext {
        TaskContext {
            remote: Arc::clone(&self.remote),
            local: Arc::clone(&self.local),
            checkpoints: Arc::clone(&self.checkpoints),
            chunk_size: self.config.chunk_size,
            drop_missing_on_resume: self.config.drop_missing_on_resume,
        }
    }
}

#[derive(Clone)]
pub struct TransferCoordinator {
    inner: Arc<Inner>,
}

impl TransferCoordinator {
    pub fn new(remote: Arc<dyn Store>, local: Arc<dyn Store>, config: EngineConfig) -> Self {
        let checkpoints = CheckpointStore::new(
            config.checkpoint_dir.clone(),
            config.checkpoint_max_age(),
        );
        let (state, _) = watch::channel(TransferState::Idle);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                remote,
                local,
                checkpoints: Arc::new(checkpoints),
                config,
                state,
                transitions,
                slot: Mutex::new(Slot::default()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.inner.checkpoints
    }

    pub fn state(&self) -> TransferState {
        self.inner.current_state()
    }

    pub fn subscribe(&self) -> watch::Receiver<TransferState> {
        self.inner.state.subscribe()
    }

    /// Every state change from now on, including the `Failed` that is
    /// immediately followed by `Idle`.
    pub fn transitions(&self) -> broadcast::Receiver<TransferState> {
        self.inner.transitions.subscribe()
    }

    pub async fn is_busy(&self) -> bool {
        self.inner.slot.lock().await.current.is_some()
    }

    pub async fn start_transfer(&self, request: TransferRequest) -> Result<TaskHandle> {
        let mut slot = self.inner.slot.lock().await;

        if slot.current.is_some() || self.inner.current_state().is_busy() {
            debug!(remote = %request.remote_path, "Rejecting transfer; another one is active");
            return Err(TransferError::TransferInProgress);
        }

        request.validate()?;

        if self.inner.current_state().is_terminal() {
            self.inner.publish(TransferState::Idle);
        }

        slot.generation += 1;
        let generation = slot.generation;

        let task = Arc::new(TransferTask::new(request));
        slot.current = Some(Arc::clone(&task));

        info!(
            id = %task.id(),
            direction = %task.direction(),
            remote = %task.request().remote_path,
            local = %task.request().local_path.display(),
            directory = task.request().is_directory,
            "Transfer accepted"
        );
        self.inner.publish(TransferState::Queued);

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let join = task.start(self.inner.context(), progress_tx);
        let handle = TaskHandle {
            id: task.id(),
            cancel: task.cancel_token(),
            outcome: outcome_rx,
        };

        tokio::spawn(drive(
            Arc::clone(&self.inner),
            task,
            progress_rx,
            join,
            generation,
            outcome_tx,
        ));

        Ok(handle)
    }

    pub async fn cancel_active_transfer(&self) -> bool {
        let slot = self.inner.slot.lock().await;

        match &slot.current {
            Some(task) => {
                info!(id = %task.id(), "Cancellation requested");
                task.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn reset(&self) -> bool {
        let slot = self.inner.slot.lock().await;

        if slot.current.is_none() && self.inner.current_state().is_terminal() {
            self.inner.publish(TransferState::Idle);
            true
        } else {
            false
        }
    }

    pub async fn get_resumable_checkpoint(
        &self,
        remote_path: &str,
        local_path: impl AsRef<Path>,
        direction: TransferDirection,
    ) -> Option<Checkpoint> {
        let key = CheckpointKey::new(
            remote_path,
            PathBuf::from(local_path.as_ref()),
            direction,
        );

        match self.inner.checkpoints.load(&key).await {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "No resumable checkpoint");
                None
            }
        }
    }

    pub async fn purge_expired_checkpoints(&self) -> Result<usize> {
        self.inner.checkpoints.purge_expired().await
    }
}

async fn drive(
    inner: Arc<Inner>,
    task: Arc<TransferTask>,
    mut updates: mpsc::UnboundedReceiver<ProgressUpdate>,
    mut join: JoinHandle<Result<TaskReport>>,
    generation: u64,
    outcome_tx: oneshot::Sender<TransferOutcome>,
) {
    let interval = inner.config.sample_interval();
    let mut sampler = SpeedSampler::new(interval);
    sampler.start();

    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last: Option<TransferProgress> = None;

    let joined = loop {
        tokio::select! {
            biased;

            Some(update) = updates.recv() => {
                on_progress(&inner, &mut sampler, &mut last, update);
            }
            res = &mut join => break res,
            _ = ticker.tick() => {
                if let (Some(speed), Some(p)) = (sampler.tick(), last.as_ref()) {
                    inner.publish(TransferState::Running(p.clone().with_speed(speed)));
                }
            }
        }
    };

    while let Ok(update) = updates.try_recv() {
        on_progress(&inner, &mut sampler, &mut last, update);
    }

    let outcome = match joined {
        Ok(Ok(report)) => {
            let mut summary = sampler.finish(report.bytes);
            summary.name = report.name;
            summary.item_count = report.item_count;
            TransferOutcome::Completed(summary)
        }
        Ok(Err(TransferError::Cancelled)) => {
            sampler.stop();
            TransferOutcome::Cancelled
        }
        Ok(Err(e)) => {
            sampler.stop();
            TransferOutcome::Failed(e)
        }
        Err(e) => {
            sampler.stop();
            TransferOutcome::Failed(TransferError::Internal(format!(
                "transfer task aborted: {}",
                e
            )))
        }
    };

    {
        let mut slot = inner.slot.lock().await;

        match &outcome {
            TransferOutcome::Completed(summary) => {
                info!(
                    id = %task.id(),
                    name = %summary.name,
                    items = summary.item_count,
                    bytes = summary.total_bytes,
                    secs = summary.duration.as_secs_f64(),
                    speed = summary.preferred_speed(),
                    "Transfer completed"
                );
                inner.publish(TransferState::Completed(summary.clone()));
            }
            TransferOutcome::Cancelled => {
                info!(id = %task.id(), "Transfer cancelled");
                inner.publish(TransferState::Cancelled);
            }
            TransferOutcome::Failed(e) => {
                error!(id = %task.id(), kind = e.kind().as_str(), error = %e, "Transfer failed");
                inner.publish(TransferState::Failed(ErrorInfo::from(e)));
                inner.publish(TransferState::Idle);
            }
        }

        slot.current = None;
    }

    if !matches!(outcome, TransferOutcome::Failed(_)) {
        schedule_idle_reset(Arc::clone(&inner), generation);
    }

    if outcome_tx.send(outcome).is_err() {
        debug!(id = %task.id(), "Transfer handle dropped before completion");
    }
}

fn on_progress(
    inner: &Inner,
    sampler: &mut SpeedSampler,
    last: &mut Option<TransferProgress>,
    update: ProgressUpdate,
) {
    sampler.record(update.session_bytes);

    let progress = update
        .progress
        .with_speed(sampler.latest().unwrap_or_default());
    inner.publish(TransferState::Running(progress.clone()));
    *last = Some(progress);
}

fn schedule_idle_reset(inner: Arc<Inner>, generation: u64) {
    let display = inner.config.completed_display();

    tokio::spawn(async move {
        time::sleep(display).await;

        let slot = inner.slot.lock().await;
        if slot.generation != generation || slot.current.is_some() {
            return;
        }

        if inner.current_state().is_terminal() {
            debug!("Display window over; back to idle");
            inner.publish(TransferState::Idle);
        } else {
            warn!("Idle reset found a non-terminal state; leaving it alone");
        }
    });
}
