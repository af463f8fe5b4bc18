//! Rate-limited reward dispatch.
//!
//! A background task drains an unbounded queue in batches of `batch_size`
//! actions with `batch_delay` between batches, so buying forty levels at
//! once never fires every reward action in the same instant. A failing
//! action is logged and skipped; the queue keeps going.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use ladder_core::id::EntityId;
use ladder_core::reward::RewardAction;
use ladder_stats::PerfCounters;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewardError {
    #[error("reward action failed: {0}")]
    Failed(String),

    #[error("reward batcher is shut down")]
    Closed,
}

/// Runs one reward action. Implemented by the host (command dispatcher,
/// item grants, ...). Must tolerate duplicates: dispatch is at-least-once.
#[async_trait]
pub trait RewardExecutor: Send + Sync {
    async fn execute(&self, entity: EntityId, action: &RewardAction) -> Result<(), RewardError>;
}

/// Executor that only logs. Default for headless runs.
#[derive(Debug, Default)]
pub struct LogExecutor;

#[async_trait]
impl RewardExecutor for LogExecutor {
    async fn execute(&self, entity: EntityId, action: &RewardAction) -> Result<(), RewardError> {
        info!(
            entity = %entity,
            progression = %action.progression,
            level = action.level,
            "reward: {}",
            action.command
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Batcher
// ---------------------------------------------------------------------------

enum Item {
    Action(EntityId, RewardAction),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Cloneable handle to the dispatch task.
#[derive(Clone)]
pub struct RewardBatcher {
    tx: mpsc::UnboundedSender<Item>,
    pending: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RewardBatcher {
    /// Start the dispatch task on the current tokio runtime.
    pub fn spawn(
        executor: Arc<dyn RewardExecutor>,
        batch_size: usize,
        batch_delay: Duration,
        counters: Arc<PerfCounters>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker = Worker {
            rx,
            queue: VecDeque::new(),
            executor,
            batch_size: batch_size.max(1),
            batch_delay,
            pending: Arc::clone(&pending),
            counters,
        };
        let task = tokio::spawn(worker.run());
        Self {
            tx,
            pending,
            closed: Arc::new(AtomicBool::new(false)),
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Queue actions in order. Returns `Closed` after [`shutdown`](Self::shutdown).
    pub fn enqueue(&self, entity: EntityId, actions: Vec<RewardAction>) -> Result<(), RewardError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RewardError::Closed);
        }
        for action in actions {
            self.pending.fetch_add(1, Ordering::Relaxed);
            if self.tx.send(Item::Action(entity, action)).is_err() {
                self.pending.fetch_sub(1, Ordering::Relaxed);
                return Err(RewardError::Closed);
            }
        }
        Ok(())
    }

    /// Wait until every action queued before this call has been dispatched.
    pub async fn flush(&self) -> Result<(), RewardError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Item::Flush(done_tx))
            .map_err(|_| RewardError::Closed)?;
        done_rx.await.map_err(|_| RewardError::Closed)
    }

    /// Actions queued but not yet dispatched.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Refuse new work, dispatch what is queued, then stop the task.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.send(Item::Shutdown);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "reward dispatch task ended abnormally");
        }
    }
}

impl std::fmt::Debug for RewardBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewardBatcher")
            .field("pending", &self.pending())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

struct Worker {
    rx: mpsc::UnboundedReceiver<Item>,
    queue: VecDeque<Item>,
    executor: Arc<dyn RewardExecutor>,
    batch_size: usize,
    batch_delay: Duration,
    pending: Arc<AtomicUsize>,
    counters: Arc<PerfCounters>,
}

impl Worker {
    async fn run(mut self) {
        let mut shutting_down = false;
        loop {
            if self.queue.is_empty() {
                if shutting_down {
                    break;
                }
                match self.rx.recv().await {
                    Some(item) => self.queue.push_back(item),
                    None => break,
                }
            }
            while let Ok(item) = self.rx.try_recv() {
                self.queue.push_back(item);
            }

            let mut dispatched = 0;
            while dispatched < self.batch_size {
                let Some(item) = self.queue.pop_front() else {
                    break;
                };
                match item {
                    Item::Action(entity, action) => {
                        self.dispatch(entity, &action).await;
                        dispatched += 1;
                    }
                    Item::Flush(done) => {
                        let _ = done.send(());
                    }
                    Item::Shutdown => shutting_down = true,
                }
            }

            // Only pace when a full batch went out and more is waiting.
            if dispatched == self.batch_size && self.has_queued_actions() {
                tokio::time::sleep(self.batch_delay).await;
            }
        }
        debug!("reward dispatch task stopped");
    }

    fn has_queued_actions(&self) -> bool {
        self.queue.iter().any(|i| matches!(i, Item::Action(..)))
    }

    async fn dispatch(&self, entity: EntityId, action: &RewardAction) {
        let result = self.executor.execute(entity, action).await;
        self.pending.fetch_sub(1, Ordering::Relaxed);
        match result {
            Ok(()) => self.counters.reward(true),
            Err(e) => {
                self.counters.reward(false);
                warn!(
                    entity = %entity,
                    progression = %action.progression,
                    level = action.level,
                    command = %action.command,
                    error = %e,
                    "reward action failed"
                );
            }
        }
    }
}
