mod task;

pub use task::{SyncTask, TaskOutcome};

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Handle to a scheduled task, used to cancel it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(String);

impl TaskId {
    fn new() -> Self {
        TaskId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Listener invoked with the outcome of each execution.
pub type TaskListener = Arc<dyn Fn(TaskOutcome) + Send + Sync>;

/// Tokio-backed scheduler for sync tasks.
///
/// Scheduled work observes the pause gate before firing: pausing never
/// cancels an armed timer, it only defers execution until resume, so
/// retry/backoff state owned by callers survives a pause intact.
pub struct TaskExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    pause_tx: watch::Sender<bool>,
    tasks: Mutex<HashMap<TaskId, JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl TaskExecutor {
    /// Must be created within a Tokio runtime; all scheduling spawns onto
    /// the ambient runtime.
    pub fn new() -> Self {
        let (pause_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ExecutorInner {
                pause_tx,
                tasks: Mutex::new(HashMap::new()),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Runs `task` as soon as the pause gate allows.
    pub fn submit(&self, task: Arc<dyn SyncTask>) {
        self.schedule(task, Duration::ZERO, None);
    }

    /// Runs `task` once after `delay`. Returns `None` if the executor has
    /// been stopped.
    pub fn schedule(
        &self,
        task: Arc<dyn SyncTask>,
        delay: Duration,
        listener: Option<TaskListener>,
    ) -> Option<TaskId> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return None;
        }
        let id = TaskId::new();
        let inner = Arc::clone(&self.inner);
        let key = id.clone();
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            inner.wait_while_paused().await;
            if inner.stopped.load(Ordering::SeqCst) {
                return;
            }
            let outcome = task.execute().await;
            if let Some(listener) = listener {
                listener(outcome);
            }
            inner.tasks.lock().remove(&key);
        });
        self.inner.tasks.lock().insert(id.clone(), handle);
        Some(id)
    }

    /// Runs `task` every `period`, starting after `initial_delay`. The
    /// listener observes every run.
    pub fn schedule_periodic(
        &self,
        task: Arc<dyn SyncTask>,
        initial_delay: Duration,
        period: Duration,
        listener: Option<TaskListener>,
    ) -> Option<TaskId> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return None;
        }
        let id = TaskId::new();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            if !initial_delay.is_zero() {
                tokio::time::sleep(initial_delay).await;
            }
            loop {
                inner.wait_while_paused().await;
                if inner.stopped.load(Ordering::SeqCst) {
                    return;
                }
                let outcome = task.execute().await;
                if let Some(listener) = &listener {
                    listener(outcome);
                }
                tokio::time::sleep(period).await;
            }
        });
        self.inner.tasks.lock().insert(id.clone(), handle);
        Some(id)
    }

    /// Cancels a scheduled task. Unknown ids are a no-op.
    pub fn stop_task(&self, id: &TaskId) {
        if let Some(handle) = self.inner.tasks.lock().remove(id) {
            handle.abort();
        }
    }

    /// Defers all pending and future firings until [`TaskExecutor::resume`].
    pub fn pause(&self) {
        debug!("task executor paused");
        let _ = self.inner.pause_tx.send(true);
    }

    pub fn resume(&self) {
        debug!("task executor resumed");
        let _ = self.inner.pause_tx.send(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.pause_tx.borrow()
    }

    /// Shuts the executor down, aborting every scheduled task. Idempotent.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let handles: Vec<_> = self.inner.tasks.lock().drain().collect();
        for (_, handle) in handles {
            handle.abort();
        }
    }
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorInner {
    async fn wait_while_paused(&self) {
        let mut rx = self.pause_tx.subscribe();
        loop {
            if !*rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
