use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::executor::{SyncTask, TaskExecutor, TaskId, TaskOutcome};

use super::backoff::BackoffCounter;

/// Notified once per sync run that ends the retry loop: on success, on a
/// terminal (do-not-retry) error, or when the retry budget runs out.
pub type CompletionListener = Arc<dyn Fn(TaskOutcome) + Send + Sync>;

/// Wraps one unit of sync work with exponential-backoff retries.
///
/// At most one timer is armed at a time. `stop` guarantees no further
/// executions after it returns: the stopped flag is re-checked inside the
/// fire path before the wrapped task runs. One instance exists per logical
/// sync stream; instances never share backoff state.
pub struct RetryBackoffTimer {
    executor: Arc<TaskExecutor>,
    state: Arc<Mutex<TimerState>>,
}

struct TimerState {
    task: Option<Arc<dyn SyncTask>>,
    listener: Option<CompletionListener>,
    backoff: BackoffCounter,
    pending: Option<TaskId>,
    stopped: bool,
    retry_limit: Option<u32>,
    retries: u32,
    period: Option<Duration>,
    // Bumped on every re-arm; stale runs compare against it and bail.
    generation: u64,
}

impl RetryBackoffTimer {
    pub fn new(executor: Arc<TaskExecutor>, backoff: BackoffCounter) -> Self {
        Self {
            executor,
            state: Arc::new(Mutex::new(TimerState {
                task: None,
                listener: None,
                backoff,
                pending: None,
                stopped: false,
                retry_limit: None,
                retries: 0,
                period: None,
                generation: 0,
            })),
        }
    }

    /// Caps the number of consecutive failed attempts per sync run.
    pub fn with_retry_limit(self, limit: u32) -> Self {
        self.state.lock().retry_limit = Some(limit);
        self
    }

    /// Enables periodic mode: after a success the task re-arms at `period`
    /// instead of returning to idle.
    pub fn with_period(self, period: Duration) -> Self {
        self.state.lock().period = Some(period);
        self
    }

    pub fn set_task(&self, task: Arc<dyn SyncTask>) {
        self.state.lock().task = Some(task);
    }

    pub fn set_listener(&self, listener: CompletionListener) {
        self.state.lock().listener = Some(listener);
    }

    /// Consecutive failures in the current run.
    pub fn current_attempt(&self) -> u32 {
        self.state.lock().retries
    }

    /// Arms the timer at the current backoff delay (initially the base).
    /// Ignored while a timer is already armed or no task is set.
    pub fn start(&self) {
        let delay = {
            let mut state = self.state.lock();
            if state.task.is_none() || state.pending.is_some() {
                return;
            }
            state.stopped = false;
            state.backoff.reset();
            state.retries = 0;
            state.backoff.next_delay()
        };
        arm(&self.state, &self.executor, delay);
    }

    /// Cancels any armed timer and reschedules at `delay`, superseding the
    /// pending backoff state. Push-triggered fetches come through here.
    pub fn force_sync(&self, delay: Duration) {
        {
            let mut state = self.state.lock();
            if state.task.is_none() {
                return;
            }
            state.stopped = false;
            if let Some(id) = state.pending.take() {
                self.executor.stop_task(&id);
            }
            state.backoff.reset();
            state.retries = 0;
        }
        arm(&self.state, &self.executor, delay);
    }

    /// Cancels any armed timer. Idempotent; no executions happen after it
    /// returns.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        state.generation += 1;
        if let Some(id) = state.pending.take() {
            self.executor.stop_task(&id);
        }
    }
}

fn arm(state: &Arc<Mutex<TimerState>>, executor: &Arc<TaskExecutor>, delay: Duration) {
    let (task, generation) = {
        let mut guard = state.lock();
        let Some(task) = guard.task.clone() else {
            return;
        };
        guard.generation += 1;
        (task, guard.generation)
    };

    let run = Arc::new(RetryRun {
        state: Arc::clone(state),
        executor: Arc::clone(executor),
        task,
        generation,
    });
    let scheduled = executor.schedule(run, delay, None);

    let mut guard = state.lock();
    match scheduled {
        Some(id) if guard.generation == generation && !guard.stopped => {
            guard.pending = Some(id);
        }
        Some(id) => {
            // Superseded while scheduling; the run's generation check would
            // skip it anyway, but there is no reason to keep it sleeping.
            executor.stop_task(&id);
        }
        None => {}
    }
}

struct RetryRun {
    state: Arc<Mutex<TimerState>>,
    executor: Arc<TaskExecutor>,
    task: Arc<dyn SyncTask>,
    generation: u64,
}

#[async_trait]
impl SyncTask for RetryRun {
    async fn execute(&self) -> TaskOutcome {
        {
            let mut state = self.state.lock();
            if state.stopped || state.generation != self.generation {
                return TaskOutcome::Success;
            }
            state.pending = None;
        }
        let outcome = self.task.execute().await;
        self.complete(outcome);
        outcome
    }
}

impl RetryRun {
    fn complete(&self, outcome: TaskOutcome) {
        let mut notify: Option<CompletionListener> = None;
        let next_delay = {
            let mut state = self.state.lock();
            if state.stopped || state.generation != self.generation {
                return;
            }
            match outcome {
                TaskOutcome::Success => {
                    state.backoff.reset();
                    state.retries = 0;
                    notify = state.listener.clone();
                    state.period
                }
                TaskOutcome::Error { do_not_retry: true } => {
                    warn!("sync task hit a terminal error; not retrying");
                    notify = state.listener.clone();
                    None
                }
                TaskOutcome::Error { do_not_retry: false } => {
                    state.retries = state.retries.saturating_add(1);
                    if state
                        .retry_limit
                        .is_some_and(|limit| state.retries >= limit)
                    {
                        warn!(retries = state.retries, "sync task retry budget exhausted");
                        notify = state.listener.clone();
                        None
                    } else {
                        let delay = state.backoff.next_delay();
                        debug!(?delay, "sync task failed; backing off");
                        Some(delay)
                    }
                }
            }
        };

        if let Some(listener) = notify {
            listener(outcome);
        }
        if let Some(delay) = next_delay {
            arm(&self.state, &self.executor, delay);
        }
    }
}
