use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::config::SyncConfig;
use crate::dispatch::FetchDirective;
use crate::executor::{SyncTask, TaskExecutor, TaskId, TaskOutcome};
use crate::protocol::Scope;

use super::backoff::BackoffCounter;
use super::retry::RetryBackoffTimer;

/// External collaborator producing the concrete fetch/load work for one
/// user key. The engine treats the returned tasks as opaque.
pub trait MembershipTaskFactory: Send + Sync {
    /// Full refresh of one scope's membership state. The task may
    /// short-circuit once local state reaches `target_change_number`.
    fn fetch_task(&self, scope: Scope, target_change_number: Option<i64>) -> Arc<dyn SyncTask>;
    /// Cache warm-up submitted once at registration.
    fn load_task(&self) -> Arc<dyn SyncTask>;
}

struct ScopeSync {
    retry: RetryBackoffTimer,
    periodic: Arc<Mutex<Option<TaskId>>>,
}

/// Sync driver for one logical user key: owns the retry timers and the
/// periodic fetch schedule for both membership scopes. Instances are
/// independent; backoff state is never shared between them.
pub struct MembershipSynchronizer {
    executor: Arc<TaskExecutor>,
    factory: Arc<dyn MembershipTaskFactory>,
    refresh: Duration,
    segments: ScopeSync,
    large_segments: ScopeSync,
}

impl MembershipSynchronizer {
    pub fn new(
        executor: Arc<TaskExecutor>,
        factory: Arc<dyn MembershipTaskFactory>,
        config: &SyncConfig,
    ) -> Self {
        let segments = Self::scope_sync(&executor, &factory, config, Scope::Segment);
        let large_segments = Self::scope_sync(&executor, &factory, config, Scope::LargeSegment);
        Self {
            executor,
            factory,
            refresh: config.segments_refresh,
            segments,
            large_segments,
        }
    }

    fn scope_sync(
        executor: &Arc<TaskExecutor>,
        factory: &Arc<dyn MembershipTaskFactory>,
        config: &SyncConfig,
        scope: Scope,
    ) -> ScopeSync {
        let backoff = BackoffCounter::new(config.backoff_base, config.backoff_max);
        let mut retry = RetryBackoffTimer::new(Arc::clone(executor), backoff);
        if let Some(limit) = config.retry_limit {
            retry = retry.with_retry_limit(limit);
        }
        retry.set_task(factory.fetch_task(scope, None));

        // A terminal fetch error stops periodic fetching for this scope
        // until the synchronizer is re-registered.
        let periodic = Arc::new(Mutex::new(None));
        let listener = {
            let executor = Arc::clone(executor);
            let periodic = Arc::clone(&periodic);
            Arc::new(move |outcome: TaskOutcome| {
                if let TaskOutcome::Error { do_not_retry: true } = outcome {
                    warn!(?scope, "terminal sync error; stopping periodic fetching for this scope");
                    if let Some(id) = periodic.lock().take() {
                        executor.stop_task(&id);
                    }
                }
            })
        };
        retry.set_listener(listener);

        ScopeSync { retry, periodic }
    }

    fn scope_state(&self, scope: Scope) -> &ScopeSync {
        match scope {
            Scope::Segment => &self.segments,
            Scope::LargeSegment => &self.large_segments,
        }
    }

    /// One-off sync of both scopes through their retry timers.
    pub fn synchronize(&self) {
        for scope in [Scope::Segment, Scope::LargeSegment] {
            let state = self.scope_state(scope);
            state.retry.set_task(self.factory.fetch_task(scope, None));
            state.retry.start();
        }
    }

    /// Push-triggered sync of one scope at the directive's desync delay,
    /// superseding any pending backoff wait.
    pub fn force_sync(&self, directive: &FetchDirective) {
        let state = self.scope_state(directive.scope);
        state.retry.set_task(
            self.factory
                .fetch_task(directive.scope, directive.target_change_number),
        );
        state.retry.force_sync(directive.sync_delay);
    }

    /// Submits the cache warm-up task.
    pub fn load_from_cache(&self) {
        self.executor.submit(self.factory.load_task());
    }

    pub fn start_periodic_fetching(&self) {
        for scope in [Scope::Segment, Scope::LargeSegment] {
            let state = self.scope_state(scope);
            let mut slot = state.periodic.lock();
            if slot.is_some() {
                continue;
            }
            *slot = self.executor.schedule_periodic(
                self.factory.fetch_task(scope, None),
                Duration::ZERO,
                self.refresh,
                None,
            );
        }
    }

    pub fn stop_periodic_fetching(&self) {
        for scope in [Scope::Segment, Scope::LargeSegment] {
            if let Some(id) = self.scope_state(scope).periodic.lock().take() {
                self.executor.stop_task(&id);
            }
        }
    }

    /// Stops every timer owned by this synchronizer.
    pub fn destroy(&self) {
        self.segments.retry.stop();
        self.large_segments.retry.stop();
        self.stop_periodic_fetching();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingFactory {
        fetches: Arc<AtomicUsize>,
        loads: Arc<AtomicUsize>,
        terminal: Arc<AtomicBool>,
    }

    struct CountingTask {
        counter: Arc<AtomicUsize>,
        terminal: Arc<AtomicBool>,
    }

    #[async_trait]
    impl SyncTask for CountingTask {
        async fn execute(&self) -> TaskOutcome {
            self.counter.fetch_add(1, Ordering::SeqCst);
            if self.terminal.load(Ordering::SeqCst) {
                TaskOutcome::terminal_error()
            } else {
                TaskOutcome::Success
            }
        }
    }

    impl MembershipTaskFactory for RecordingFactory {
        fn fetch_task(&self, _scope: Scope, _target: Option<i64>) -> Arc<dyn SyncTask> {
            Arc::new(CountingTask {
                counter: Arc::clone(&self.fetches),
                terminal: Arc::clone(&self.terminal),
            })
        }

        fn load_task(&self) -> Arc<dyn SyncTask> {
            Arc::new(CountingTask {
                counter: Arc::clone(&self.loads),
                terminal: Arc::new(AtomicBool::new(false)),
            })
        }
    }

    fn config() -> SyncConfig {
        SyncConfig::default()
            .with_segments_refresh(Duration::from_millis(25))
            .with_backoff(Duration::from_millis(5), Duration::from_secs(5))
    }

    fn build() -> (
        Arc<TaskExecutor>,
        Arc<RecordingFactory>,
        MembershipSynchronizer,
    ) {
        let executor = Arc::new(TaskExecutor::new());
        let factory = Arc::new(RecordingFactory::default());
        let synchronizer = MembershipSynchronizer::new(
            Arc::clone(&executor),
            factory.clone() as Arc<dyn MembershipTaskFactory>,
            &config(),
        );
        (executor, factory, synchronizer)
    }

    #[tokio::test]
    async fn synchronize_fetches_both_scopes_once() {
        let (_executor, factory, synchronizer) = build();
        synchronizer.synchronize();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(factory.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn force_sync_runs_the_scoped_fetch() {
        let (_executor, factory, synchronizer) = build();
        synchronizer.force_sync(&FetchDirective {
            scope: Scope::Segment,
            sync_delay: Duration::from_millis(5),
            target_change_number: Some(7),
        });
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(factory.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn load_from_cache_submits_the_load_task() {
        let (_executor, factory, synchronizer) = build();
        synchronizer.load_from_cache();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(factory.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn periodic_fetching_repeats_until_stopped() {
        let (_executor, factory, synchronizer) = build();
        synchronizer.start_periodic_fetching();
        tokio::time::sleep(Duration::from_millis(120)).await;
        synchronizer.stop_periodic_fetching();
        let runs = factory.fetches.load(Ordering::SeqCst);
        assert!(runs >= 4, "expected periodic fetches on both scopes, got {runs}");

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(factory.fetches.load(Ordering::SeqCst), runs);
    }

    #[tokio::test]
    async fn terminal_error_stops_periodic_fetching_for_the_scope() {
        let (_executor, factory, synchronizer) = build();
        synchronizer.start_periodic_fetching();
        tokio::time::sleep(Duration::from_millis(40)).await;

        factory.terminal.store(true, Ordering::SeqCst);
        synchronizer.force_sync(&FetchDirective {
            scope: Scope::Segment,
            sync_delay: Duration::ZERO,
            target_change_number: None,
        });
        synchronizer.force_sync(&FetchDirective {
            scope: Scope::LargeSegment,
            sync_delay: Duration::ZERO,
            target_change_number: None,
        });
        tokio::time::sleep(Duration::from_millis(60)).await;

        let after_terminal = factory.fetches.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(factory.fetches.load(Ordering::SeqCst), after_terminal);
    }

    #[tokio::test]
    async fn destroy_silences_the_synchronizer() {
        let (_executor, factory, synchronizer) = build();
        synchronizer.start_periodic_fetching();
        synchronizer.destroy();
        tokio::time::sleep(Duration::from_millis(80)).await;
        let runs = factory.fetches.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(factory.fetches.load(Ordering::SeqCst), runs);
    }
}
