use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::auth::PushTokenProvider;
use crate::config::SyncConfig;
use crate::dispatch::{FetchDirective, MembershipProcessor};
use crate::executor::TaskExecutor;
use crate::platform::{ConnectivityMonitor, ConnectivitySource, PauseCoordinator, PipelineControl};
use crate::push::PushManager;
use crate::storage::MembershipStorage;
use crate::sync::{MembershipSynchronizer, MembershipTaskFactory, SynchronizerRegistry, UpdateWorker};
use crate::transport::StreamingTransport;

/// Wires the whole sync pipeline together: executor, per-key
/// synchronizers, the push side and the lifecycle gating.
///
/// With streaming enabled the engine prefers push and falls back to
/// periodic polling the moment push becomes permanently unavailable; with
/// streaming disabled it polls from the start.
pub struct SyncEngine {
    config: SyncConfig,
    executor: Arc<TaskExecutor>,
    registry: Arc<SynchronizerRegistry>,
    worker: UpdateWorker,
    push: Arc<PushManager>,
    monitor: ConnectivityMonitor,
    coordinator: PauseCoordinator,
    directives: mpsc::UnboundedSender<FetchDirective>,
    started: AtomicBool,
}

impl SyncEngine {
    /// Must be created within a Tokio runtime.
    pub fn new(
        config: SyncConfig,
        token_provider: Arc<dyn PushTokenProvider>,
        transport: Arc<dyn StreamingTransport>,
        connectivity: &dyn ConnectivitySource,
    ) -> Self {
        let executor = Arc::new(TaskExecutor::new());
        let registry = Arc::new(SynchronizerRegistry::new());

        let (directives, directive_rx) = mpsc::unbounded_channel();
        let worker = UpdateWorker::spawn(directive_rx, Arc::clone(&registry));

        let push = Arc::new(PushManager::new(
            token_provider,
            transport,
            Arc::clone(&executor),
            &config,
        ));
        {
            let registry = Arc::clone(&registry);
            push.on_push_unavailable(Arc::new(move || {
                info!("push unavailable; falling back to periodic fetching");
                registry.start_periodic_fetching();
            }));
        }

        let monitor = ConnectivityMonitor::new(connectivity, config.connectivity_debounce);
        let coordinator = PauseCoordinator::new(
            &monitor,
            vec![
                Arc::clone(&executor) as Arc<dyn PipelineControl>,
                Arc::clone(&push) as Arc<dyn PipelineControl>,
            ],
        );

        Self {
            config,
            executor,
            registry,
            worker,
            push,
            monitor,
            coordinator,
            directives,
            started: AtomicBool::new(false),
        }
    }

    pub fn is_network_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    /// Registers a logical user: builds its synchronizer and dispatcher and
    /// joins it to the shared connection. Lifecycle actions that already
    /// ran are replayed by the registry.
    pub fn register_user(
        &self,
        user_key: &str,
        factory: Arc<dyn MembershipTaskFactory>,
        storage: Arc<dyn MembershipStorage>,
    ) {
        let synchronizer = Arc::new(MembershipSynchronizer::new(
            Arc::clone(&self.executor),
            factory,
            &self.config,
        ));
        self.registry.register(user_key, synchronizer);

        let processor = Arc::new(MembershipProcessor::new(
            user_key,
            self.directives.clone(),
            storage,
        ));
        self.push.register_user(user_key, processor);
    }

    pub fn unregister_user(&self, user_key: &str) {
        self.push.unregister_user(user_key);
        self.registry.unregister(user_key);
    }

    /// Warm-loads caches, kicks an initial sync and brings up push or
    /// polling per configuration. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.registry.load_from_cache();
        self.registry.synchronize();
        if self.config.streaming_enabled {
            self.push.start();
        } else {
            info!("streaming disabled by configuration; polling periodically");
            self.registry.start_periodic_fetching();
        }
    }

    /// Tears the pipeline down. Not restartable.
    pub fn stop(&self) {
        self.push.stop();
        self.worker.stop();
        self.registry.stop_periodic_fetching();
        self.registry.destroy();
        self.executor.stop();
    }

    /// Host-lifecycle hooks; combined with connectivity into one
    /// pause/resume decision.
    pub fn host_backgrounded(&self) {
        self.coordinator.host_backgrounded();
    }

    pub fn host_foregrounded(&self) {
        self.coordinator.host_foregrounded();
    }

    pub fn is_paused(&self) -> bool {
        self.coordinator.is_paused()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthError, AuthResult, AuthToken};
    use crate::executor::{SyncTask, TaskOutcome};
    use crate::platform::ManualConnectivitySource;
    use crate::protocol::Scope;
    use crate::storage::InMemoryMembershipStorage;
    use crate::transport::mock::MockTransport;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct StaticTokenProvider {
        deny: bool,
    }

    #[async_trait]
    impl PushTokenProvider for StaticTokenProvider {
        async fn authenticate(&self, _user_keys: &[String]) -> Result<AuthResult, AuthError> {
            if self.deny {
                return Err(AuthError::Denied);
            }
            Ok(AuthResult {
                push_enabled: true,
                token: Some(AuthToken {
                    raw: "raw-token".to_string(),
                    expiration_epoch_secs: i64::MAX,
                    channels: vec!["control".to_string()],
                }),
            })
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        fetches: Arc<AtomicUsize>,
    }

    struct CountingFetch {
        fetches: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SyncTask for CountingFetch {
        async fn execute(&self) -> TaskOutcome {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            TaskOutcome::Success
        }
    }

    impl MembershipTaskFactory for CountingFactory {
        fn fetch_task(&self, _scope: Scope, _target: Option<i64>) -> Arc<dyn SyncTask> {
            Arc::new(CountingFetch {
                fetches: Arc::clone(&self.fetches),
            })
        }

        fn load_task(&self) -> Arc<dyn SyncTask> {
            Arc::new(CountingFetch {
                fetches: Arc::new(AtomicUsize::new(0)),
            })
        }
    }

    fn config() -> SyncConfig {
        SyncConfig::default()
            .with_backoff(Duration::from_millis(5), Duration::from_secs(1))
            .with_segments_refresh(Duration::from_millis(30))
            .with_connectivity_debounce(Duration::from_millis(10))
    }

    fn engine(config: SyncConfig, deny: bool) -> (SyncEngine, Arc<MockTransport>, Arc<AtomicUsize>) {
        let transport = Arc::new(MockTransport::new());
        let source = ManualConnectivitySource::new();
        let engine = SyncEngine::new(
            config,
            Arc::new(StaticTokenProvider { deny }),
            Arc::clone(&transport) as Arc<dyn StreamingTransport>,
            &source,
        );
        let factory = Arc::new(CountingFactory::default());
        let fetches = Arc::clone(&factory.fetches);
        engine.register_user(
            "javi",
            factory as Arc<dyn MembershipTaskFactory>,
            Arc::new(InMemoryMembershipStorage::new()) as Arc<dyn MembershipStorage>,
        );
        (engine, transport, fetches)
    }

    #[tokio::test]
    async fn streaming_mode_connects_and_syncs_once() {
        let (engine, transport, fetches) = engine(config(), false);
        engine.start();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(transport.is_connected());
        // Initial sync only, no periodic schedule while push is healthy.
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        engine.stop();
    }

    #[tokio::test]
    async fn polling_mode_schedules_periodic_fetching() {
        let (engine, transport, fetches) = engine(config().with_streaming_enabled(false), false);
        engine.start();
        tokio::time::sleep(Duration::from_millis(150)).await;
        engine.stop();

        assert_eq!(transport.connect_calls(), 0);
        assert!(fetches.load(Ordering::SeqCst) >= 6);
    }

    #[tokio::test]
    async fn push_rejection_falls_back_to_polling() {
        let (engine, transport, fetches) = engine(config(), true);
        engine.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        engine.stop();

        assert_eq!(transport.connect_calls(), 0);
        // Initial sync plus several periodic runs after the fallback.
        assert!(fetches.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test]
    async fn backgrounding_pauses_the_executor() {
        let (engine, _transport, _fetches) = engine(config(), false);
        engine.start();
        tokio::time::sleep(Duration::from_millis(60)).await;

        engine.host_backgrounded();
        assert!(engine.is_paused());
        engine.host_foregrounded();
        assert!(!engine.is_paused());
        engine.stop();
    }
}
