use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthError, PushTokenProvider};
use crate::config::SyncConfig;
use crate::dispatch::MembershipProcessor;
use crate::executor::{SyncTask, TaskExecutor, TaskOutcome};
use crate::platform::PipelineControl;
use crate::protocol::notification::{self, NotificationKind};
use crate::protocol::Scope;
use crate::sync::{BackoffCounter, RetryBackoffTimer};
use crate::transport::{StreamingTransport, TransportError, TransportEvent, MESSAGE_DATA_FIELD};

/// Owns the push side of the pipeline: authenticates, subscribes the
/// streaming transport to the token's channels, pumps raw messages into
/// the per-key dispatchers and keeps the connection alive with backoff.
pub struct PushManager {
    inner: Arc<PushInner>,
}

/// Invoked when streaming goes down for good (credentials rejected, push
/// disabled, subscription refused); the owner typically falls back to
/// periodic polling.
pub type PushUnavailableHandler = Arc<dyn Fn() + Send + Sync>;

struct PushInner {
    token_provider: Arc<dyn PushTokenProvider>,
    transport: Arc<dyn StreamingTransport>,
    processors: Mutex<HashMap<String, Arc<MembershipProcessor>>>,
    user_keys: Mutex<Vec<String>>,
    connect_timer: RetryBackoffTimer,
    pump: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    paused: AtomicBool,
    push_down: Mutex<Option<PushUnavailableHandler>>,
}

impl PushManager {
    pub fn new(
        token_provider: Arc<dyn PushTokenProvider>,
        transport: Arc<dyn StreamingTransport>,
        executor: Arc<TaskExecutor>,
        config: &SyncConfig,
    ) -> Self {
        let connect_timer = RetryBackoffTimer::new(
            executor,
            BackoffCounter::new(config.backoff_base, config.backoff_max),
        );
        let inner = Arc::new(PushInner {
            token_provider,
            transport,
            processors: Mutex::new(HashMap::new()),
            user_keys: Mutex::new(Vec::new()),
            connect_timer,
            pump: Mutex::new(None),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            push_down: Mutex::new(None),
        });
        inner.connect_timer.set_task(Arc::new(ConnectTask {
            inner: Arc::downgrade(&inner),
        }));
        // The connect loop only completes with an outcome on success or a
        // terminal failure; the latter is the push-down signal.
        let weak = Arc::downgrade(&inner);
        inner.connect_timer.set_listener(Arc::new(move |outcome| {
            if let TaskOutcome::Error { do_not_retry: true } = outcome {
                if let Some(inner) = weak.upgrade() {
                    inner.notify_push_down();
                }
            }
        }));
        Self { inner }
    }

    /// Installs the handler invoked when streaming becomes permanently
    /// unavailable.
    pub fn on_push_unavailable(&self, handler: PushUnavailableHandler) {
        *self.inner.push_down.lock() = Some(handler);
    }

    /// Adds a logical user to the shared connection. Takes effect on the
    /// next (re)connect; notifications start flowing to the processor
    /// immediately.
    pub fn register_user(&self, user_key: impl Into<String>, processor: Arc<MembershipProcessor>) {
        let user_key = user_key.into();
        {
            let mut keys = self.inner.user_keys.lock();
            if !keys.contains(&user_key) {
                keys.push(user_key.clone());
            }
        }
        self.inner.processors.lock().insert(user_key, processor);
    }

    pub fn unregister_user(&self, user_key: &str) {
        self.inner.user_keys.lock().retain(|key| key != user_key);
        self.inner.processors.lock().remove(user_key);
    }

    /// Starts the connect loop. Idempotent while running.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("starting push pipeline");
        self.inner.connect_timer.start();
    }

    /// Tears the push pipeline down: stops the connect loop, cancels the
    /// pump and disconnects the transport.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.connect_timer.stop();
        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
        }
        let transport = Arc::clone(&self.inner.transport);
        tokio::spawn(async move {
            transport.disconnect().await;
        });
    }
}

impl PipelineControl for PushManager {
    /// Suspends streaming without forgetting that it was running; resume
    /// picks the connection back up.
    fn pause(&self) {
        if self.inner.paused.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("pausing push pipeline");
        self.inner.connect_timer.stop();
        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
        }
        let transport = Arc::clone(&self.inner.transport);
        tokio::spawn(async move {
            transport.disconnect().await;
        });
    }

    fn resume(&self) {
        if !self.inner.paused.swap(false, Ordering::SeqCst) {
            return;
        }
        if self.inner.running.load(Ordering::SeqCst) {
            debug!("resuming push pipeline");
            self.inner.connect_timer.start();
        }
    }
}

struct ConnectTask {
    inner: Weak<PushInner>,
}

#[async_trait]
impl SyncTask for ConnectTask {
    async fn execute(&self) -> TaskOutcome {
        match self.inner.upgrade() {
            Some(inner) => inner.connect_once().await,
            None => TaskOutcome::terminal_error(),
        }
    }
}

impl PushInner {
    async fn connect_once(self: Arc<Self>) -> TaskOutcome {
        let user_keys = self.user_keys.lock().clone();
        let auth = match self.token_provider.authenticate(&user_keys).await {
            Ok(auth) => auth,
            Err(err @ (AuthError::Denied | AuthError::InvalidToken(_))) => {
                error!("streaming authentication rejected: {err}");
                return TaskOutcome::terminal_error();
            }
            Err(err) => {
                warn!("streaming authentication attempt failed: {err}");
                return TaskOutcome::retryable_error();
            }
        };

        if !auth.push_enabled {
            info!("push disabled by the control plane; streaming stays off");
            return TaskOutcome::terminal_error();
        }
        let Some(token) = auth.token else {
            error!("auth response enabled push but carried no token");
            return TaskOutcome::terminal_error();
        };

        match self.transport.connect(&token.raw, &token.channels).await {
            Ok(events) => {
                debug!(channels = ?token.channels, "streaming connection established");
                self.spawn_pump(events);
                TaskOutcome::Success
            }
            Err(TransportError::Rejected) => {
                error!("streaming subscription rejected; not retrying");
                TaskOutcome::terminal_error()
            }
            Err(err) => {
                warn!("streaming connect failed: {err}");
                TaskOutcome::retryable_error()
            }
        }
    }

    fn spawn_pump(self: &Arc<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        let inner = Arc::clone(self);
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Opened => debug!("streaming channel open"),
                    TransportEvent::Message(fields) => inner.handle_message(&fields),
                    TransportEvent::Error { retryable } => {
                        inner.connection_lost(retryable);
                        break;
                    }
                    TransportEvent::Closed => {
                        inner.connection_lost(true);
                        break;
                    }
                }
            }
        });
        if let Some(previous) = self.pump.lock().replace(pump) {
            previous.abort();
        }
    }

    fn notify_push_down(&self) {
        let handler = self.push_down.lock().clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    fn connection_lost(&self, retryable: bool) {
        if !retryable {
            error!("streaming connection failed terminally; staying down");
            self.notify_push_down();
            return;
        }
        if self.running.load(Ordering::SeqCst) && !self.paused.load(Ordering::SeqCst) {
            warn!("streaming connection lost; scheduling reconnect");
            self.connect_timer.start();
        }
    }

    fn handle_message(&self, fields: &HashMap<String, String>) {
        let Some(data) = fields.get(MESSAGE_DATA_FIELD) else {
            debug!("push message without a data field");
            return;
        };
        match notification::parse_incoming(data) {
            Ok(incoming) => match incoming.kind {
                NotificationKind::Membership(scope) => {
                    self.dispatch_membership(scope, &incoming.json);
                }
                NotificationKind::Unknown(kind) => {
                    debug!(%kind, "ignoring notification of unhandled type");
                }
            },
            Err(err) => warn!("undecodable push message: {err}"),
        }
    }

    fn dispatch_membership(&self, scope: Scope, json: &str) {
        let processors: Vec<Arc<MembershipProcessor>> =
            self.processors.lock().values().cloned().collect();
        match notification::parse_membership(json, scope) {
            Ok(parsed) => {
                for processor in &processors {
                    processor.process(&parsed);
                }
            }
            Err(err) => {
                warn!("membership notification decode failed ({err}); degrading to unbounded fetch");
                for processor in &processors {
                    processor.process_fallback(scope);
                }
            }
        }
    }
}
