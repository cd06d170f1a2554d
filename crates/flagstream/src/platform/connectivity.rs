use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Platform reachability signal. One production implementation exists per
/// target platform and is chosen at construction time; core logic never
/// branches on platform specifics.
pub trait ConnectivitySource: Send + Sync {
    /// Registers the callback invoked with the new reachability on every
    /// transition. May be called from any thread.
    fn subscribe(&self, callback: Box<dyn Fn(bool) + Send + Sync>);
}

/// Reachability source driven by explicit calls. Used by tests and by
/// embedders whose platform layer pushes transitions in by hand.
#[derive(Default)]
pub struct ManualConnectivitySource {
    callbacks: Mutex<Vec<Box<dyn Fn(bool) + Send + Sync>>>,
}

impl ManualConnectivitySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        for callback in self.callbacks.lock().iter() {
            callback(connected);
        }
    }
}

impl ConnectivitySource for ManualConnectivitySource {
    fn subscribe(&self, callback: Box<dyn Fn(bool) + Send + Sync>) {
        self.callbacks.lock().push(callback);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Connected,
    Disconnected,
}

pub type ConnectivityListener = Arc<dyn Fn(ConnectivityEvent) + Send + Sync>;

/// Debounced view over a [`ConnectivitySource`].
///
/// Raw transitions are absorbed until the signal has been quiet for the
/// debounce window, so a flapping link produces one event instead of a
/// storm. Listeners hold an explicit subscription handle; dropping the
/// handle unsubscribes, so a dead listener is never invoked.
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    connected: AtomicBool,
    paused: AtomicBool,
    listeners: Mutex<HashMap<u64, ConnectivityListener>>,
    next_id: AtomicU64,
}

/// Keeps a listener registered; dropping it unsubscribes.
pub struct ConnectivitySubscription {
    id: u64,
    inner: Weak<MonitorInner>,
}

impl Drop for ConnectivitySubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.listeners.lock().remove(&self.id);
        }
    }
}

impl ConnectivityMonitor {
    /// Must be created within a Tokio runtime; the debounce pump runs as a
    /// spawned task.
    pub fn new(source: &dyn ConnectivitySource, debounce: Duration) -> Self {
        let inner = Arc::new(MonitorInner {
            connected: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        source.subscribe(Box::new(move |connected| {
            let _ = tx.send(connected);
        }));
        tokio::spawn(debounce_pump(rx, Arc::clone(&inner), debounce));

        Self { inner }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Suppresses listener notification. State keeps tracking the platform
    /// signal so a resume can re-read it.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(ConnectivityEvent) + Send + Sync + 'static,
    ) -> ConnectivitySubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.listeners.lock().insert(id, Arc::new(listener));
        ConnectivitySubscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

async fn debounce_pump(
    mut raw: mpsc::UnboundedReceiver<bool>,
    inner: Arc<MonitorInner>,
    debounce: Duration,
) {
    while let Some(first) = raw.recv().await {
        let mut latest = first;
        // Absorb flapping: drain until the signal is quiet for the window.
        loop {
            match tokio::time::timeout(debounce, raw.recv()).await {
                Ok(Some(next)) => latest = next,
                Ok(None) => {
                    commit(&inner, latest);
                    return;
                }
                Err(_) => break,
            }
        }
        commit(&inner, latest);
    }
}

fn commit(inner: &MonitorInner, connected: bool) {
    if inner.connected.swap(connected, Ordering::SeqCst) == connected {
        return;
    }
    debug!(connected, "connectivity changed");
    if inner.paused.load(Ordering::SeqCst) {
        return;
    }
    let event = if connected {
        ConnectivityEvent::Connected
    } else {
        ConnectivityEvent::Disconnected
    };
    // Snapshot so a listener unsubscribing concurrently cannot race the
    // iteration.
    let listeners: Vec<ConnectivityListener> = inner.listeners.lock().values().cloned().collect();
    for listener in listeners {
        listener(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBOUNCE: Duration = Duration::from_millis(20);
    const SETTLE: Duration = Duration::from_millis(100);

    fn monitor() -> (Arc<ManualConnectivitySource>, ConnectivityMonitor) {
        let source = Arc::new(ManualConnectivitySource::new());
        let monitor = ConnectivityMonitor::new(source.as_ref(), DEBOUNCE);
        (source, monitor)
    }

    #[tokio::test]
    async fn transitions_are_reported_after_the_quiet_window() {
        let (source, monitor) = monitor();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _subscription = monitor.subscribe(move |event| sink.lock().push(event));

        source.set_connected(false);
        tokio::time::sleep(SETTLE).await;
        assert!(!monitor.is_connected());

        source.set_connected(true);
        tokio::time::sleep(SETTLE).await;
        assert!(monitor.is_connected());

        assert_eq!(
            events.lock().as_slice(),
            &[
                ConnectivityEvent::Disconnected,
                ConnectivityEvent::Connected
            ]
        );
    }

    #[tokio::test]
    async fn flapping_collapses_to_the_final_state() {
        let (source, monitor) = monitor();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _subscription = monitor.subscribe(move |event| sink.lock().push(event));

        // Rapid off/on/off inside one debounce window.
        source.set_connected(false);
        source.set_connected(true);
        source.set_connected(false);
        tokio::time::sleep(SETTLE).await;

        assert!(!monitor.is_connected());
        assert_eq!(events.lock().as_slice(), &[ConnectivityEvent::Disconnected]);
    }

    #[tokio::test]
    async fn flap_back_to_the_current_state_is_silent() {
        let (source, monitor) = monitor();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _subscription = monitor.subscribe(move |event| sink.lock().push(event));

        source.set_connected(false);
        source.set_connected(true);
        tokio::time::sleep(SETTLE).await;

        assert!(monitor.is_connected());
        assert!(events.lock().is_empty());
    }

    #[tokio::test]
    async fn dropping_the_subscription_unsubscribes() {
        let (source, monitor) = monitor();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let subscription = monitor.subscribe(move |event| sink.lock().push(event));
        drop(subscription);

        source.set_connected(false);
        tokio::time::sleep(SETTLE).await;

        assert!(events.lock().is_empty());
        assert!(!monitor.is_connected());
    }

    #[tokio::test]
    async fn pause_suppresses_events_but_keeps_tracking() {
        let (source, monitor) = monitor();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _subscription = monitor.subscribe(move |event| sink.lock().push(event));

        monitor.pause();
        source.set_connected(false);
        tokio::time::sleep(SETTLE).await;

        assert!(events.lock().is_empty());
        assert!(!monitor.is_connected());

        monitor.resume();
        source.set_connected(true);
        tokio::time::sleep(SETTLE).await;
        assert_eq!(events.lock().as_slice(), &[ConnectivityEvent::Connected]);
    }
}
