use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::executor::TaskExecutor;

use super::connectivity::{ConnectivityEvent, ConnectivityMonitor, ConnectivitySubscription};

/// A pipeline component that can be suspended and resumed as one unit.
pub trait PipelineControl: Send + Sync {
    fn pause(&self);
    fn resume(&self);
}

impl PipelineControl for TaskExecutor {
    fn pause(&self) {
        TaskExecutor::pause(self);
    }

    fn resume(&self) {
        TaskExecutor::resume(self);
    }
}

/// Merges "host backgrounded" and "network unavailable" into a single
/// pause/resume decision for the whole pipeline.
///
/// The pipeline is paused while either signal is bad and resumes only once
/// both are good again; targets see each edge exactly once.
pub struct PauseCoordinator {
    inner: Arc<CoordinatorInner>,
    _connectivity: ConnectivitySubscription,
}

struct CoordinatorInner {
    host_active: AtomicBool,
    network_up: AtomicBool,
    paused: AtomicBool,
    targets: Vec<Arc<dyn PipelineControl>>,
}

impl PauseCoordinator {
    pub fn new(monitor: &ConnectivityMonitor, targets: Vec<Arc<dyn PipelineControl>>) -> Self {
        let inner = Arc::new(CoordinatorInner {
            host_active: AtomicBool::new(true),
            network_up: AtomicBool::new(monitor.is_connected()),
            paused: AtomicBool::new(false),
            targets,
        });

        let subscription = {
            let inner = Arc::clone(&inner);
            monitor.subscribe(move |event| {
                inner
                    .network_up
                    .store(event == ConnectivityEvent::Connected, Ordering::SeqCst);
                inner.reevaluate();
            })
        };

        // The monitor may already know the network is down.
        inner.reevaluate();

        Self {
            inner,
            _connectivity: subscription,
        }
    }

    pub fn host_backgrounded(&self) {
        self.inner.host_active.store(false, Ordering::SeqCst);
        self.inner.reevaluate();
    }

    pub fn host_foregrounded(&self) {
        self.inner.host_active.store(true, Ordering::SeqCst);
        self.inner.reevaluate();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }
}

impl CoordinatorInner {
    fn reevaluate(&self) {
        let should_pause =
            !self.host_active.load(Ordering::SeqCst) || !self.network_up.load(Ordering::SeqCst);
        if self.paused.swap(should_pause, Ordering::SeqCst) == should_pause {
            return;
        }
        if should_pause {
            info!("pausing sync pipeline");
            for target in &self.targets {
                target.pause();
            }
        } else {
            info!("resuming sync pipeline");
            for target in &self.targets {
                target.resume();
            }
        }
    }
}
