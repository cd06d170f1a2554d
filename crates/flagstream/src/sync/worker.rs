use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::dispatch::FetchDirective;

use super::registry::SynchronizerRegistry;

/// Drains push-triggered fetch directives and forwards them to the
/// registered synchronizers. Directives for the same scope supersede each
/// other downstream, so the worker never buffers.
pub struct UpdateWorker {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl UpdateWorker {
    pub fn spawn(
        mut directives: mpsc::UnboundedReceiver<FetchDirective>,
        registry: Arc<SynchronizerRegistry>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            while let Some(directive) = directives.recv().await {
                debug!(scope = ?directive.scope, delay = ?directive.sync_delay, "fetch directive received");
                registry.force_sync(&directive);
            }
            debug!("directive channel closed; update worker exiting");
        });
        Self {
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}
