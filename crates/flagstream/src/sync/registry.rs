use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::dispatch::FetchDirective;

use super::synchronizer::MembershipSynchronizer;

/// Synchronizers for every logical user key sharing the streaming
/// connection.
///
/// Lifecycle actions that already happened (cache load, first sync,
/// periodic start) are replayed to synchronizers registered late, so a
/// client created after startup behaves as if it had been there from the
/// beginning.
pub struct SynchronizerRegistry {
    inner: Mutex<RegistryInner>,
}

struct RegistryInner {
    synchronizers: HashMap<String, Arc<MembershipSynchronizer>>,
    cache_loaded: bool,
    synchronized: bool,
    periodic_started: bool,
}

impl SynchronizerRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                synchronizers: HashMap::new(),
                cache_loaded: false,
                synchronized: false,
                periodic_started: false,
            }),
        }
    }

    pub fn register(&self, user_key: impl Into<String>, synchronizer: Arc<MembershipSynchronizer>) {
        let user_key = user_key.into();
        let mut inner = self.inner.lock();

        if inner.cache_loaded {
            synchronizer.load_from_cache();
        }
        if inner.synchronized {
            synchronizer.synchronize();
        }
        if inner.periodic_started {
            synchronizer.start_periodic_fetching();
        }

        if let Some(displaced) = inner.synchronizers.insert(user_key.clone(), synchronizer) {
            warn!(%user_key, "replacing an already registered synchronizer");
            displaced.destroy();
        }
        debug!(%user_key, "membership synchronizer registered");
    }

    pub fn unregister(&self, user_key: &str) {
        let removed = self.inner.lock().synchronizers.remove(user_key);
        if let Some(synchronizer) = removed {
            synchronizer.stop_periodic_fetching();
            synchronizer.destroy();
            debug!(%user_key, "membership synchronizer unregistered");
        }
    }

    pub fn load_from_cache(&self) {
        let mut inner = self.inner.lock();
        inner.cache_loaded = true;
        for synchronizer in inner.synchronizers.values() {
            synchronizer.load_from_cache();
        }
    }

    pub fn synchronize(&self) {
        let mut inner = self.inner.lock();
        inner.synchronized = true;
        for synchronizer in inner.synchronizers.values() {
            synchronizer.synchronize();
        }
    }

    pub fn start_periodic_fetching(&self) {
        let mut inner = self.inner.lock();
        inner.periodic_started = true;
        for synchronizer in inner.synchronizers.values() {
            synchronizer.start_periodic_fetching();
        }
    }

    pub fn stop_periodic_fetching(&self) {
        let mut inner = self.inner.lock();
        inner.periodic_started = false;
        for synchronizer in inner.synchronizers.values() {
            synchronizer.stop_periodic_fetching();
        }
    }

    /// Fans a push-triggered directive out to every registered key.
    pub fn force_sync(&self, directive: &FetchDirective) {
        let inner = self.inner.lock();
        for synchronizer in inner.synchronizers.values() {
            synchronizer.force_sync(directive);
        }
    }

    pub fn destroy(&self) {
        let inner = self.inner.lock();
        for synchronizer in inner.synchronizers.values() {
            synchronizer.destroy();
        }
    }
}

impl Default for SynchronizerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
