use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::protocol::payload::{self, Action};
use crate::protocol::{hashing, MembershipNotification, Scope};
use crate::storage::MembershipStorage;

use super::sync_delay;
use super::FetchDirective;

/// Routes decoded membership notifications for one user key to their
/// reconciliation action: enqueue a fetch directive, apply a removal, or
/// ignore.
pub struct MembershipProcessor {
    user_key: String,
    key_hash: u64,
    directives: mpsc::UnboundedSender<FetchDirective>,
    storage: Arc<dyn MembershipStorage>,
}

impl MembershipProcessor {
    pub fn new(
        user_key: impl Into<String>,
        directives: mpsc::UnboundedSender<FetchDirective>,
        storage: Arc<dyn MembershipStorage>,
    ) -> Self {
        let user_key = user_key.into();
        let key_hash = hashing::hash_key(&user_key);
        Self {
            user_key,
            key_hash,
            directives,
            storage,
        }
    }

    pub fn user_key(&self) -> &str {
        &self.user_key
    }

    /// Dispatches one notification. Never fails: undecodable payloads have
    /// already been degraded to an unbounded fetch by the classifier.
    pub fn process(&self, notification: &MembershipNotification) {
        let delay = sync_delay::calculate(
            &self.user_key,
            notification.update_interval_ms,
            notification.algorithm_seed,
            notification.strategy,
            notification.hashing_algorithm,
        );

        match payload::classify(notification, self.key_hash) {
            Action::TriggerFetch { change_number } => {
                debug!(
                    scope = ?notification.scope,
                    strategy = ?notification.strategy,
                    ?delay,
                    "membership change requires a fetch"
                );
                self.enqueue(notification.scope, delay, change_number);
            }
            Action::NoOp => {
                debug!(scope = ?notification.scope, "membership change does not affect this key");
            }
            Action::ApplyRemoval { names } => {
                debug!(scope = ?notification.scope, count = names.len(), "applying membership removal");
                self.storage.remove(notification.scope, &names);
            }
        }
    }

    /// Fallback when the raw message could not be decoded at all: fetch
    /// unbounded, immediately.
    pub fn process_fallback(&self, scope: Scope) {
        self.enqueue(scope, Duration::ZERO, None);
    }

    fn enqueue(&self, scope: Scope, sync_delay: Duration, target_change_number: Option<i64>) {
        let directive = FetchDirective {
            scope,
            sync_delay,
            target_change_number,
        };
        if self.directives.send(directive).is_err() {
            warn!("update worker is gone; dropping fetch directive");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CompressionKind, HashingAlgorithm, UpdateStrategy};
    use crate::storage::InMemoryMembershipStorage;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use std::collections::HashSet;

    fn processor(
        user_key: &str,
    ) -> (
        MembershipProcessor,
        mpsc::UnboundedReceiver<FetchDirective>,
        Arc<InMemoryMembershipStorage>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let storage = Arc::new(InMemoryMembershipStorage::default());
        (
            MembershipProcessor::new(user_key, tx, storage.clone()),
            rx,
            storage,
        )
    }

    fn notification(strategy: UpdateStrategy) -> MembershipNotification {
        MembershipNotification {
            scope: Scope::Segment,
            strategy,
            compression: CompressionKind::None,
            data: None,
            names: HashSet::new(),
            change_number: Some(99),
            update_interval_ms: Some(60_000),
            algorithm_seed: Some(11),
            hashing_algorithm: HashingAlgorithm::Murmur3_32,
        }
    }

    #[tokio::test]
    async fn unbounded_update_enqueues_a_directive_with_desync_delay() {
        let (processor, mut rx, _) = processor("javi");

        processor.process(&notification(UpdateStrategy::UnboundedFetch));

        let directive = rx.try_recv().unwrap();
        assert_eq!(directive.scope, Scope::Segment);
        assert_eq!(directive.target_change_number, Some(99));
        let expected = sync_delay::calculate(
            "javi",
            Some(60_000),
            Some(11),
            UpdateStrategy::UnboundedFetch,
            HashingAlgorithm::Murmur3_32,
        );
        assert_eq!(directive.sync_delay, expected);
    }

    #[tokio::test]
    async fn removal_writes_storage_and_schedules_no_fetch() {
        let (processor, mut rx, storage) = processor("javi");
        let initial: HashSet<String> =
            ["beta".to_string(), "gamma".to_string()].into_iter().collect();
        storage.replace(Scope::Segment, initial);

        let mut n = notification(UpdateStrategy::Removal);
        n.names.insert("beta".to_string());
        processor.process(&n);

        let remaining = storage.snapshot(Scope::Segment);
        assert_eq!(remaining, ["gamma".to_string()].into_iter().collect());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unaffected_bounded_update_is_a_no_op() {
        let (processor, mut rx, _) = processor("javi");
        let key_hash = hashing::hash_key("javi");
        let mut bitmap = vec![0u8; 16];
        let index = payload::key_index(key_hash, bitmap.len()).unwrap();
        // Set every bit except the one owned by this key.
        for byte in bitmap.iter_mut() {
            *byte = 0xff;
        }
        bitmap[index / 8] &= !(1 << (index % 8));

        let mut n = notification(UpdateStrategy::BoundedFetch);
        n.data = Some(STANDARD.encode(&bitmap));
        processor.process(&n);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn fallback_enqueues_an_immediate_unbounded_fetch() {
        let (processor, mut rx, _) = processor("javi");

        processor.process_fallback(Scope::LargeSegment);

        let directive = rx.try_recv().unwrap();
        assert_eq!(directive.scope, Scope::LargeSegment);
        assert_eq!(directive.sync_delay, Duration::ZERO);
        assert_eq!(directive.target_change_number, None);
    }
}
