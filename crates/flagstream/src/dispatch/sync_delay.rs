use std::time::Duration;

use crate::protocol::hashing;
use crate::protocol::{HashingAlgorithm, UpdateStrategy};

pub const DEFAULT_UPDATE_INTERVAL_MS: u64 = 60_000;

/// Computes the desync delay for one client reacting to a notification.
///
/// Hashing the user key into the update interval spreads fetches across the
/// subscriber population deterministically: the same client always lands on
/// the same slot, different clients land on different ones.
pub fn calculate(
    user_key: &str,
    update_interval_ms: Option<u64>,
    algorithm_seed: Option<i32>,
    strategy: UpdateStrategy,
    algorithm: HashingAlgorithm,
) -> Duration {
    if strategy == UpdateStrategy::Removal {
        // Removals apply locally; there is no fetch to spread out.
        return Duration::ZERO;
    }
    let interval = update_interval_ms.unwrap_or(DEFAULT_UPDATE_INTERVAL_MS);
    if interval == 0 {
        return Duration::ZERO;
    }
    match algorithm {
        HashingAlgorithm::None => Duration::ZERO,
        HashingAlgorithm::Murmur3_32 => {
            let seed = algorithm_seed.unwrap_or(0) as u32;
            let hash = hashing::murmur3_32(user_key.as_bytes(), seed);
            Duration::from_millis(u64::from(hash) % interval)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_algorithm_means_no_delay() {
        let delay = calculate(
            "javi",
            Some(60_000),
            Some(1),
            UpdateStrategy::UnboundedFetch,
            HashingAlgorithm::None,
        );
        assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn delay_stays_inside_the_interval() {
        for key in ["javi", "maria", "user-3", ""] {
            let delay = calculate(
                key,
                Some(60_000),
                Some(1234),
                UpdateStrategy::BoundedFetch,
                HashingAlgorithm::Murmur3_32,
            );
            assert!(delay < Duration::from_millis(60_000));
        }
    }

    #[test]
    fn same_inputs_same_slot() {
        let a = calculate(
            "javi",
            Some(300_000),
            Some(7),
            UpdateStrategy::UnboundedFetch,
            HashingAlgorithm::Murmur3_32,
        );
        let b = calculate(
            "javi",
            Some(300_000),
            Some(7),
            UpdateStrategy::UnboundedFetch,
            HashingAlgorithm::Murmur3_32,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn interval_defaults_when_absent() {
        let delay = calculate(
            "javi",
            None,
            None,
            UpdateStrategy::UnboundedFetch,
            HashingAlgorithm::Murmur3_32,
        );
        assert!(delay < Duration::from_millis(DEFAULT_UPDATE_INTERVAL_MS));
    }

    #[test]
    fn removals_never_wait() {
        let delay = calculate(
            "javi",
            Some(60_000),
            Some(1),
            UpdateStrategy::Removal,
            HashingAlgorithm::Murmur3_32,
        );
        assert_eq!(delay, Duration::ZERO);
    }
}
