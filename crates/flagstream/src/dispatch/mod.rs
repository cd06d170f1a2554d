pub mod processor;
pub mod sync_delay;

pub use processor::MembershipProcessor;

use std::time::Duration;

use crate::protocol::Scope;

/// A queued instruction to reconcile one membership scope with the server.
///
/// Directives are idempotent pulls of latest state, so several for the same
/// scope may coalesce; last-one-wins is acceptable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchDirective {
    pub scope: Scope,
    /// Desync delay applied before fetching so the subscriber population
    /// does not stampede the origin after one notification.
    pub sync_delay: Duration,
    /// When known, lets the fetch short-circuit if local state is already
    /// at or past this change number.
    pub target_change_number: Option<i64>,
}
