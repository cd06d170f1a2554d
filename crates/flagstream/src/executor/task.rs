use async_trait::async_trait;

/// Result of one task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    /// Failed. `do_not_retry` marks terminal conditions (rejected
    /// credentials, malformed request) that backing off cannot fix.
    Error { do_not_retry: bool },
}

impl TaskOutcome {
    pub fn retryable_error() -> Self {
        TaskOutcome::Error {
            do_not_retry: false,
        }
    }

    pub fn terminal_error() -> Self {
        TaskOutcome::Error { do_not_retry: true }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success)
    }
}

/// An opaque unit of sync work. Concrete fetch tasks (HTTP calls, storage
/// writes) live outside the engine; schedulers only see this interface.
#[async_trait]
pub trait SyncTask: Send + Sync {
    async fn execute(&self) -> TaskOutcome;
}
