pub mod backoff;
pub mod registry;
pub mod retry;
pub mod synchronizer;
pub mod worker;

pub use backoff::BackoffCounter;
pub use registry::SynchronizerRegistry;
pub use retry::RetryBackoffTimer;
pub use synchronizer::{MembershipSynchronizer, MembershipTaskFactory};
pub use worker::UpdateWorker;
