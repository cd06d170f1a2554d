pub mod manager;

pub use manager::{PushManager, PushUnavailableHandler};
