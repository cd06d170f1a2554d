pub mod connectivity;
pub mod lifecycle;

pub use connectivity::{
    ConnectivityEvent, ConnectivityMonitor, ConnectivitySource, ConnectivitySubscription,
    ManualConnectivitySource,
};
pub use lifecycle::{PauseCoordinator, PipelineControl};
