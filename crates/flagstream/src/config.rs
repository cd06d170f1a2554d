use std::time::Duration;

/// Tuning knobs for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Periodic membership refresh cadence used when push is unavailable
    /// or as the steady-state re-arm period after a successful sync.
    pub segments_refresh: Duration,
    /// Base delay for exponential retry backoff.
    pub backoff_base: Duration,
    /// Ceiling for exponential retry backoff.
    pub backoff_max: Duration,
    /// Maximum retry attempts per sync run; `None` retries until stopped.
    pub retry_limit: Option<u32>,
    /// Window used to absorb connectivity flapping before reacting.
    pub connectivity_debounce: Duration,
    /// Whether the streaming pipeline should be started at all.
    pub streaming_enabled: bool,
    /// Endpoint for the streaming token exchange.
    pub auth_endpoint: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            segments_refresh: Duration::from_secs(1800),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(1800),
            retry_limit: None,
            connectivity_debounce: Duration::from_millis(500),
            streaming_enabled: true,
            auth_endpoint: "https://auth.flagstream.dev/v2/auth".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn with_segments_refresh(mut self, refresh: Duration) -> Self {
        self.segments_refresh = refresh;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = Some(limit);
        self
    }

    pub fn with_connectivity_debounce(mut self, window: Duration) -> Self {
        self.connectivity_debounce = window;
        self
    }

    pub fn with_streaming_enabled(mut self, enabled: bool) -> Self {
        self.streaming_enabled = enabled;
        self
    }

    pub fn with_auth_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.auth_endpoint = endpoint.into();
        self
    }
}
