use std::time::Duration;

/// Per-call overrides. Every `None` falls back to the configured default.
#[derive(Clone, Debug, Default)]
pub struct FetchOptions {
    /// Window during which identical requests join the same operation.
    pub ttl: Option<Duration>,
    /// `Some(false)` bypasses deduplication for this call.
    pub enabled: Option<bool>,
    /// Total attempts, the first one included.
    pub max_attempts: Option<u32>,
    /// Deadline for each individual attempt.
    pub timeout: Option<Duration>,
    pub initial_delay: Option<Duration>,
    pub max_delay: Option<Duration>,
    pub backoff_multiplier: Option<f64>,
    pub log_retries: Option<bool>,
}

impl FetchOptions {
    pub fn without_dedup() -> Self {
        Self {
            enabled: Some(false),
            ..Default::default()
        }
    }
}
