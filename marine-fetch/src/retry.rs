use crate::error::FetchError;
use crate::options::FetchOptions;
use crate::transport::{send_with_timeout, FetchRequest, RawResponse, Transport};
use getset::CopyGetters;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Jitter applied on both sides of a computed delay.
pub const JITTER_RATIO: f64 = 0.25;

/// Decides whether a failed attempt should be retried.
pub type RetryPredicate = Arc<dyn Fn(&FetchError) -> bool + Send + Sync>;

/// Retry defaults as they appear in configuration files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub timeout_ms: u64,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub log_retries: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_ms: 10_000,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            log_retries: false,
        }
    }
}

/// How one logical request is retried. Immutable once built; per-call
/// overrides produce a new policy.
#[derive(Clone, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct RetryPolicy {
    max_attempts: u32,
    timeout: Duration,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    log_retries: bool,
    #[getset(skip)]
    retry_predicate: RetryPredicate,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("timeout", &self.timeout)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("log_retries", &self.log_retries)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            timeout: Duration::from_millis(config.timeout_ms),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            log_retries: config.log_retries,
            retry_predicate: Arc::new(FetchError::is_retryable),
        }
    }
}

impl RetryPolicy {
    /// Replaces the retry classification.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&FetchError) -> bool + Send + Sync + 'static,
    {
        self.retry_predicate = Arc::new(predicate);
        self
    }

    /// Merges per-call overrides onto this policy.
    pub fn with_overrides(&self, options: &FetchOptions) -> Self {
        Self {
            max_attempts: options.max_attempts.unwrap_or(self.max_attempts),
            timeout: options.timeout.unwrap_or(self.timeout),
            initial_delay: options.initial_delay.unwrap_or(self.initial_delay),
            max_delay: options.max_delay.unwrap_or(self.max_delay),
            backoff_multiplier: options.backoff_multiplier.unwrap_or(self.backoff_multiplier),
            log_retries: options.log_retries.unwrap_or(self.log_retries),
            retry_predicate: Arc::clone(&self.retry_predicate),
        }
    }

    pub fn validate(&self) -> Result<(), FetchError> {
        if self.max_attempts < 1 {
            return Err(FetchError::InvalidPolicy("max_attempts must be at least 1".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(FetchError::InvalidPolicy("timeout must be positive".to_string()));
        }
        if self.initial_delay.is_zero() {
            return Err(FetchError::InvalidPolicy("initial_delay must be positive".to_string()));
        }
        if self.initial_delay > self.max_delay {
            return Err(FetchError::InvalidPolicy(format!(
                "initial_delay {:?} exceeds max_delay {:?}",
                self.initial_delay, self.max_delay
            )));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(FetchError::InvalidPolicy(format!(
                "backoff_multiplier must be a finite number >= 1, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }

    pub fn should_retry(&self, error: &FetchError) -> bool {
        (self.retry_predicate)(error)
    }

    /// Delay before the attempt following `attempt` (zero-based), without
    /// jitter: `min(initial_delay * multiplier^attempt, max_delay)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Spreads `delay` uniformly over ±[`JITTER_RATIO`].
pub fn apply_jitter<R: Rng + ?Sized>(delay: Duration, rng: &mut R) -> Duration {
    let factor = 1.0 + rng.gen_range(-JITTER_RATIO..=JITTER_RATIO);
    Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
}

/// Drives a [`Transport`] until it succeeds, hits a terminal failure, or
/// runs out of attempts. Attempts are strictly sequential and each one gets
/// a fresh timeout.
#[derive(Clone)]
pub struct RetryEngine {
    transport: Arc<dyn Transport>,
}

impl RetryEngine {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn fetch_with_retry(
        &self,
        request: &FetchRequest,
        policy: &RetryPolicy,
    ) -> Result<RawResponse, FetchError> {
        policy.validate()?;

        let mut attempt = 0;
        loop {
            let error = match send_with_timeout(self.transport.as_ref(), request, policy.timeout())
                .await
                .and_then(|response| response.error_for_status(request.url()))
            {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            if !policy.should_retry(&error) {
                log::debug!("Not retrying {}: {}", request.url(), error);
                return Err(error);
            }
            if attempt + 1 >= policy.max_attempts() {
                log::debug!(
                    "Giving up on {} after {} attempts: {}",
                    request.url(),
                    policy.max_attempts(),
                    error
                );
                return Err(error);
            }

            let delay = apply_jitter(policy.backoff_delay(attempt), &mut rand::thread_rng());
            if policy.log_retries() {
                log::warn!(
                    "Attempt {}/{} for {} failed ({}), retrying in {:?}",
                    attempt + 1,
                    policy.max_attempts(),
                    request.url(),
                    error,
                    delay
                );
            } else {
                log::debug!("Retrying {} in {:?} after: {}", request.url(), delay, error);
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockReply, MockTransport};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn build_engine(script: Vec<MockReply>) -> (RetryEngine, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new(script));
        (RetryEngine::new(transport.clone()), transport)
    }

    fn request() -> FetchRequest {
        FetchRequest::get("https://marine.example.com/v1/marine").with_query("latitude", "10.0000")
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let (engine, transport) = build_engine(vec![MockReply::Status(200, r#"{"ok":true}"#)]);
        let response = engine.fetch_with_retry(&request(), &RetryPolicy::default()).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_server_errors_until_success() {
        let (engine, transport) = build_engine(vec![
            MockReply::Status(503, ""),
            MockReply::Status(500, ""),
            MockReply::Status(200, "{}"),
        ]);
        let response = engine.fetch_with_retry(&request(), &RetryPolicy::default()).await.unwrap();
        assert!(response.is_success());
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_fail_immediately() {
        for status in [400, 401, 404] {
            let (engine, transport) = build_engine(vec![MockReply::Status(status, "")]);
            let err = engine
                .fetch_with_retry(&request(), &RetryPolicy::default())
                .await
                .unwrap_err();
            assert_eq!(err.status(), Some(status));
            assert_eq!(transport.calls(), 1, "status {} must not retry", status);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_statuses_exhaust_attempts() {
        for status in [408, 429, 500, 503] {
            let (engine, transport) = build_engine(vec![MockReply::Status(status, "")]);
            let err = engine
                .fetch_with_retry(&request(), &RetryPolicy::default())
                .await
                .unwrap_err();
            assert_eq!(err.status(), Some(status));
            assert_eq!(transport.calls(), 3, "status {} should use every attempt", status);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_are_retried_with_fresh_deadline() {
        let (engine, transport) = build_engine(vec![MockReply::Hang]);
        let policy = RetryPolicy::default().with_overrides(&FetchOptions {
            max_attempts: Some(2),
            timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let err = engine.fetch_with_retry(&request(), &policy).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout { timeout_ms: 50, .. }));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_errors_are_retried() {
        let (engine, transport) = build_engine(vec![
            MockReply::Network("connection reset"),
            MockReply::Status(200, "{}"),
        ]);
        engine.fetch_with_retry(&request(), &RetryPolicy::default()).await.unwrap();
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_wait_for_backoff() {
        let (engine, _transport) = build_engine(vec![MockReply::Status(503, "")]);
        let started = tokio::time::Instant::now();
        let _ = engine.fetch_with_retry(&request(), &RetryPolicy::default()).await;
        // 1s and 2s delays, each jittered by at most 25%.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(2250), "elapsed {:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(3750), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_predicate() {
        let (engine, transport) = build_engine(vec![MockReply::Status(503, "")]);
        let policy = RetryPolicy::default().with_predicate(|_| false);
        engine.fetch_with_retry(&request(), &policy).await.unwrap_err();
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_policy_is_rejected_before_sending() {
        let (engine, transport) = build_engine(vec![]);
        let policy = RetryPolicy::default().with_overrides(&FetchOptions {
            initial_delay: Some(Duration::from_secs(20)),
            ..Default::default()
        });
        let err = engine.fetch_with_retry(&request(), &policy).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidPolicy(_)));
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::default().validate().is_ok());

        let zero_attempts = RetryPolicy::default().with_overrides(&FetchOptions {
            max_attempts: Some(0),
            ..Default::default()
        });
        assert!(zero_attempts.validate().is_err());

        let zero_delay = RetryPolicy::default().with_overrides(&FetchOptions {
            initial_delay: Some(Duration::ZERO),
            ..Default::default()
        });
        assert!(zero_delay.validate().is_err());

        let shrinking = RetryPolicy::default().with_overrides(&FetchOptions {
            backoff_multiplier: Some(0.5),
            ..Default::default()
        });
        assert!(shrinking.validate().is_err());
    }

    #[test]
    fn test_backoff_is_monotonic_and_bounded() {
        let policy = RetryPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 0..20 {
            let delay = policy.backoff_delay(attempt);
            assert!(delay >= previous, "attempt {} shrank", attempt);
            assert!(delay <= policy.max_delay());
            previous = delay;
        }
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(10), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let base = Duration::from_millis(1000);
        for _ in 0..1000 {
            let delay = apply_jitter(base, &mut rng);
            assert!(delay >= Duration::from_millis(750));
            assert!(delay <= Duration::from_millis(1250));
        }
        assert_eq!(apply_jitter(Duration::ZERO, &mut rng), Duration::ZERO);
    }
}
