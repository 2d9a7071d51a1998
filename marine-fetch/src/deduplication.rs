use crate::error::FetchError;
use crate::keys::RequestKey;
use crate::options::FetchOptions;
use crate::retry::{RetryEngine, RetryPolicy};
use crate::transport::{FetchRequest, RawResponse};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use getset::{CopyGetters, Getters};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Configuration for request deduplication
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeduplicationConfig {
    /// Window during which identical requests join the running one
    pub ttl_ms: u64,
    /// How long a successful outcome stays joinable, capped by `ttl_ms`
    pub success_grace_ms: u64,
    /// Age after which the sweep drops an entry whatever its state
    pub stale_after_ms: u64,
    /// Sweep period; `0` disables the background sweep
    pub sweep_interval_ms: u64,
    /// Whether deduplication is enabled
    pub enabled: bool,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 5_000,
            success_grace_ms: 1_000,
            stale_after_ms: 30_000,
            sweep_interval_ms: 10_000,
            enabled: true,
        }
    }
}

impl DeduplicationConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn success_grace(&self) -> Duration {
        Duration::from_millis(self.success_grace_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

/// The eventual outcome of one logical request, cloneable by every caller
/// that joins it.
pub type SharedOutcome = Shared<BoxFuture<'static, Result<Arc<RawResponse>, FetchError>>>;

/// A logical request currently registered with the deduplicator.
#[derive(Clone, Getters, CopyGetters)]
pub struct InFlightEntry {
    #[get = "pub"]
    key: RequestKey,
    id: u64,
    outcome: SharedOutcome,
    #[getset(get_copy = "pub")]
    started_at: Instant,
}

type Registry = Arc<DashMap<RequestKey, InFlightEntry>>;

/// Request deduplication system
///
/// When identical requests overlap, only the first one reaches the network;
/// every other caller awaits the same outcome, success or failure.
pub struct Deduplicator {
    in_flight: Registry,
    engine: RetryEngine,
    policy: RetryPolicy,
    config: DeduplicationConfig,
    next_id: AtomicU64,
    started: AtomicU64,
    joined: AtomicU64,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Deduplicator {
    /// Starts the background sweep when called inside a Tokio runtime.
    pub fn new(engine: RetryEngine, policy: RetryPolicy, config: DeduplicationConfig) -> Self {
        let deduplicator = Self {
            in_flight: Arc::new(DashMap::new()),
            engine,
            policy,
            config,
            next_id: AtomicU64::new(0),
            started: AtomicU64::new(0),
            joined: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        };
        deduplicator.spawn_sweeper();
        deduplicator
    }

    pub fn engine(&self) -> &RetryEngine {
        &self.engine
    }

    /// Default policy that per-call options are merged onto.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch and decode a JSON body, joining any identical request in flight.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: &FetchRequest,
        options: &FetchOptions,
    ) -> Result<T, FetchError> {
        self.fetch(request, options).await?.json()
    }

    /// Fetch a response, joining any identical request in flight.
    ///
    /// Joined callers receive the very same `Arc` as the caller that started
    /// the request.
    pub async fn fetch(
        &self,
        request: &FetchRequest,
        options: &FetchOptions,
    ) -> Result<Arc<RawResponse>, FetchError> {
        let policy = self.policy.with_overrides(options);
        if !options.enabled.unwrap_or(self.config.enabled) {
            return self.engine.fetch_with_retry(request, &policy).await.map(Arc::new);
        }

        let key = RequestKey::from_request(request)?;
        let ttl = options.ttl.unwrap_or_else(|| self.config.ttl());

        // Clean up stale requests first
        purge_stale(&self.in_flight, self.config.stale_after());

        let (outcome, is_new) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) if entry.get().started_at.elapsed() < ttl => {
                log::debug!("Request already pending for key: {}", key);
                self.joined.fetch_add(1, Ordering::Relaxed);
                (entry.get().outcome.clone(), false)
            }
            entry => {
                log::debug!("Executing new request for key: {}", key);
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let outcome = self.operation(key.clone(), id, request.clone(), policy, ttl);
                let in_flight = InFlightEntry {
                    key: key.clone(),
                    id,
                    outcome: outcome.clone(),
                    started_at: Instant::now(),
                };
                match entry {
                    Entry::Occupied(mut stale) => {
                        stale.insert(in_flight);
                    }
                    Entry::Vacant(vacant) => {
                        vacant.insert(in_flight);
                    }
                }
                self.started.fetch_add(1, Ordering::Relaxed);
                (outcome, true)
            }
        };

        if is_new {
            // Drive the operation to completion even if every caller goes away.
            tokio::spawn(outcome.clone());
        }
        outcome.await
    }

    fn operation(
        &self,
        key: RequestKey,
        id: u64,
        request: FetchRequest,
        policy: RetryPolicy,
        ttl: Duration,
    ) -> SharedOutcome {
        let engine = self.engine.clone();
        let registry = Arc::clone(&self.in_flight);
        let grace = ttl.min(self.config.success_grace());

        async move {
            let result = engine.fetch_with_retry(&request, &policy).await.map(Arc::new);
            match &result {
                Ok(_) => {
                    // Stragglers inside the grace window still join this result.
                    tokio::spawn(async move {
                        tokio::time::sleep(grace).await;
                        registry.remove_if(&key, |_, entry| entry.id == id);
                    });
                }
                Err(err) => {
                    log::debug!("Request failed for key {}: {}", key, err);
                    registry.remove_if(&key, |_, entry| entry.id == id);
                }
            }
            result
        }
        .boxed()
        .shared()
    }

    /// Starts the periodic stale-entry sweep. Returns `false` when there is
    /// no runtime to run it on or the sweep is disabled.
    pub fn spawn_sweeper(&self) -> bool {
        if self.config.sweep_interval_ms == 0 {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::debug!("No async runtime available, in-flight sweep disabled");
            return false;
        };

        let registry = Arc::downgrade(&self.in_flight);
        let period = Duration::from_millis(self.config.sweep_interval_ms);
        let stale_after = self.config.stale_after();
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                purge_stale(&registry, stale_after);
            }
        });

        if let Ok(mut slot) = self.sweeper.lock() {
            if let Some(previous) = slot.replace(task) {
                previous.abort();
            }
        }
        true
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|task| !task.is_finished()))
            .unwrap_or(false)
    }

    /// Stops the background sweep.
    pub fn shutdown(&self) {
        if let Ok(mut slot) = self.sweeper.lock() {
            if let Some(task) = slot.take() {
                task.abort();
                log::debug!("In-flight sweep stopped");
            }
        }
    }

    /// Get statistics about pending requests
    pub fn stats(&self) -> DeduplicationStats {
        DeduplicationStats {
            in_flight: self.in_flight.len(),
            started: self.started.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
        }
    }

    /// Forget every pending request; running operations still settle for
    /// the callers already waiting on them.
    pub fn clear(&self) {
        self.in_flight.clear();
        log::info!("Request deduplicator cleared");
    }
}

impl Drop for Deduplicator {
    fn drop(&mut self) {
        if let Ok(slot) = self.sweeper.get_mut() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

/// Drop every entry older than `stale_after`, settled or not.
fn purge_stale(registry: &DashMap<RequestKey, InFlightEntry>, stale_after: Duration) -> usize {
    let before = registry.len();
    registry.retain(|_, entry| entry.started_at.elapsed() <= stale_after);
    let purged = before.saturating_sub(registry.len());
    if purged > 0 {
        log::debug!("Purged {} stale in-flight requests", purged);
    }
    purged
}

/// Statistics for request deduplication
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeduplicationStats {
    /// Entries currently registered, including settled ones in their grace window
    pub in_flight: usize,
    /// Logical requests that reached the retry engine
    pub started: u64,
    /// Calls served by joining an existing request
    pub joined: u64,
}

/// Thread-safe wrapper for the deduplicator
pub type SharedDeduplicator = Arc<Deduplicator>;
