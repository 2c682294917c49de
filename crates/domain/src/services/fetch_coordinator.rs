//! Fetch coordination between filter state and the chart data cache.
//!
//! [`FetchCoordinator::request`] serves live cache entries directly, joins an
//! in-flight fetch for the same key when one exists, and otherwise starts a new
//! fetch on a spawned task. Every fetch carries a per-coordinator monotonic
//! sequence number; a result is only committed (cached and published to
//! subscribers) when no newer fetch for the same key has committed first.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache_key::CacheKey;
use super::clock::SharedClock;
use super::data_cache::DataCache;
use crate::models::{ChartKind, FilterFieldError, FilterState};

/// Remote data source for chart payloads.
#[async_trait]
pub trait ChartSource: Send + Sync {
    async fn fetch(&self, kind: ChartKind, filters: &FilterState) -> Result<Value, FetchError>;
}

/// Fetch failures. Never cached.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("Invalid filters: {}", join_errors(.0))]
    Validation(Vec<FilterFieldError>),

    #[error("Data source error: {0}")]
    Source(String),

    #[error("Fetch timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Fetch was cancelled")]
    Cancelled,
}

fn join_errors(errors: &[FilterFieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub fetch_timeout: std::time::Duration,
    pub default_ttl: Duration,
    pub ttl_overrides: HashMap<ChartKind, Duration>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: std::time::Duration::from_secs(30),
            default_ttl: Duration::minutes(5),
            ttl_overrides: HashMap::new(),
        }
    }
}

/// How a request treats the cache and in-flight fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Serve a live cache entry when present.
    #[default]
    Cached,
    /// Skip the cache but join an in-flight fetch for the key.
    Revalidate,
    /// Always start a new fetch; it supersedes any in-flight one.
    Force,
}

/// What a caller receives from [`FetchCoordinator::request`].
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub key: CacheKey,
    pub payload: Arc<Value>,
    pub cache_hit: bool,
    pub fetched_at: DateTime<Utc>,
}

/// A result that was committed for a key.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedResult {
    pub payload: Arc<Value>,
    pub fetched_at: DateTime<Utc>,
    pub sequence: u64,
}

type SettledReceiver = watch::Receiver<Option<Result<CommittedResult, FetchError>>>;
type SettledSender = watch::Sender<Option<Result<CommittedResult, FetchError>>>;

struct InFlight {
    sequence: u64,
    settled: SettledReceiver,
}

struct KeyState {
    in_flight: Option<InFlight>,
    committed_sequence: u64,
    /// Fetches with a sequence at or below this value are suppressed.
    cancelled_through: u64,
    outstanding: usize,
    committed: watch::Sender<Option<CommittedResult>>,
}

impl KeyState {
    fn new(initial: Option<CommittedResult>) -> Self {
        let (committed, _) = watch::channel(initial);
        Self {
            in_flight: None,
            committed_sequence: 0,
            cancelled_through: 0,
            outstanding: 0,
            committed,
        }
    }

    fn is_idle(&self) -> bool {
        self.outstanding == 0 && self.in_flight.is_none() && self.committed.receiver_count() == 0
    }
}

#[derive(Default)]
struct CoordinatorState {
    next_sequence: u64,
    keys: HashMap<CacheKey, KeyState>,
}

impl CoordinatorState {
    /// Drops keys with no fetch outstanding and no live subscriber.
    fn prune_idle(&mut self) -> usize {
        let before = self.keys.len();
        self.keys.retain(|_, entry| !entry.is_idle());
        before - self.keys.len()
    }
}

struct Inner {
    source: Arc<dyn ChartSource>,
    cache: Arc<DataCache>,
    clock: SharedClock,
    config: FetchConfig,
    state: Mutex<CoordinatorState>,
}

/// Decides between cache and source, deduplicating concurrent fetches.
#[derive(Clone)]
pub struct FetchCoordinator {
    inner: Arc<Inner>,
}

impl FetchCoordinator {
    pub fn new(
        source: Arc<dyn ChartSource>,
        cache: Arc<DataCache>,
        clock: SharedClock,
        config: FetchConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                cache,
                clock,
                config,
                state: Mutex::new(CoordinatorState::default()),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<DataCache> {
        &self.inner.cache
    }

    /// TTL applied to committed results of `kind`.
    pub fn ttl_for(&self, kind: ChartKind) -> Duration {
        self.inner
            .config
            .ttl_overrides
            .get(&kind)
            .copied()
            .unwrap_or(self.inner.config.default_ttl)
    }

    /// Number of queries with a fetch in flight or a live subscriber.
    pub fn tracked_queries(&self) -> usize {
        let mut state = self.lock_state();
        state.prune_idle();
        state.keys.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Requests chart data for `filters`.
    pub async fn request(
        &self,
        kind: ChartKind,
        filters: &FilterState,
        mode: FetchMode,
    ) -> Result<FetchOutcome, FetchError> {
        filters
            .validate_at(self.inner.clock.now())
            .map_err(FetchError::Validation)?;

        let key = CacheKey::derive(kind, filters);

        if mode == FetchMode::Cached {
            if let Some(hit) = self.inner.cache.get::<Value>(&key) {
                counter!("chart_requests_total", "kind" => kind.as_str(), "outcome" => "cache_hit")
                    .increment(1);
                return Ok(FetchOutcome {
                    key,
                    payload: Arc::new(hit.payload),
                    cache_hit: true,
                    fetched_at: hit.fetched_at,
                });
            }
        }

        let mut settled = self.join_or_start(kind, filters, &key, mode);
        let result = settled
            .wait_for(Option::is_some)
            .await
            .map(|value| (*value).clone())
            .map_err(|_| FetchError::Source("fetch task ended without a result".to_string()))?;

        match result {
            Some(Ok(committed)) => {
                counter!("chart_requests_total", "kind" => kind.as_str(), "outcome" => "fetched")
                    .increment(1);
                Ok(FetchOutcome {
                    key,
                    payload: committed.payload,
                    cache_hit: false,
                    fetched_at: committed.fetched_at,
                })
            }
            Some(Err(e)) => {
                counter!("chart_requests_total", "kind" => kind.as_str(), "outcome" => "error")
                    .increment(1);
                Err(e)
            }
            None => Err(FetchError::Source("fetch settled without a result".to_string())),
        }
    }

    fn join_or_start(
        &self,
        kind: ChartKind,
        filters: &FilterState,
        key: &CacheKey,
        mode: FetchMode,
    ) -> SettledReceiver {
        let mut state = self.lock_state();

        if mode != FetchMode::Force {
            if let Some(in_flight) = state.keys.get(key).and_then(|k| k.in_flight.as_ref()) {
                debug!(cache_key = %key, sequence = in_flight.sequence, "Joining in-flight fetch");
                counter!("chart_fetch_deduplicated_total", "kind" => kind.as_str()).increment(1);
                return in_flight.settled.clone();
            }
        }

        state.next_sequence += 1;
        let sequence = state.next_sequence;
        let (tx, rx) = watch::channel(None);
        let entry = state
            .keys
            .entry(key.clone())
            .or_insert_with(|| KeyState::new(None));
        entry.in_flight = Some(InFlight {
            sequence,
            settled: rx.clone(),
        });
        entry.outstanding += 1;
        drop(state);

        debug!(cache_key = %key, sequence = sequence, ?mode, "Starting chart fetch");

        let coordinator = self.clone();
        let filters = filters.clone();
        let key = key.clone();
        tokio::spawn(async move {
            coordinator.run_fetch(kind, filters, key, sequence, tx).await;
        });

        rx
    }

    async fn run_fetch(
        self,
        kind: ChartKind,
        filters: FilterState,
        key: CacheKey,
        sequence: u64,
        settled: SettledSender,
    ) {
        let timeout = self.inner.config.fetch_timeout;
        let started = Instant::now();

        let fetched = match tokio::time::timeout(timeout, self.inner.source.fetch(kind, &filters)).await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(timeout)),
        };

        histogram!("chart_fetch_duration_seconds", "kind" => kind.as_str())
            .record(started.elapsed().as_secs_f64());

        let result = self.settle(kind, &key, sequence, fetched);
        settled.send_replace(Some(result));
    }

    fn settle(
        &self,
        kind: ChartKind,
        key: &CacheKey,
        sequence: u64,
        fetched: Result<Value, FetchError>,
    ) -> Result<CommittedResult, FetchError> {
        let mut state = self.lock_state();
        let Some(entry) = state.keys.get_mut(key) else {
            return Err(FetchError::Cancelled);
        };

        entry.outstanding = entry.outstanding.saturating_sub(1);
        if entry
            .in_flight
            .as_ref()
            .is_some_and(|f| f.sequence == sequence)
        {
            entry.in_flight = None;
        }

        let result = match fetched {
            _ if sequence <= entry.cancelled_through => {
                debug!(cache_key = %key, sequence = sequence, "Suppressing cancelled fetch result");
                Err(FetchError::Cancelled)
            }
            Err(e) => {
                warn!(cache_key = %key, sequence = sequence, error = %e, "Chart fetch failed");
                counter!("chart_fetch_errors_total", "kind" => kind.as_str()).increment(1);
                Err(e)
            }
            Ok(_) if sequence < entry.committed_sequence => {
                debug!(
                    cache_key = %key,
                    sequence = sequence,
                    committed_sequence = entry.committed_sequence,
                    "Discarding stale fetch result"
                );
                counter!("chart_fetch_stale_total", "kind" => kind.as_str()).increment(1);
                entry.committed.borrow().clone().ok_or(FetchError::Cancelled)
            }
            Ok(payload) => {
                let committed = CommittedResult {
                    payload: Arc::new(payload),
                    fetched_at: self.inner.clock.now(),
                    sequence,
                };
                self.inner
                    .cache
                    .put(key, committed.payload.as_ref(), Some(self.ttl_for(kind)));
                entry.committed_sequence = sequence;
                entry.committed.send_replace(Some(committed.clone()));
                Ok(committed)
            }
        };

        if entry.is_idle() {
            state.keys.remove(key);
        }

        result
    }

    /// Suppresses the effect of every fetch issued so far for this query.
    ///
    /// Waiters on a cancelled fetch receive [`FetchError::Cancelled`]. The
    /// underlying source call is left to finish. Returns `false` when nothing
    /// was in flight.
    ///
    /// Keys are shared by every caller asking for the same query, so only a
    /// host that owns the query outright (a single viewer's dashboard) should
    /// cancel. The HTTP service never does.
    pub fn cancel(&self, kind: ChartKind, filters: &FilterState) -> bool {
        let key = CacheKey::derive(kind, filters);
        let mut state = self.lock_state();
        let latest = state.next_sequence;
        match state.keys.get_mut(&key) {
            Some(entry) if entry.outstanding > 0 => {
                entry.cancelled_through = latest;
                entry.in_flight = None;
                info!(cache_key = %key, "Cancelled in-flight chart fetch");
                true
            }
            _ => false,
        }
    }

    /// Watches committed results for one query.
    ///
    /// The initial value is the live cache entry, if any.
    pub fn subscribe(
        &self,
        kind: ChartKind,
        filters: &FilterState,
    ) -> watch::Receiver<Option<CommittedResult>> {
        let key = CacheKey::derive(kind, filters);
        let mut state = self.lock_state();
        if let Some(entry) = state.keys.get(&key) {
            return entry.committed.subscribe();
        }
        state.prune_idle();

        let initial = self
            .inner
            .cache
            .get::<Value>(&key)
            .map(|hit| CommittedResult {
                payload: Arc::new(hit.payload),
                fetched_at: hit.fetched_at,
                sequence: 0,
            });
        let entry = KeyState::new(initial);
        let rx = entry.committed.subscribe();
        state.keys.insert(key, entry);
        rx
    }

    /// Re-requests a query on a fixed interval, bypassing the cache.
    ///
    /// The first refresh happens one `every` after the call. The loop stops
    /// when the returned handle is cancelled or dropped. Intended for hosts
    /// that keep a dashboard open; the HTTP service refreshes on demand.
    pub fn start_auto_refresh(
        &self,
        kind: ChartKind,
        filters: FilterState,
        every: std::time::Duration,
    ) -> AutoRefreshHandle {
        let token = CancellationToken::new();
        let stop = token.clone();
        let coordinator = self.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            info!(chart = %kind, interval_ms = every.as_millis() as u64, "Auto-refresh started");

            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    result = coordinator.request(kind, &filters, FetchMode::Revalidate) => {
                        if let Err(e) = result {
                            warn!(chart = %kind, error = %e, "Auto-refresh fetch failed");
                        }
                    }
                }
            }

            info!(chart = %kind, "Auto-refresh stopped");
        });

        AutoRefreshHandle { token, task }
    }
}

/// Handle to an auto-refresh loop. Dropping it stops the loop.
pub struct AutoRefreshHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl AutoRefreshHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels the loop and waits for it to exit.
    pub async fn shutdown(&mut self) {
        self.token.cancel();
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "Auto-refresh task ended abnormally");
        }
    }
}

impl Drop for AutoRefreshHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
