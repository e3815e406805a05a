//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through and are counted
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: a limited number of probes test whether the backend recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: requests >= min_request_threshold
//!                AND failures / requests >= failure_rate_threshold
//! Open → Half-Open: open_timeout elapsed (evaluated on the next access)
//! Half-Open → Closed: max_half_open_probes consecutive probe successes
//! Half-Open → Open: any probe fails
//! ```
//!
//! # Design Decisions
//! - Per-service circuit breaker (not global)
//! - Every transition, and every expiry of the closed window, starts a new
//!   generation with zeroed counts; outcomes from an older generation are dropped
//! - No background timer: Open → Half-Open happens lazily under the lock
//! - One outcome per `execute` call, however many network attempts it made

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::resilience::retries::deadline_after;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request statistics for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }
}

/// Tuning for a single breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSettings {
    pub max_half_open_probes: u32,
    /// Zero keeps the closed-state counts until the next transition.
    pub closed_window: Duration,
    pub open_timeout: Duration,
    pub min_request_threshold: u32,
    pub failure_rate_threshold: f64,
}

impl BreakerSettings {
    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self {
            max_half_open_probes: config.max_half_open_probes.max(1),
            closed_window: Duration::from_secs(config.closed_window_secs),
            open_timeout: Duration::from_secs(config.open_timeout_secs),
            min_request_threshold: config.min_request_threshold,
            failure_rate_threshold: config.failure_rate_threshold,
        }
    }

    fn ready_to_trip(&self, counts: &Counts) -> bool {
        if counts.requests == 0 || counts.requests < self.min_request_threshold {
            return false;
        }
        f64::from(counts.total_failures) / f64::from(counts.requests)
            >= self.failure_rate_threshold
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::from_config(&CircuitBreakerConfig::default())
    }
}

/// Admission failures produced by the breaker itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BreakerRejection {
    #[error("circuit breaker is open")]
    Open,

    #[error("too many probe requests")]
    TooManyProbes,
}

/// Callback fired with `(service, from, to)` after every transition.
pub type StateObserver = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

type Transition = (CircuitState, CircuitState);

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub generation: u64,
    pub counts: Counts,
}

struct BreakerCore {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
}

impl BreakerCore {
    fn new(settings: &BreakerSettings, now: Instant) -> Self {
        let mut core = Self {
            state: CircuitState::Closed,
            generation: 0,
            counts: Counts::default(),
            expiry: None,
        };
        core.expiry = core.expiry_for(settings, now);
        core
    }

    fn expiry_for(&self, settings: &BreakerSettings, now: Instant) -> Option<Instant> {
        match self.state {
            CircuitState::Closed if settings.closed_window.is_zero() => None,
            CircuitState::Closed => Some(deadline_after(now, settings.closed_window)),
            CircuitState::Open => Some(deadline_after(now, settings.open_timeout)),
            CircuitState::HalfOpen => None,
        }
    }

    fn new_generation(&mut self, settings: &BreakerSettings, now: Instant) {
        self.generation += 1;
        self.counts = Counts::default();
        self.expiry = self.expiry_for(settings, now);
    }

    fn set_state(
        &mut self,
        to: CircuitState,
        settings: &BreakerSettings,
        now: Instant,
    ) -> Option<Transition> {
        if self.state == to {
            return None;
        }
        let from = self.state;
        self.state = to;
        self.new_generation(settings, now);
        Some((from, to))
    }

    /// Apply time-based changes: closed window expiry and Open → Half-Open.
    fn refresh(&mut self, settings: &BreakerSettings, now: Instant) -> Option<Transition> {
        let expired = self.expiry.is_some_and(|expiry| expiry <= now);
        match self.state {
            CircuitState::Closed if expired => {
                self.new_generation(settings, now);
                None
            }
            CircuitState::Open if expired => {
                self.set_state(CircuitState::HalfOpen, settings, now)
            }
            _ => None,
        }
    }
}

/// Failure-isolation gate for one backend service.
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    core: Mutex<BreakerCore>,
    observer: Option<StateObserver>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            core: Mutex::new(BreakerCore::new(&settings, Instant::now())),
            settings,
            observer: None,
        }
    }

    /// Attach a transition observer.
    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, applying any pending time-based transition.
    pub fn state(&self) -> CircuitState {
        self.snapshot().state
    }

    pub fn counts(&self) -> Counts {
        self.snapshot().counts
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let (snapshot, transition) = {
            let mut core = self.lock();
            let transition = core.refresh(&self.settings, Instant::now());
            let snapshot = BreakerSnapshot {
                name: self.name.clone(),
                state: core.state,
                generation: core.generation,
                counts: core.counts,
            };
            (snapshot, transition)
        };
        self.notify(transition);
        snapshot
    }

    /// Run `f` if the breaker admits the request.
    ///
    /// Admission failures are converted into `E`; the error returned by `f`
    /// is passed through untouched. A call whose future is dropped before
    /// completion is accounted as a failure.
    pub async fn execute<T, E, F, Fut>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<BreakerRejection>,
    {
        self.execute_if(|_: &E| true, f).await
    }

    /// Like [`execute`](Self::execute), but errors rejected by `is_failure`
    /// are recorded as successes.
    pub async fn execute_if<T, E, F, Fut, P>(&self, is_failure: P, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<BreakerRejection>,
        P: Fn(&E) -> bool,
    {
        let generation = self.before_request()?;
        let mut in_flight = InFlight {
            breaker: self,
            generation,
            settled: false,
        };

        let result = f().await;
        let success = match &result {
            Ok(_) => true,
            Err(e) => !is_failure(e),
        };
        in_flight.settle(success);
        result
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerCore> {
        self.core.lock().expect("circuit breaker mutex poisoned")
    }

    fn before_request(&self) -> Result<u64, BreakerRejection> {
        let (admission, transition) = {
            let mut core = self.lock();
            let transition = core.refresh(&self.settings, Instant::now());
            let admission = match core.state {
                CircuitState::Open => Err(BreakerRejection::Open),
                CircuitState::HalfOpen
                    if core.counts.requests >= self.settings.max_half_open_probes =>
                {
                    Err(BreakerRejection::TooManyProbes)
                }
                _ => {
                    core.counts.on_request();
                    Ok(core.generation)
                }
            };
            (admission, transition)
        };
        self.notify(transition);
        admission
    }

    fn after_request(&self, generation: u64, success: bool) {
        let transition = {
            let mut core = self.lock();
            let now = Instant::now();
            let refreshed = core.refresh(&self.settings, now);

            if refreshed.is_some() || core.generation != generation {
                // Started in an earlier generation; its outcome no longer counts.
                refreshed
            } else if success {
                core.counts.on_success();
                let closes = core.state == CircuitState::HalfOpen
                    && core.counts.consecutive_successes >= self.settings.max_half_open_probes;
                if closes {
                    core.set_state(CircuitState::Closed, &self.settings, now)
                } else {
                    None
                }
            } else {
                core.counts.on_failure();
                let opens = match core.state {
                    CircuitState::Closed => self.settings.ready_to_trip(&core.counts),
                    CircuitState::HalfOpen => true,
                    CircuitState::Open => false,
                };
                if opens {
                    core.set_state(CircuitState::Open, &self.settings, now)
                } else {
                    None
                }
            }
        };
        self.notify(transition);
    }

    fn notify(&self, transition: Option<Transition>) {
        let Some((from, to)) = transition else {
            return;
        };

        if to == CircuitState::Open {
            tracing::warn!(service = %self.name, from = %from, to = %to, "Circuit breaker opened");
        } else {
            tracing::info!(service = %self.name, from = %from, to = %to, "Circuit breaker state changed");
        }

        if let Some(observer) = &self.observer {
            observer(&self.name, from, to);
        }
    }
}

/// Settles an admitted call exactly once, even if its future is dropped.
struct InFlight<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl InFlight<'_> {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        self.breaker.after_request(self.generation, success);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.after_request(self.generation, false);
        }
    }
}

/// Lazily-populated map of service name to breaker.
pub struct CircuitBreakerRegistry {
    settings: BreakerSettings,
    observer: Option<StateObserver>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            observer: None,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Observer attached to every breaker created from now on.
    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Return the breaker for `service`, creating it on first use.
    pub fn get_or_create(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self
            .breakers
            .read()
            .expect("breaker registry lock poisoned")
            .get(service)
        {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write().expect("breaker registry lock poisoned");
        // Another task may have created it between the two locks.
        breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                let mut breaker = CircuitBreaker::new(service, self.settings.clone());
                if let Some(observer) = &self.observer {
                    breaker = breaker.with_observer(observer.clone());
                }
                Arc::new(breaker)
            })
            .clone()
    }

    /// Snapshots of every breaker, sorted by name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<_> = self
            .breakers
            .read()
            .expect("breaker registry lock poisoned")
            .values()
            .cloned()
            .collect();
        let mut snapshots: Vec<_> = breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq, Error)]
    enum CallError {
        #[error("backend failed")]
        Backend,
        #[error(transparent)]
        Rejected(#[from] BreakerRejection),
    }

    fn settings() -> BreakerSettings {
        BreakerSettings {
            max_half_open_probes: 2,
            closed_window: Duration::from_secs(60),
            open_timeout: Duration::from_secs(30),
            min_request_threshold: 5,
            failure_rate_threshold: 0.5,
        }
    }

    async fn fail(cb: &CircuitBreaker, calls: &AtomicU32) -> Result<(), CallError> {
        cb.execute(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CallError::Backend)
        })
        .await
    }

    async fn succeed(cb: &CircuitBreaker, calls: &AtomicU32) -> Result<(), CallError> {
        cb.execute(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
    }

    async fn trip(cb: &CircuitBreaker) {
        let calls = AtomicU32::new(0);
        for _ in 0..5 {
            let _ = fail(cb, &calls).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_on_failure_rate() {
        let cb = CircuitBreaker::new("orders", settings());
        let calls = AtomicU32::new(0);

        for _ in 0..4 {
            assert_eq!(fail(&cb, &calls).await, Err(CallError::Backend));
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        assert_eq!(fail(&cb, &calls).await, Err(CallError::Backend));
        assert_eq!(cb.state(), CircuitState::Open);

        assert_eq!(
            fail(&cb, &calls).await,
            Err(CallError::Rejected(BreakerRejection::Open))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_closed_below_rate() {
        let cb = CircuitBreaker::new("orders", settings());
        let calls = AtomicU32::new(0);

        for _ in 0..6 {
            succeed(&cb, &calls).await.unwrap();
        }
        for _ in 0..5 {
            let _ = fail(&cb, &calls).await;
        }
        // 5 failures out of 11 requests is below 50%.
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.counts().total_failures, 5);
        assert_eq!(cb.counts().consecutive_failures, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_window_resets_counts() {
        let cb = CircuitBreaker::new("orders", settings());
        let calls = AtomicU32::new(0);

        for _ in 0..4 {
            let _ = fail(&cb, &calls).await;
        }
        let generation = cb.snapshot().generation;

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cb.counts(), Counts::default());
        assert_eq!(cb.snapshot().generation, generation + 1);

        // The old failures are forgotten, so one more does not trip.
        let _ = fail(&cb, &calls).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_recovery() {
        let cb = CircuitBreaker::new("orders", settings());
        trip(&cb).await;

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let calls = AtomicU32::new(0);
        succeed(&cb, &calls).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        succeed(&cb, &calls).await.unwrap();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.counts(), Counts::default());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("orders", settings());
        trip(&cb).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        let calls = AtomicU32::new(0);
        succeed(&cb, &calls).await.unwrap();
        let _ = fail(&cb, &calls).await;
        assert_eq!(cb.state(), CircuitState::Open);

        // A fresh open timeout has started.
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_limit() {
        let cb = Arc::new(CircuitBreaker::new("orders", settings()));
        trip(&cb).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        let (release_tx, release_rx) = tokio::sync::watch::channel(false);
        let mut probes = Vec::new();
        for _ in 0..2 {
            let cb = cb.clone();
            let mut rx = release_rx.clone();
            probes.push(tokio::spawn(async move {
                cb.execute(|| async move {
                    let _ = rx.wait_for(|released| *released).await;
                    Ok::<_, CallError>(())
                })
                .await
            }));
        }
        tokio::task::yield_now().await;

        let calls = AtomicU32::new(0);
        assert_eq!(
            succeed(&cb, &calls).await,
            Err(CallError::Rejected(BreakerRejection::TooManyProbes))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        release_tx.send(true).unwrap();
        for probe in probes {
            probe.await.unwrap().unwrap();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_wins_over_concurrent_probe() {
        let cb = Arc::new(CircuitBreaker::new("orders", settings()));
        trip(&cb).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        let (release_tx, release_rx) = tokio::sync::watch::channel(false);
        let slow_probe = {
            let cb = cb.clone();
            let mut rx = release_rx.clone();
            tokio::spawn(async move {
                cb.execute(|| async move {
                    let _ = rx.wait_for(|released| *released).await;
                    Ok::<_, CallError>(())
                })
                .await
            })
        };
        tokio::task::yield_now().await;

        let calls = AtomicU32::new(0);
        let _ = fail(&cb, &calls).await;
        assert_eq!(cb.state(), CircuitState::Open);
        let reopened = cb.snapshot();

        release_tx.send(true).unwrap();
        slow_probe.await.unwrap().unwrap();

        // The late success belongs to the old generation and is discarded.
        let after = cb.snapshot();
        assert_eq!(after.state, CircuitState::Open);
        assert_eq!(after.generation, reopened.generation);
        assert_eq!(after.counts, Counts::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_is_ignored() {
        let cb = Arc::new(CircuitBreaker::new("orders", settings()));

        let (release_tx, release_rx) = tokio::sync::watch::channel(false);
        let slow = {
            let cb = cb.clone();
            let mut rx = release_rx.clone();
            tokio::spawn(async move {
                cb.execute(|| async move {
                    let _ = rx.wait_for(|released| *released).await;
                    Err::<(), _>(CallError::Backend)
                })
                .await
            })
        };
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(61)).await;
        let generation = cb.snapshot().generation;

        release_tx.send(true).unwrap();
        let _ = slow.await.unwrap();

        assert_eq!(cb.snapshot().generation, generation);
        assert_eq!(cb.counts(), Counts::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_call_counts_as_failure() {
        let cb = CircuitBreaker::new("orders", settings());

        let pending = cb.execute(|| std::future::pending::<Result<(), CallError>>());
        let _ = tokio::time::timeout(Duration::from_millis(10), pending).await;

        let counts = cb.counts();
        assert_eq!(counts.requests, 1);
        assert_eq!(counts.total_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_transitions() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb = CircuitBreaker::new("orders", settings()).with_observer(Arc::new(
            move |name: &str, from: CircuitState, to: CircuitState| {
                sink.lock().unwrap().push((name.to_string(), from, to));
            },
        ));

        trip(&cb).await;
        tokio::time::advance(Duration::from_secs(31)).await;
        let _ = cb.state();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                ("orders".to_string(), CircuitState::Closed, CircuitState::Open),
                ("orders".to_string(), CircuitState::Open, CircuitState::HalfOpen),
            ]
        );
    }

    #[test]
    fn test_registry_reuses_breakers() {
        let registry = CircuitBreakerRegistry::new(settings());
        let a = registry.get_or_create("orders");
        let b = registry.get_or_create("orders");
        let c = registry.get_or_create("billing");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        let names: Vec<_> = registry.snapshots().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["billing", "orders"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_windows_do_not_overflow() {
        let registry = CircuitBreakerRegistry::new(BreakerSettings {
            closed_window: Duration::from_secs(u64::MAX),
            open_timeout: Duration::from_secs(u64::MAX),
            min_request_threshold: 1,
            ..settings()
        });

        let orders = registry.get_or_create("orders");
        let calls = AtomicU32::new(0);
        let _ = fail(&orders, &calls).await;
        assert_eq!(orders.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(orders.state(), CircuitState::Open);

        // Other services are unaffected.
        let billing = registry.get_or_create("billing");
        succeed(&billing, &calls).await.unwrap();
        assert_eq!(registry.snapshots().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_excluded_errors_count_as_success() {
        let cb = CircuitBreaker::new("orders", settings());
        let calls = AtomicU32::new(0);

        for _ in 0..5 {
            let result: Result<(), CallError> = cb
                .execute_if(
                    |e| !matches!(e, CallError::Backend),
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(CallError::Backend)
                    },
                )
                .await;
            assert_eq!(result, Err(CallError::Backend));
        }

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.counts().total_successes, 5);
        assert_eq!(cb.counts().total_failures, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }
}
