//! Connection pool (C6, spec §4.6).
//!
//! Bounds the number of concurrently open [`Session`]s per endpoint, hands
//! out idle ones FIFO, creates new ones up to `max_conns`, and runs two
//! background loops -- health checks and idle eviction -- the way
//! `original_source`'s `ConnectionPool` runs `_health_check_loop`/
//! `_cleanup_loop` as separate `asyncio.Task`s. A [`CircuitBreaker`] gates
//! every acquire so a downed server fails fast instead of queuing callers
//! behind a wall of individually-timing-out dials.

use crate::breaker::{BreakerState, CallPermission, CircuitBreaker};
use crate::config::{Endpoint, PoolConfig, SessionConfig};
use crate::credentials::CredentialStore;
use crate::error::BlackholioError;
use crate::session::Session;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Inactive,
    Active,
    Draining,
    Shutdown,
}

impl PoolState {
    pub fn as_str(self) -> &'static str {
        match self {
            PoolState::Inactive => "inactive",
            PoolState::Active => "active",
            PoolState::Draining => "draining",
            PoolState::Shutdown => "shutdown",
        }
    }
}

impl Default for PoolState {
    fn default() -> Self {
        PoolState::Inactive
    }
}

/// Aggregate health classification spec §4.6 derives from the pool's
/// healthy-session ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    /// Spec §4.6: "unhealthy" if the pool is empty, "degraded" if fewer
    /// than half of its sessions are healthy, else "healthy".
    pub(crate) fn classify(size: usize, healthy: usize) -> Self {
        if size == 0 {
            HealthStatus::Unhealthy
        } else if (healthy as f64) < (size as f64) * 0.5 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        HealthStatus::Unhealthy
    }
}

fn now_unix_seconds() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// A pooled session, identified by a monotonic id stable across `VecDeque`
/// index shifts caused by concurrent removals (health reaping, idle
/// eviction) -- unlike a positional index, which a removal earlier in the
/// deque would silently invalidate.
struct Slot {
    id: u64,
    session: Arc<Session>,
    created_at: Instant,
    last_used: Instant,
    in_use: bool,
    use_count: u64,
    error_count: u64,
}

impl Slot {
    fn idle_time(&self) -> Duration {
        if self.in_use {
            Duration::ZERO
        } else {
            self.last_used.elapsed()
        }
    }
}

/// Point-in-time pool metrics snapshot (spec §6, `get_metrics`).
#[derive(Debug, Clone, Default)]
pub struct PoolMetrics {
    pub state: PoolState,
    pub total_connections: usize,
    pub active_connections: usize,
    pub idle_connections: usize,
    pub failed_connections: u64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub health_status: HealthStatus,
    pub last_health_check: Option<f64>,
    pub breaker_state: BreakerState,
    pub breaker_failures: u32,
    pub config: PoolConfig,
}

impl PoolMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}

struct PoolInner {
    state: PoolState,
    slots: VecDeque<Slot>,
    failed_connections: u64,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
}

/// A bounded set of [`Session`]s to one endpoint, acquired/released around
/// a unit of work the way a DB connection pool is.
pub struct ConnectionPool {
    endpoint: Endpoint,
    session_config: SessionConfig,
    config: PoolConfig,
    credentials: Arc<Mutex<CredentialStore>>,
    inner: AsyncMutex<PoolInner>,
    notify: Notify,
    breaker: CircuitBreaker,
    health_handle: Mutex<Option<JoinHandle<()>>>,
    cleanup_handle: Mutex<Option<JoinHandle<()>>>,
    creation_lock: AsyncMutex<()>,
    generation: AtomicU64,
    next_slot_id: AtomicU64,
    last_health_check: Mutex<Option<f64>>,
}

/// An acquired session, returned to the pool on drop's async counterpart:
/// callers must explicitly call [`ConnectionPool::release`] since Rust has
/// no async `Drop` -- spec §4.6 models this as "checkout/checkin", not RAII.
pub struct PooledSession {
    pub session: Arc<Session>,
    slot_id: u64,
    generation: u64,
}

impl ConnectionPool {
    pub fn new(endpoint: Endpoint, session_config: SessionConfig, config: PoolConfig, credentials: Arc<Mutex<CredentialStore>>) -> Result<Arc<Self>, BlackholioError> {
        config.validate()?;
        let breaker = CircuitBreaker::new(config.breaker_threshold, config.breaker_timeout);
        Ok(Arc::new(ConnectionPool {
            endpoint,
            session_config,
            config,
            credentials,
            inner: AsyncMutex::new(PoolInner {
                state: PoolState::Inactive,
                slots: VecDeque::new(),
                failed_connections: 0,
                total_requests: 0,
                successful_requests: 0,
                failed_requests: 0,
            }),
            notify: Notify::new(),
            breaker,
            health_handle: Mutex::new(None),
            cleanup_handle: Mutex::new(None),
            creation_lock: AsyncMutex::new(()),
            generation: AtomicU64::new(0),
            next_slot_id: AtomicU64::new(0),
            last_health_check: Mutex::new(None),
        }))
    }

    /// Opens `min_conns` sessions and starts the health-check/cleanup
    /// background loops (spec §4.6: "initialize brings the pool to its
    /// configured floor before accepting callers").
    pub async fn initialize(self: &Arc<Self>) -> Result<(), BlackholioError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.state != PoolState::Inactive {
                return Ok(());
            }
            inner.state = PoolState::Active;
        }

        for _ in 0..self.config.min_conns {
            self.create_session().await?;
        }

        if self.config.health_checks_on {
            let pool = Arc::clone(self);
            *self.health_handle.lock().expect("pool mutex poisoned") = Some(tokio::spawn(async move {
                pool.health_check_loop().await;
            }));
        }

        let pool = Arc::clone(self);
        *self.cleanup_handle.lock().expect("pool mutex poisoned") = Some(tokio::spawn(async move {
            pool.cleanup_loop().await;
        }));

        Ok(())
    }

    async fn create_session(&self) -> Result<(), BlackholioError> {
        let (session, _events) = Session::connect(self.endpoint.clone(), self.session_config.clone(), Arc::clone(&self.credentials)).await?;
        let id = self.next_slot_id.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().await;
        inner.slots.push_back(Slot {
            id,
            session,
            created_at: Instant::now(),
            last_used: Instant::now(),
            in_use: false,
            use_count: 0,
            error_count: 0,
        });
        Ok(())
    }

    /// Hands out an idle, healthy session, creating a new one under
    /// `max_conns` or waiting for one to free up otherwise (spec §8,
    /// invariant "pool bounds": never more than `max_conns` sessions open
    /// at once, callers block/timeout rather than overshoot).
    pub async fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<PooledSession, BlackholioError> {
        match self.breaker.try_acquire() {
            CallPermission::Rejected => return Err(BlackholioError::server_unavailable("circuit breaker is open")),
            CallPermission::Allowed | CallPermission::Probe => {}
        }

        let deadline = Instant::now() + timeout;
        let result = self.acquire_inner(deadline).await;
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(_) => self.breaker.record_failure(),
        }
        result
    }

    async fn acquire_inner(&self, deadline: Instant) -> Result<PooledSession, BlackholioError> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if inner.state != PoolState::Active && inner.state != PoolState::Draining {
                    return Err(BlackholioError::connection_lost("connection pool is not active"));
                }

                for slot in inner.slots.iter_mut() {
                    if !slot.in_use && slot.session.is_websocket_open() {
                        slot.in_use = true;
                        slot.use_count += 1;
                        slot.last_used = Instant::now();
                        let generation = self.generation.load(Ordering::Relaxed);
                        return Ok(PooledSession {
                            session: Arc::clone(&slot.session),
                            slot_id: slot.id,
                            generation,
                        });
                    }
                }
            }

            // Creation is serialized through `creation_lock` and the
            // capacity check is redone after acquiring it, under `inner`,
            // rather than before dropping `inner` -- otherwise two
            // concurrent acquirers can both observe spare capacity and
            // both create, overshooting `max_conns`.
            {
                let _serialize_creation = self.creation_lock.lock().await;
                let at_capacity = {
                    let inner = self.inner.lock().await;
                    inner.slots.len() >= self.config.max_conns
                };
                if !at_capacity {
                    self.create_session().await?;
                    continue;
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(BlackholioError::timeout("pool_acquire", self.config.conn_timeout));
            }
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
        }
    }

    /// Returns a session to the idle set, or drops it from the pool if
    /// `mark_error` reports it unusable. Looked up by the slot's stable
    /// id rather than a positional index, since a concurrent health/idle
    /// reap may have removed an earlier slot and shifted everything after
    /// it.
    pub async fn release(&self, pooled: PooledSession, mark_error: bool) {
        let mut inner = self.inner.lock().await;
        if pooled.generation != self.generation.load(Ordering::Relaxed) {
            return;
        }
        if let Some(slot) = inner.slots.iter_mut().find(|s| s.id == pooled.slot_id) {
            slot.in_use = false;
            slot.last_used = Instant::now();
            if mark_error {
                slot.error_count += 1;
            }
        }
        drop(inner);
        self.notify.notify_one();
    }

    async fn health_check_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.health_check_interval).await;
            if self.is_shutdown().await {
                break;
            }
            self.perform_health_checks().await;
        }
    }

    /// Reaps dead idle sessions, then refills up to `min_conns` (spec
    /// §4.6: "After reaping, refill up to `min_conns`.").
    async fn perform_health_checks(&self) {
        *self.last_health_check.lock().expect("pool mutex poisoned") = Some(now_unix_seconds());

        {
            let mut inner = self.inner.lock().await;
            let dead: Vec<usize> = inner
                .slots
                .iter()
                .enumerate()
                .filter(|(_, s)| !s.in_use && !s.session.is_websocket_open())
                .map(|(i, _)| i)
                .collect();
            for idx in dead.into_iter().rev() {
                if let Some(slot) = inner.slots.remove(idx) {
                    inner.failed_connections += 1;
                    tokio::spawn(async move {
                        slot.session.disconnect().await;
                    });
                }
            }
        }

        loop {
            let deficit = {
                let inner = self.inner.lock().await;
                if inner.state != PoolState::Active {
                    return;
                }
                self.config.min_conns.saturating_sub(inner.slots.len())
            };
            if deficit == 0 {
                break;
            }
            if self.create_session().await.is_err() {
                break;
            }
        }
    }

    async fn cleanup_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            if self.is_shutdown().await {
                break;
            }
            self.cleanup_idle().await;
        }
    }

    /// Evicts idle sessions past `max_idle`, never below `min_conns`
    /// (spec §4.6, §8 invariant "pool bounds").
    async fn cleanup_idle(&self) {
        let mut inner = self.inner.lock().await;
        let floor = self.config.min_conns;
        let mut removable: Vec<usize> = inner
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.in_use && s.idle_time() > self.config.max_idle)
            .map(|(i, _)| i)
            .collect();

        let allowance = inner.slots.len().saturating_sub(floor);
        removable.truncate(allowance);

        for idx in removable.into_iter().rev() {
            if let Some(slot) = inner.slots.remove(idx) {
                tokio::spawn(async move {
                    slot.session.disconnect().await;
                });
            }
        }
    }

    async fn is_shutdown(&self) -> bool {
        matches!(self.inner.lock().await.state, PoolState::Shutdown)
    }

    /// Full metrics snapshot per spec §6: pool composition, request
    /// counters, aggregate health classification, and the breaker/config
    /// state a caller needs to reason about the pool without poking at
    /// its internals.
    pub async fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.lock().await;
        let idle = inner.slots.iter().filter(|s| !s.in_use).count();
        let healthy = inner.slots.iter().filter(|s| s.session.is_websocket_open()).count();
        let health_status = HealthStatus::classify(inner.slots.len(), healthy);
        PoolMetrics {
            state: inner.state,
            total_connections: inner.slots.len(),
            active_connections: inner.slots.len() - idle,
            idle_connections: idle,
            failed_connections: inner.failed_connections,
            total_requests: inner.total_requests,
            successful_requests: inner.successful_requests,
            failed_requests: inner.failed_requests,
            health_status,
            last_health_check: *self.last_health_check.lock().expect("pool mutex poisoned"),
            breaker_state: self.breaker.state(),
            breaker_failures: self.breaker.failure_count(),
            config: self.config.clone(),
        }
    }

    pub fn record_request(&self, success: bool) {
        if let Ok(mut inner) = self.inner.try_lock() {
            inner.total_requests += 1;
            if success {
                inner.successful_requests += 1;
            } else {
                inner.failed_requests += 1;
            }
        }
    }

    /// Cancels the background loops, disconnects every session, and
    /// marks the pool unusable. Draining first so in-flight `acquire`
    /// calls fail cleanly rather than racing the teardown.
    pub async fn shutdown(&self) {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == PoolState::Shutdown {
                return;
            }
            inner.state = PoolState::Draining;
        }

        if let Some(handle) = self.health_handle.lock().expect("pool mutex poisoned").take() {
            handle.abort();
        }
        if let Some(handle) = self.cleanup_handle.lock().expect("pool mutex poisoned").take() {
            handle.abort();
        }

        let mut inner = self.inner.lock().await;
        for slot in inner.slots.drain(..) {
            slot.session.disconnect().await;
        }
        inner.state = PoolState::Shutdown;
        self.generation.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    #[test]
    fn metrics_success_rate_handles_zero_requests() {
        let metrics = PoolMetrics::default();
        assert_eq!(metrics.success_rate(), 0.0);
    }

    #[test]
    fn metrics_success_rate_computes_ratio() {
        let metrics = PoolMetrics {
            total_requests: 4,
            successful_requests: 3,
            ..Default::default()
        };
        assert_eq!(metrics.success_rate(), 0.75);
    }

    #[test]
    fn pool_config_validate_rejects_inverted_bounds() {
        let mut cfg = PoolConfig::default();
        cfg.min_conns = 5;
        cfg.max_conns = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn health_status_classification_matches_spec_thresholds() {
        assert_eq!(HealthStatus::classify(0, 0), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::classify(4, 1), HealthStatus::Degraded);
        assert_eq!(HealthStatus::classify(4, 2), HealthStatus::Healthy);
        assert_eq!(HealthStatus::classify(4, 4), HealthStatus::Healthy);
    }

    #[test]
    fn pool_state_and_breaker_state_expose_stable_json_tags() {
        assert_eq!(PoolState::Active.as_str(), "active");
        assert_eq!(BreakerState::Open.as_str(), "open");
    }
}
