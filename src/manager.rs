//! Pool manager (C8, spec §4.8).
//!
//! Indexes one [`ConnectionPool`] per `(language, host, port)`, lazily
//! constructing pools on first acquire, aggregating their metrics, and
//! draining all of them concurrently on shutdown. Mirrors the way the
//! teacher's `global_connection.rs` holds one process-wide connection
//! behind a lock and exposes `with_connection`-style accessors, scaled up
//! from "one connection" to "one pool per endpoint".

use crate::config::{Endpoint, PoolConfig, ServerLanguage, SessionConfig};
use crate::credentials::CredentialStore;
use crate::error::BlackholioError;
use crate::pool::{ConnectionPool, PooledSession};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn pool_key(language: ServerLanguage, host: &str, port: u16) -> String {
    format!("{}:{}:{}", language.as_str(), host, port)
}

fn pool_config_json(config: &PoolConfig) -> Value {
    json!({
        "min_conns": config.min_conns,
        "max_conns": config.max_conns,
        "max_idle_secs": config.max_idle.as_secs_f64(),
        "health_check_interval_secs": config.health_check_interval.as_secs_f64(),
        "conn_timeout_secs": config.conn_timeout.as_secs_f64(),
        "request_timeout_secs": config.request_timeout.as_secs_f64(),
        "retries": config.retries,
        "backoff_factor": config.backoff_factor,
        "max_delay_secs": config.max_delay.as_secs_f64(),
        "breaker_threshold": config.breaker_threshold,
        "breaker_timeout_secs": config.breaker_timeout.as_secs_f64(),
        "health_checks_on": config.health_checks_on,
        "metrics_on": config.metrics_on,
    })
}

/// Indexes pools by `(language, host, port)`, the key spec §4.8 names.
pub struct PoolManager {
    session_config: SessionConfig,
    pool_config: PoolConfig,
    credentials: Arc<Mutex<CredentialStore>>,
    pools: Mutex<HashMap<String, Arc<ConnectionPool>>>,
}

impl PoolManager {
    pub fn new(session_config: SessionConfig, pool_config: PoolConfig, credentials: CredentialStore) -> Self {
        PoolManager {
            session_config,
            pool_config,
            credentials: Arc::new(Mutex::new(credentials)),
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Lazily constructs and initializes the pool for `endpoint` if one
    /// does not already exist, then returns it.
    async fn pool_for(&self, endpoint: &Endpoint) -> Result<Arc<ConnectionPool>, BlackholioError> {
        let key = pool_key(endpoint.language, &endpoint.host, endpoint.port);

        let existing = self.pools.lock().expect("pool manager mutex poisoned").get(&key).cloned();
        if let Some(pool) = existing {
            return Ok(pool);
        }

        let pool = ConnectionPool::new(endpoint.clone(), self.session_config.clone(), self.pool_config.clone(), Arc::clone(&self.credentials))?;
        pool.initialize().await?;

        let mut pools = self.pools.lock().expect("pool manager mutex poisoned");
        // Another caller may have raced us to construction; keep whichever
        // pool won the insert and let the loser's background tasks be
        // dropped by falling out of scope undrained (no sessions were
        // handed out from it, so there is nothing to drain).
        let pool = pools.entry(key).or_insert(pool).clone();
        Ok(pool)
    }

    /// Acquires a session for `endpoint`, constructing its pool on demand.
    pub async fn get_session(&self, endpoint: &Endpoint, timeout: Duration) -> Result<PooledSession, BlackholioError> {
        endpoint.validate()?;
        let pool = self.pool_for(endpoint).await?;
        pool.acquire(timeout).await
    }

    pub async fn release(&self, endpoint: &Endpoint, pooled: PooledSession, mark_error: bool) {
        let key = pool_key(endpoint.language, &endpoint.host, endpoint.port);
        let pool = self.pools.lock().expect("pool manager mutex poisoned").get(&key).cloned();
        if let Some(pool) = pool {
            pool.release(pooled, mark_error).await;
        }
    }

    /// Aggregated metrics across every pool this manager has constructed
    /// (spec §4.8: `{ total_pools, per-pool stats, aggregate counters,
    /// aggregate success_rate }`).
    pub async fn metrics(&self) -> Value {
        let pools: Vec<(String, Arc<ConnectionPool>)> = self
            .pools
            .lock()
            .expect("pool manager mutex poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();

        let mut per_pool = serde_json::Map::new();
        let mut total_requests = 0u64;
        let mut successful_requests = 0u64;
        let mut failed_requests = 0u64;
        let mut healthy_pools = 0usize;

        for (key, pool) in &pools {
            let m = pool.metrics().await;
            total_requests += m.total_requests;
            successful_requests += m.successful_requests;
            failed_requests += m.failed_requests;
            if m.health_status == crate::pool::HealthStatus::Healthy {
                healthy_pools += 1;
            }
            per_pool.insert(
                key.clone(),
                json!({
                    "state": m.state.as_str(),
                    "total_sessions": m.total_connections,
                    "active": m.active_connections,
                    "idle": m.idle_connections,
                    "failed": m.failed_connections,
                    "total_requests": m.total_requests,
                    "successful": m.successful_requests,
                    "failed_requests": m.failed_requests,
                    "success_rate": m.success_rate(),
                    "health_status": m.health_status.as_str(),
                    "last_health_check": m.last_health_check,
                    "breaker_state": m.breaker_state.as_str(),
                    "breaker_failures": m.breaker_failures,
                    "config": pool_config_json(&m.config),
                }),
            );
        }

        let success_rate = if total_requests == 0 { 0.0 } else { successful_requests as f64 / total_requests as f64 };
        // Same classification spec §4.6 applies per-pool, rolled up across
        // pools: no pools is unhealthy, fewer than half healthy is
        // degraded, otherwise healthy.
        let health_status = crate::pool::HealthStatus::classify(pools.len(), healthy_pools);

        json!({
            "total_pools": pools.len(),
            "healthy_pools": healthy_pools,
            "health_status": health_status.as_str(),
            "pools": per_pool,
            "total_requests": total_requests,
            "successful_requests": successful_requests,
            "failed_requests": failed_requests,
            "success_rate": success_rate,
        })
    }

    /// Drains every pool concurrently and waits for all of them to finish
    /// (spec §4.8: "orderly global shutdown").
    pub async fn shutdown(&self) {
        let pools: Vec<Arc<ConnectionPool>> = self.pools.lock().expect("pool manager mutex poisoned").drain().map(|(_, v)| v).collect();
        let shutdowns = pools.iter().map(|p| p.shutdown());
        futures::future::join_all(shutdowns).await;
    }

    /// Number of pools constructed so far, for tests and diagnostics.
    pub fn pool_count(&self) -> usize {
        self.pools.lock().expect("pool manager mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_key_is_language_host_port() {
        assert_eq!(pool_key(ServerLanguage::Rust, "localhost", 3000), "rust:localhost:3000");
        assert_eq!(pool_key(ServerLanguage::Go, "example.com", 8080), "go:example.com:8080");
    }

    #[tokio::test]
    async fn fresh_manager_has_no_pools() {
        let dir = std::env::temp_dir().join(format!("blackholio-manager-test-{}", std::process::id()));
        let path = dir.join("credentials.json");
        let store = CredentialStore::open(&path).unwrap();
        let manager = PoolManager::new(SessionConfig::default(), PoolConfig::default(), store);
        assert_eq!(manager.pool_count(), 0);
        let metrics = manager.metrics().await;
        assert_eq!(metrics["total_pools"], 0);
        assert_eq!(metrics["success_rate"], 0.0);
        assert_eq!(metrics["health_status"], "unhealthy");
        std::fs::remove_dir_all(&dir).ok();
    }
}
