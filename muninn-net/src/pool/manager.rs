use crate::config::ManagerConfig;
use crate::error::Result;
use crate::pool::{ConnectionPool, ConnectionState, PoolStats, PooledConnection};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Outcome of one health-check pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    pub checked: usize,
    pub closed: usize,
}

/// Pool statistics augmented with derived rates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManagerStats {
    pub pool: PoolStats,
    /// reuse / (reuse + miss)
    pub reuse_rate: f64,
    /// errors / (reuse + miss)
    pub error_rate: f64,
}

/// Owns a [`ConnectionPool`] and keeps it healthy with a recurring
/// inspection loop
pub struct ConnectionManager {
    pool: Arc<ConnectionPool>,
    config: ManagerConfig,
    health: StdMutex<Option<watch::Sender<bool>>>,
}

impl ConnectionManager {
    pub fn new(pool: Arc<ConnectionPool>, config: ManagerConfig) -> Self {
        Self { pool, config, health: StdMutex::new(None) }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Delegate to the pool
    pub async fn acquire(&self, host: &str, port: u16, tls: bool) -> Result<Arc<PooledConnection>> {
        self.pool.acquire(host, port, tls).await
    }

    pub async fn release(&self, conn: &Arc<PooledConnection>) {
        self.pool.release(conn).await;
    }

    /// Close every unhealthy connection, then sweep the pool
    ///
    /// A connection is unhealthy when it is closed or errored, its socket
    /// is no longer open, or it has sat idle past the configured limit.
    pub async fn health_check(&self) -> HealthReport {
        let connections = self.pool.connections().await;
        let max_healthy_idle = Duration::from_millis(self.config.max_healthy_idle_ms);
        let mut closed = 0;
        for conn in &connections {
            let state = conn.state();
            let unhealthy = matches!(state, ConnectionState::Closed | ConnectionState::Error)
                || !conn.is_transport_open()
                || (state == ConnectionState::Idle && conn.idle_for() > max_healthy_idle);
            if unhealthy && state != ConnectionState::InUse {
                debug!(id = conn.id(), origin = %conn.origin(), ?state, "closing unhealthy connection");
                conn.close_stream().await;
                closed += 1;
            }
        }
        // the sweep removes what was just closed
        self.pool.close_idle_connections().await;
        if closed > 0 {
            info!(checked = connections.len(), closed, "health check");
        }
        HealthReport { checked: connections.len(), closed }
    }

    pub async fn stats(&self) -> ManagerStats {
        let pool = self.pool.stats().await;
        let attempts = pool.reuse_count + pool.miss_count;
        let (reuse_rate, error_rate) = if attempts == 0 {
            (0.0, 0.0)
        } else {
            (
                pool.reuse_count as f64 / attempts as f64,
                pool.error_count as f64 / attempts as f64,
            )
        };
        ManagerStats { pool, reuse_rate, error_rate }
    }

    /// Start the recurring health loop; a second call is a no-op
    pub fn start_health_checks(self: &Arc<Self>) {
        let mut guard = match self.health.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            return;
        }
        let (tx, mut rx) = watch::channel(false);
        *guard = Some(tx);
        let manager = Arc::clone(self);
        let interval = Duration::from_millis(manager.config.health_check_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.health_check().await;
                    }
                    result = rx.changed() => {
                        if result.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    pub fn stop_health_checks(&self) {
        let mut guard = match self.health.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(tx) = guard.take() {
            let _ = tx.send(true);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop_health_checks();
    }
}
