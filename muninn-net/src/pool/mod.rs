pub mod manager;

pub use manager::{ConnectionManager, HealthReport, ManagerStats};

use crate::config::{DnsConfig, PoolConfig, TcpConfig, TlsConfig};
use crate::dns::{DnsCache, DnsResolver, RecordType};
use crate::error::{NetError, Result};
use crate::socket::{AddressFamily, Socket, SocketState, Transport};
use crate::tls::TlsConnection;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(10);
// exponential moving average weight for acquire wait times
const WAIT_EMA_ALPHA: f64 = 0.1;

enum AcquireStep {
    Reused(Arc<PooledConnection>),
    Dial,
    Wait,
}

/// Partition key of the pool: scheme, host and port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Origin {
    pub fn new(host: &str, port: u16, tls: bool) -> Self {
        Self { host: host.to_string(), port, tls }
    }

    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "https" } else { "http" };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}

/// Lifecycle of a pooled connection; only `Idle ↔ InUse` is user-driven
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    InUse,
    Closing,
    Closed,
    Error,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Idle => 0,
            ConnectionState::InUse => 1,
            ConnectionState::Closing => 2,
            ConnectionState::Closed => 3,
            ConnectionState::Error => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Idle,
            1 => ConnectionState::InUse,
            2 => ConnectionState::Closing,
            3 => ConnectionState::Closed,
            _ => ConnectionState::Error,
        }
    }
}

/// The transport under a pooled connection: a bare socket or a TLS session
pub enum ConnectionStream {
    Plain(Socket),
    Tls(TlsConnection),
}

impl ConnectionStream {
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            ConnectionStream::Plain(socket) => socket.read(buf).await,
            ConnectionStream::Tls(connection) => connection.read(buf).await,
        }
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        match self {
            ConnectionStream::Plain(socket) => socket.write(data).await,
            ConnectionStream::Tls(connection) => connection.write(data).await,
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        match self {
            ConnectionStream::Plain(socket) => socket.close().await,
            ConnectionStream::Tls(connection) => connection.close().await,
        }
    }

    pub fn socket(&self) -> &Socket {
        match self {
            ConnectionStream::Plain(socket) => socket,
            ConnectionStream::Tls(connection) => connection.socket(),
        }
    }
}

/// One pooled connection; the pool owns it, callers borrow it through an
/// `Arc` between `acquire` and `release`
pub struct PooledConnection {
    id: u64,
    origin: Origin,
    stream: Mutex<ConnectionStream>,
    state: AtomicU8,
    created_at: Instant,
    last_used_at: StdMutex<Instant>,
    use_count: AtomicU64,
}

impl PooledConnection {
    fn new(id: u64, origin: Origin, stream: ConnectionStream) -> Self {
        Self {
            id,
            origin,
            stream: Mutex::new(stream),
            state: AtomicU8::new(ConnectionState::InUse.as_u8()),
            created_at: Instant::now(),
            last_used_at: StdMutex::new(Instant::now()),
            use_count: AtomicU64::new(1),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn use_count(&self) -> u64 {
        self.use_count.load(Ordering::Relaxed)
    }

    /// Time since the connection was last touched
    pub fn idle_for(&self) -> Duration {
        let last = match self.last_used_at.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        last.elapsed()
    }

    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.stream.lock().await.read(buf).await
    }

    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        self.stream.lock().await.write(data).await
    }

    /// Whether the underlying socket still reports `Open`; a stream held
    /// by a caller counts as healthy
    pub fn is_transport_open(&self) -> bool {
        match self.stream.try_lock() {
            Ok(stream) => stream.socket().state() == SocketState::Open,
            Err(_) => true,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn touch(&self) {
        let mut last = match self.last_used_at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *last = Instant::now();
    }

    async fn close_stream(&self) {
        self.set_state(ConnectionState::Closing);
        if let Err(e) = self.stream.lock().await.close().await {
            debug!(id = self.id, error = %e, "error while closing pooled connection");
        }
        self.set_state(ConnectionState::Closed);
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("state", &self.state())
            .field("use_count", &self.use_count())
            .finish()
    }
}

/// Pool statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolStats {
    pub total_connections: u64,
    pub active_connections: usize,
    pub idle_connections: usize,
    pub reuse_count: u64,
    pub miss_count: u64,
    pub error_count: u64,
    pub average_wait_ms: f64,
    pub last_updated_ms: i64,
}

#[derive(Default)]
struct PoolInner {
    buckets: HashMap<String, Vec<Arc<PooledConnection>>>,
    /// dials in flight per origin, counted against the cap
    pending: HashMap<String, usize>,
    total_connections: u64,
    reuse_count: u64,
    miss_count: u64,
    error_count: u64,
    average_wait_ms: f64,
}

/// Per-origin connection pool with idle reuse, capacity waits and
/// stale eviction
pub struct ConnectionPool {
    config: PoolConfig,
    tcp_config: TcpConfig,
    tls_config: TlsConfig,
    resolver: DnsResolver,
    dns_cache: DnsCache,
    inner: Mutex<PoolInner>,
    next_id: AtomicU64,
    maintenance: StdMutex<Option<watch::Sender<bool>>>,
}

impl ConnectionPool {
    pub fn new(
        config: PoolConfig,
        tcp_config: TcpConfig,
        tls_config: TlsConfig,
        dns_config: DnsConfig,
    ) -> Self {
        Self {
            config,
            tcp_config,
            tls_config,
            resolver: DnsResolver::new(dns_config),
            dns_cache: DnsCache::default(),
            inner: Mutex::new(PoolInner::default()),
            next_id: AtomicU64::new(1),
            maintenance: StdMutex::new(None),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Check out a connection for `(host, port, tls)`
    ///
    /// Reuses a fresh idle connection when one exists; waits at the
    /// per-origin cap; otherwise dials a new transport. Waiting is
    /// unbounded, callers add their own timeout if they need one.
    pub async fn acquire(&self, host: &str, port: u16, tls: bool) -> Result<Arc<PooledConnection>> {
        let origin = Origin::new(host, port, tls);
        let key = origin.key();
        let wait_start = Instant::now();
        let mut waited = false;
        let mut counted_miss = false;

        loop {
            let mut stale = Vec::new();
            let decision = {
                let mut inner = self.inner.lock().await;
                let max_idle = Duration::from_millis(self.config.max_idle_time_ms);
                let bucket = inner.buckets.entry(key.clone()).or_default();

                let mut reusable = None;
                for conn in bucket.iter() {
                    if conn.state() == ConnectionState::Idle {
                        if conn.idle_for() < max_idle {
                            reusable = Some(Arc::clone(conn));
                            break;
                        }
                        stale.push(Arc::clone(conn));
                    }
                }
                bucket.retain(|conn| !stale.iter().any(|s| Arc::ptr_eq(s, conn)));

                if let Some(conn) = reusable {
                    conn.set_state(ConnectionState::InUse);
                    conn.touch();
                    conn.use_count.fetch_add(1, Ordering::Relaxed);
                    inner.reuse_count += 1;
                    if waited {
                        update_wait_ema(&mut inner, wait_start.elapsed());
                    }
                    AcquireStep::Reused(conn)
                } else {
                    let in_use = inner
                        .buckets
                        .get(&key)
                        .map(|b| b.iter().filter(|c| c.state() == ConnectionState::InUse).count())
                        .unwrap_or(0);
                    let pending = inner.pending.get(&key).copied().unwrap_or(0);
                    if !counted_miss {
                        inner.miss_count += 1;
                        counted_miss = true;
                    }
                    if in_use + pending >= self.config.max_connections_per_origin {
                        waited = true;
                        AcquireStep::Wait
                    } else {
                        *inner.pending.entry(key.clone()).or_insert(0) += 1;
                        AcquireStep::Dial
                    }
                }
            };

            for conn in &stale {
                conn.close_stream().await;
            }

            match decision {
                AcquireStep::Reused(conn) => return Ok(conn),
                AcquireStep::Dial => {
                    // slot reserved; dial outside the lock
                    let dialed = self.dial(&origin).await;
                    let mut inner = self.inner.lock().await;
                    if let Some(pending) = inner.pending.get_mut(&key) {
                        *pending = pending.saturating_sub(1);
                    }
                    match dialed {
                        Ok(stream) => {
                            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                            let conn = Arc::new(PooledConnection::new(id, origin, stream));
                            inner.buckets.entry(key).or_default().push(Arc::clone(&conn));
                            inner.total_connections += 1;
                            if waited {
                                update_wait_ema(&mut inner, wait_start.elapsed());
                            }
                            debug!(id, origin = %conn.origin(), "opened pooled connection");
                            return Ok(conn);
                        }
                        Err(e) => {
                            inner.error_count += 1;
                            warn!(origin = %origin, error = %e, "pooled connection failed to open");
                            return Err(NetError::Pool(format!(
                                "failed to open connection to {origin}: {e}"
                            )));
                        }
                    }
                }
                AcquireStep::Wait => tokio::time::sleep(ACQUIRE_POLL_INTERVAL).await,
            }
        }
    }

    /// Return a connection to the pool; a no-op unless it is `InUse`
    pub async fn release(&self, conn: &Arc<PooledConnection>) {
        let _guard = self.inner.lock().await;
        if conn.state() == ConnectionState::InUse {
            conn.set_state(ConnectionState::Idle);
            conn.touch();
        }
    }

    /// Close and remove idle connections past `max_idle_time_ms`, plus any
    /// entry that is already closed or errored; empty buckets are dropped
    pub async fn close_idle_connections(&self) -> usize {
        let mut to_close = Vec::new();
        {
            let mut inner = self.inner.lock().await;
            let max_idle = Duration::from_millis(self.config.max_idle_time_ms);
            for bucket in inner.buckets.values_mut() {
                bucket.retain(|conn| {
                    let state = conn.state();
                    let expired = state == ConnectionState::Idle && conn.idle_for() >= max_idle;
                    let defunct = matches!(
                        state,
                        ConnectionState::Closing | ConnectionState::Closed | ConnectionState::Error
                    );
                    if expired {
                        to_close.push(Arc::clone(conn));
                    }
                    !(expired || defunct)
                });
            }
            inner.buckets.retain(|_, bucket| !bucket.is_empty());
        }
        for conn in &to_close {
            conn.close_stream().await;
        }
        to_close.len()
    }

    /// Close everything and empty the pool
    pub async fn close_all(&self) {
        let drained: Vec<Arc<PooledConnection>> = {
            let mut inner = self.inner.lock().await;
            inner.buckets.drain().flat_map(|(_, bucket)| bucket).collect()
        };
        for conn in &drained {
            conn.close_stream().await;
        }
    }

    /// Snapshot of every pooled connection, for health inspection
    pub async fn connections(&self) -> Vec<Arc<PooledConnection>> {
        let inner = self.inner.lock().await;
        inner.buckets.values().flatten().cloned().collect()
    }

    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;
        let mut active = 0;
        let mut idle = 0;
        for conn in inner.buckets.values().flatten() {
            match conn.state() {
                ConnectionState::InUse => active += 1,
                ConnectionState::Idle => idle += 1,
                _ => {}
            }
        }
        PoolStats {
            total_connections: inner.total_connections,
            active_connections: active,
            idle_connections: idle,
            reuse_count: inner.reuse_count,
            miss_count: inner.miss_count,
            error_count: inner.error_count,
            average_wait_ms: inner.average_wait_ms,
            last_updated_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Start the recurring idle sweep; a second call is a no-op
    pub fn start_maintenance(self: &Arc<Self>) {
        let mut guard = match self.maintenance.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            return;
        }
        let (tx, mut rx) = watch::channel(false);
        *guard = Some(tx);
        let pool = Arc::clone(self);
        let interval = Duration::from_millis(pool.config.auto_cleanup_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let closed = pool.close_idle_connections().await;
                        if closed > 0 {
                            debug!(closed, "pool idle sweep");
                        }
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

    pub fn stop_maintenance(&self) {
        let mut guard = match self.maintenance.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(tx) = guard.take() {
            let _ = tx.send(true);
        }
    }

    async fn dial(&self, origin: &Origin) -> Result<ConnectionStream> {
        let ip = self.resolve_host(&origin.host).await?;
        let mut socket = Socket::with_options(
            AddressFamily::of(ip),
            Transport::Stream,
            self.tcp_config.socket_options(),
        );
        socket.set_connect_timeout(Duration::from_millis(self.tcp_config.connect_timeout_ms));
        socket.connect(&ip.to_string(), origin.port).await?;

        if origin.tls {
            let mut tls_config = self.tls_config.clone();
            if tls_config.server_name.is_none() {
                tls_config.server_name = Some(origin.host.clone());
            }
            let mut connection = TlsConnection::new(socket, tls_config);
            connection.handshake().await?;
            Ok(ConnectionStream::Tls(connection))
        } else {
            Ok(ConnectionStream::Plain(socket))
        }
    }

    async fn resolve_host(&self, host: &str) -> Result<IpAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        if let Some(cached) = self.dns_cache.get(host) {
            if let Some(ip) = cached.addresses.first() {
                return Ok(*ip);
            }
        }
        let resolution = self.resolver.resolve(host, RecordType::A).await?;
        let ip = resolution
            .addresses
            .first()
            .copied()
            .ok_or_else(|| NetError::Dns(format!("no addresses for {host}")))?;
        self.dns_cache.set(resolution);
        Ok(ip)
    }
}

fn update_wait_ema(inner: &mut PoolInner, waited: Duration) {
    let wait_ms = waited.as_secs_f64() * 1000.0;
    inner.average_wait_ms = if inner.average_wait_ms == 0.0 {
        wait_ms
    } else {
        inner.average_wait_ms * (1.0 - WAIT_EMA_ALPHA) + wait_ms * WAIT_EMA_ALPHA
    };
}
