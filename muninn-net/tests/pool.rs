//! Pool behavior against a real loopback listener: reuse identity, the
//! per-origin cap, eviction and health checks.

use muninn_net::config::{DnsConfig, ManagerConfig, PoolConfig, TcpConfig, TlsConfig};
use muninn_net::pool::{ConnectionManager, ConnectionPool, ConnectionState};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Accepts connections and parks them so the client side stays open
async fn quiet_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    port
}

fn pool_with(config: PoolConfig) -> Arc<ConnectionPool> {
    Arc::new(ConnectionPool::new(
        config,
        TcpConfig::default(),
        TlsConfig::default(),
        DnsConfig::default(),
    ))
}

#[tokio::test]
async fn test_release_then_acquire_returns_same_connection() {
    let port = quiet_server().await;
    let pool = pool_with(PoolConfig::default());

    let first = pool.acquire("127.0.0.1", port, false).await.expect("first acquire");
    assert_eq!(first.state(), ConnectionState::InUse);
    assert_eq!(first.use_count(), 1);
    pool.release(&first).await;
    assert_eq!(first.state(), ConnectionState::Idle);

    let second = pool.acquire("127.0.0.1", port, false).await.expect("second acquire");
    assert!(Arc::ptr_eq(&first, &second), "reuse must hand back the same object");
    assert_eq!(second.use_count(), 2);

    let stats = pool.stats().await;
    assert_eq!(stats.total_connections, 1);
    assert_eq!(stats.reuse_count, 1);
    assert_eq!(stats.miss_count, 1);
    assert_eq!(stats.active_connections, 1);
    assert_eq!(stats.idle_connections, 0);
}

#[tokio::test]
async fn test_origin_cap_blocks_seventh_acquire() {
    let port = quiet_server().await;
    let pool = pool_with(PoolConfig::default());

    let mut held = Vec::new();
    for _ in 0..6 {
        held.push(pool.acquire("127.0.0.1", port, false).await.expect("acquire"));
    }
    let stats = pool.stats().await;
    assert_eq!(stats.active_connections, 6);

    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire("127.0.0.1", port, false).await })
    };
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!waiter.is_finished(), "the seventh acquire must wait at the cap");

    let released = held.pop().expect("held connection");
    pool.release(&released).await;

    let seventh = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter resolves after release")
        .expect("join")
        .expect("acquire");
    assert!(Arc::ptr_eq(&released, &seventh), "the freed slot is reused");

    let stats = pool.stats().await;
    assert_eq!(stats.total_connections, 6);
    assert!(stats.active_connections <= 6);
    assert!(stats.average_wait_ms > 0.0);
}

#[tokio::test]
async fn test_stale_idle_connections_are_not_reused() {
    let port = quiet_server().await;
    let pool = pool_with(PoolConfig { max_idle_time_ms: 30, ..PoolConfig::default() });

    let first = pool.acquire("127.0.0.1", port, false).await.expect("acquire");
    pool.release(&first).await;
    tokio::time::sleep(Duration::from_millis(60)).await;

    let second = pool.acquire("127.0.0.1", port, false).await.expect("acquire");
    assert!(!Arc::ptr_eq(&first, &second), "an expired connection must not be handed out");
    assert_eq!(first.state(), ConnectionState::Closed);

    let stats = pool.stats().await;
    assert_eq!(stats.total_connections, 2);
    assert_eq!(stats.reuse_count, 0);
}

#[tokio::test]
async fn test_close_idle_connections_sweeps_expired_entries() {
    let port = quiet_server().await;
    let pool = pool_with(PoolConfig { max_idle_time_ms: 30, ..PoolConfig::default() });

    let conn = pool.acquire("127.0.0.1", port, false).await.expect("acquire");
    pool.release(&conn).await;
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(pool.close_idle_connections().await, 1);
    assert_eq!(conn.state(), ConnectionState::Closed);
    let stats = pool.stats().await;
    assert_eq!(stats.active_connections, 0);
    assert_eq!(stats.idle_connections, 0);
}

#[tokio::test]
async fn test_failed_dial_counts_an_error() {
    // nothing listens on the discard port
    let pool = pool_with(PoolConfig::default());
    let err = pool.acquire("127.0.0.1", 1, false).await;
    assert!(err.is_err());
    let stats = pool.stats().await;
    assert_eq!(stats.error_count, 1);
    assert_eq!(stats.total_connections, 0);
}

#[tokio::test]
async fn test_close_all_empties_the_pool() {
    let port = quiet_server().await;
    let pool = pool_with(PoolConfig::default());
    let a = pool.acquire("127.0.0.1", port, false).await.expect("acquire");
    let b = pool.acquire("127.0.0.1", port, false).await.expect("acquire");
    pool.close_all().await;
    assert_eq!(a.state(), ConnectionState::Closed);
    assert_eq!(b.state(), ConnectionState::Closed);
    let stats = pool.stats().await;
    assert_eq!(stats.active_connections, 0);
    assert_eq!(stats.idle_connections, 0);
}

#[tokio::test]
async fn test_manager_health_check_reaps_long_idle_connections() {
    let port = quiet_server().await;
    let pool = pool_with(PoolConfig::default());
    let manager = ConnectionManager::new(
        Arc::clone(&pool),
        ManagerConfig { max_healthy_idle_ms: 20, ..ManagerConfig::default() },
    );

    let conn = manager.acquire("127.0.0.1", port, false).await.expect("acquire");
    manager.release(&conn).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let report = manager.health_check().await;
    assert_eq!(report.checked, 1);
    assert_eq!(report.closed, 1);
    assert_eq!(conn.state(), ConnectionState::Closed);

    let stats = manager.stats().await;
    assert_eq!(stats.pool.idle_connections, 0);
    assert!((stats.reuse_rate - 0.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_reuse_rate_aggregation() {
    let port = quiet_server().await;
    let pool = pool_with(PoolConfig::default());
    let manager = ConnectionManager::new(Arc::clone(&pool), ManagerConfig::default());

    let conn = manager.acquire("127.0.0.1", port, false).await.expect("acquire");
    manager.release(&conn).await;
    let conn = manager.acquire("127.0.0.1", port, false).await.expect("reacquire");
    manager.release(&conn).await;

    let stats = manager.stats().await;
    // one miss (the dial) and one reuse
    assert!((stats.reuse_rate - 0.5).abs() < f64::EPSILON);
    assert_eq!(stats.error_rate, 0.0);
}

#[tokio::test]
async fn test_pooled_connection_io_roundtrip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    tokio::spawn(async move {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.expect("read");
        stream.write_all(&buf).await.expect("write");
    });

    let pool = pool_with(PoolConfig::default());
    let conn = pool.acquire("127.0.0.1", port, false).await.expect("acquire");
    conn.write(b"hello").await.expect("write");
    let mut buf = [0u8; 5];
    let mut read = 0;
    while read < 5 {
        read += conn.read(&mut buf[read..]).await.expect("read");
    }
    assert_eq!(&buf, b"hello");
    pool.release(&conn).await;
}
