use crate::config::SocketOptions;
use crate::error::{NetError, Result};
use socket2::{SockRef, TcpKeepalive};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, trace};

static NEXT_DESCRIPTOR: AtomicU64 = AtomicU64::new(1);

/// Address family of a socket, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

/// Transport kind of a socket, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stream,
    Datagram,
}

/// Socket lifecycle state
///
/// `Closed → Opening → Open → Closing → Closed`, with `Error` reachable
/// from any non-terminal state. Once `Error` or `Closed`, only `close` is
/// valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Closed,
    Opening,
    Open,
    Closing,
    Error,
}

/// Cumulative socket statistics; counters never decrease
#[derive(Debug, Clone, Default)]
pub struct SocketStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub reads: u64,
    pub writes: u64,
    pub errors: u64,
    pub created_at_ms: i64,
    pub connected_at_ms: Option<i64>,
    pub closed_at_ms: Option<i64>,
}

enum Inner {
    Stream(TcpStream),
    Datagram(UdpSocket),
}

/// State-machined wrapper over an OS stream or datagram transport
pub struct Socket {
    descriptor: u64,
    family: AddressFamily,
    transport: Transport,
    state: SocketState,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    inner: Option<Inner>,
    options: SocketOptions,
    connect_timeout: Duration,
    stats: SocketStats,
}

impl Socket {
    pub fn stream(family: AddressFamily) -> Self {
        Self::with_options(family, Transport::Stream, SocketOptions::default())
    }

    pub fn datagram(family: AddressFamily) -> Self {
        Self::with_options(family, Transport::Datagram, SocketOptions::default())
    }

    pub fn with_options(family: AddressFamily, transport: Transport, options: SocketOptions) -> Self {
        Self {
            descriptor: NEXT_DESCRIPTOR.fetch_add(1, Ordering::Relaxed),
            family,
            transport,
            state: SocketState::Closed,
            local_addr: None,
            remote_addr: None,
            inner: None,
            options,
            connect_timeout: Duration::from_millis(30000),
            stats: SocketStats { created_at_ms: now_ms(), ..SocketStats::default() },
        }
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    pub fn descriptor(&self) -> u64 {
        self.descriptor
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Local endpoint; unset until the socket reaches `Open`
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Independent snapshot of the statistics counters
    pub fn stats(&self) -> SocketStats {
        self.stats.clone()
    }

    /// Connect to `host:port`, where `host` is an IP literal; name
    /// resolution belongs to the DNS resolver.
    ///
    /// Requires `Closed`; transitions `Closed → Opening → Open` on success
    /// and `Opening → Error` on failure.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        if self.state != SocketState::Closed {
            return Err(self.usage_error(format!(
                "connect requires a closed socket, state is {:?}",
                self.state
            )));
        }
        let ip: IpAddr = host
            .parse()
            .map_err(|_| self.usage_error(format!("'{host}' is not an IP address; resolve it first")))?;
        if AddressFamily::of(ip) != self.family {
            return Err(self.usage_error(format!("address family mismatch for {ip}")));
        }
        let addr = SocketAddr::new(ip, port);
        self.state = SocketState::Opening;

        let result = match self.transport {
            Transport::Stream => timeout(self.connect_timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| io_timeout("connect timed out"))
                .and_then(|r| r)
                .map(Inner::Stream),
            Transport::Datagram => {
                let bind_addr = match self.family {
                    AddressFamily::V4 => SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0),
                    AddressFamily::V6 => SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), 0),
                };
                match UdpSocket::bind(bind_addr).await {
                    Ok(socket) => socket.connect(addr).await.map(|_| Inner::Datagram(socket)),
                    Err(e) => Err(e),
                }
            }
        };

        match result {
            Ok(inner) => {
                self.apply_options(&inner);
                self.local_addr = match &inner {
                    Inner::Stream(s) => s.local_addr().ok(),
                    Inner::Datagram(s) => s.local_addr().ok(),
                };
                self.remote_addr = Some(addr);
                self.inner = Some(inner);
                self.state = SocketState::Open;
                self.stats.connected_at_ms = Some(now_ms());
                debug!(descriptor = self.descriptor, remote = %addr, "socket connected");
                Ok(())
            }
            Err(e) => {
                self.state = SocketState::Error;
                self.stats.errors += 1;
                debug!(descriptor = self.descriptor, remote = %addr, error = %e, "connect failed");
                Err(NetError::Transport(e))
            }
        }
    }

    /// Read into `buf`; `Ok(0)` signals a clean end-of-stream from the peer
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.state != SocketState::Open {
            return Err(self.usage_error(format!("read requires an open socket, state is {:?}", self.state)));
        }
        let deadline = self.options.recv_timeout_ms.map(Duration::from_millis);
        let inner = match self.inner.as_mut() {
            Some(inner) => inner,
            None => return Err(self.fail(io_timeout("socket has no transport"))),
        };
        let io = async {
            match inner {
                Inner::Stream(s) => s.read(buf).await,
                Inner::Datagram(s) => s.recv(buf).await,
            }
        };
        let result = match deadline {
            Some(d) => timeout(d, io).await.map_err(|_| io_timeout("read timed out")).and_then(|r| r),
            None => io.await,
        };
        match result {
            Ok(n) => {
                self.stats.reads += 1;
                self.stats.bytes_received += n as u64;
                trace!(descriptor = self.descriptor, bytes = n, "read");
                Ok(n)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Write `data`; may write fewer bytes than requested, callers loop
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.state != SocketState::Open {
            return Err(self.usage_error(format!("write requires an open socket, state is {:?}", self.state)));
        }
        let deadline = self.options.send_timeout_ms.map(Duration::from_millis);
        let inner = match self.inner.as_mut() {
            Some(inner) => inner,
            None => return Err(self.fail(io_timeout("socket has no transport"))),
        };
        let io = async {
            match inner {
                Inner::Stream(s) => s.write(data).await,
                Inner::Datagram(s) => s.send(data).await,
            }
        };
        let result = match deadline {
            Some(d) => timeout(d, io).await.map_err(|_| io_timeout("write timed out")).and_then(|r| r),
            None => io.await,
        };
        match result {
            Ok(n) => {
                self.stats.writes += 1;
                self.stats.bytes_sent += n as u64;
                trace!(descriptor = self.descriptor, bytes = n, "write");
                Ok(n)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Write all of `data`, looping over partial writes
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < data.len() {
            written += self.write(&data[written..]).await?;
        }
        Ok(())
    }

    /// Idempotent close; a no-op from `Closed` or `Closing`
    pub async fn close(&mut self) -> Result<()> {
        match self.state {
            SocketState::Closed | SocketState::Closing => return Ok(()),
            _ => {}
        }
        self.state = SocketState::Closing;
        if let Some(Inner::Stream(mut s)) = self.inner.take() {
            // flush and send FIN; the peer may already be gone
            let _ = s.shutdown().await;
        } else {
            self.inner = None;
        }
        self.state = SocketState::Closed;
        self.stats.closed_at_ms = Some(now_ms());
        debug!(descriptor = self.descriptor, "socket closed");
        Ok(())
    }

    fn apply_options(&self, inner: &Inner) {
        let sock = match inner {
            Inner::Stream(s) => SockRef::from(s),
            Inner::Datagram(s) => SockRef::from(s),
        };
        let opts = &self.options;
        if let Some(no_delay) = opts.no_delay {
            if matches!(inner, Inner::Stream(_)) {
                let _ = sock.set_nodelay(no_delay);
            }
        }
        if opts.keep_alive == Some(true) {
            let mut keepalive = TcpKeepalive::new();
            if let Some(secs) = opts.keep_idle_secs {
                keepalive = keepalive.with_time(Duration::from_secs(secs));
            }
            if let Some(secs) = opts.keep_interval_secs {
                keepalive = keepalive.with_interval(Duration::from_secs(secs));
            }
            #[cfg(unix)]
            if let Some(count) = opts.keep_count {
                keepalive = keepalive.with_retries(count);
            }
            let _ = sock.set_tcp_keepalive(&keepalive);
        }
        if let Some(reuse) = opts.reuse_address {
            let _ = sock.set_reuse_address(reuse);
        }
        #[cfg(unix)]
        if let Some(reuse) = opts.reuse_port {
            let _ = sock.set_reuse_port(reuse);
        }
        if let Some(size) = opts.recv_buffer_size {
            let _ = sock.set_recv_buffer_size(size);
        }
        if let Some(size) = opts.send_buffer_size {
            let _ = sock.set_send_buffer_size(size);
        }
        if let Some(linger) = opts.linger {
            let duration = linger.enabled.then(|| Duration::from_secs(linger.timeout_secs));
            let _ = sock.set_linger(duration);
        }
    }

    /// Transport failure: count it and park the socket in `Error`
    fn fail(&mut self, e: std::io::Error) -> NetError {
        self.stats.errors += 1;
        self.state = SocketState::Error;
        NetError::Transport(e)
    }

    /// Caller misuse: count it without disturbing the transport state
    fn usage_error(&mut self, msg: String) -> NetError {
        self.stats.errors += 1;
        NetError::State(msg)
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("descriptor", &self.descriptor)
            .field("family", &self.family)
            .field("transport", &self.transport)
            .field("state", &self.state)
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn io_timeout(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::TimedOut, msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn local_listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        (listener, addr)
    }

    #[tokio::test]
    async fn test_connect_lifecycle() {
        let (listener, addr) = local_listener().await;
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let mut socket = Socket::stream(AddressFamily::V4);
        assert_eq!(socket.state(), SocketState::Closed);
        assert!(socket.local_addr().is_none());

        socket.connect(&addr.ip().to_string(), addr.port()).await.expect("connect");
        assert_eq!(socket.state(), SocketState::Open);
        assert!(socket.local_addr().is_some());
        assert_eq!(socket.remote_addr(), Some(addr));

        socket.close().await.expect("close");
        assert_eq!(socket.state(), SocketState::Closed);
        // close is idempotent
        socket.close().await.expect("second close");
    }

    #[tokio::test]
    async fn test_connect_requires_closed_state() {
        let (listener, addr) = local_listener().await;
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let mut socket = Socket::stream(AddressFamily::V4);
        socket.connect(&addr.ip().to_string(), addr.port()).await.expect("connect");
        let err = socket.connect(&addr.ip().to_string(), addr.port()).await;
        assert!(matches!(err, Err(NetError::State(_))));
        assert_eq!(socket.stats().errors, 1);
        // a state violation does not disturb the open transport
        assert_eq!(socket.state(), SocketState::Open);
    }

    #[tokio::test]
    async fn test_connect_failure_enters_error_state() {
        // nothing listens on the discard port of the loopback interface
        let mut socket = Socket::stream(AddressFamily::V4);
        let err = socket.connect("127.0.0.1", 1).await;
        assert!(matches!(err, Err(NetError::Transport(_))));
        assert_eq!(socket.state(), SocketState::Error);
        assert_eq!(socket.stats().errors, 1);

        // only close is valid from Error
        let mut buf = [0u8; 4];
        assert!(matches!(socket.read(&mut buf).await, Err(NetError::State(_))));
        socket.close().await.expect("close from error");
        assert_eq!(socket.state(), SocketState::Closed);
    }

    #[tokio::test]
    async fn test_read_write_roundtrip_and_stats() {
        let (listener, addr) = local_listener().await;
        tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 4];
            peer.read_exact(&mut buf).await.expect("peer read");
            peer.write_all(&buf).await.expect("peer write");
        });

        let mut socket = Socket::stream(AddressFamily::V4);
        socket.connect(&addr.ip().to_string(), addr.port()).await.expect("connect");
        socket.write_all(b"ping").await.expect("write");

        let mut buf = [0u8; 4];
        let mut read = 0;
        while read < 4 {
            read += socket.read(&mut buf[read..]).await.expect("read");
        }
        assert_eq!(&buf, b"ping");

        let stats = socket.stats();
        assert_eq!(stats.bytes_sent, 4);
        assert_eq!(stats.bytes_received, 4);
        assert!(stats.reads >= 1);
        assert!(stats.writes >= 1);
        assert_eq!(stats.errors, 0);
        assert!(stats.connected_at_ms.is_some());
    }

    #[tokio::test]
    async fn test_read_end_of_stream_sentinel() {
        let (listener, addr) = local_listener().await;
        tokio::spawn(async move {
            let (peer, _) = listener.accept().await.expect("accept");
            drop(peer);
        });

        let mut socket = Socket::stream(AddressFamily::V4);
        socket.connect(&addr.ip().to_string(), addr.port()).await.expect("connect");
        let mut buf = [0u8; 16];
        let n = socket.read(&mut buf).await.expect("read");
        assert_eq!(n, 0);
        // a clean end of stream is not an error
        assert_eq!(socket.state(), SocketState::Open);
        assert_eq!(socket.stats().errors, 0);
    }

    #[tokio::test]
    async fn test_descriptors_are_unique() {
        let a = Socket::stream(AddressFamily::V4);
        let b = Socket::datagram(AddressFamily::V4);
        assert_ne!(a.descriptor(), b.descriptor());
    }
}
