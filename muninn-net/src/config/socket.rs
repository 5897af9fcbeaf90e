use serde::Deserialize;

/// Per-socket options applied at connect time
///
/// Options the OS does not expose are silently ignored.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SocketOptions {
    /// TCP_NODELAY: disable Nagle's algorithm
    #[serde(default)]
    pub no_delay: Option<bool>,
    /// SO_KEEPALIVE: enable TCP keepalive probing
    #[serde(default)]
    pub keep_alive: Option<bool>,
    /// TCP_KEEPIDLE: seconds of idleness before the first keepalive probe
    #[serde(default)]
    pub keep_idle_secs: Option<u64>,
    /// TCP_KEEPINTVL: seconds between keepalive probes
    #[serde(default)]
    pub keep_interval_secs: Option<u64>,
    /// TCP_KEEPCNT: unanswered probes before the connection is dropped
    #[serde(default)]
    pub keep_count: Option<u32>,
    /// SO_REUSEADDR
    #[serde(default)]
    pub reuse_address: Option<bool>,
    /// SO_REUSEPORT (no effect on platforms without it)
    #[serde(default)]
    pub reuse_port: Option<bool>,
    /// SO_RCVBUF in bytes
    #[serde(default)]
    pub recv_buffer_size: Option<usize>,
    /// SO_SNDBUF in bytes
    #[serde(default)]
    pub send_buffer_size: Option<usize>,
    /// SO_RCVTIMEO in milliseconds; a timed-out read is a transport error
    #[serde(default)]
    pub recv_timeout_ms: Option<u64>,
    /// SO_SNDTIMEO in milliseconds; a timed-out write is a transport error
    #[serde(default)]
    pub send_timeout_ms: Option<u64>,
    /// SO_LINGER
    #[serde(default)]
    pub linger: Option<LingerOptions>,
}

/// SO_LINGER configuration
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct LingerOptions {
    pub enabled: bool,
    /// Linger timeout in seconds, meaningful only when enabled
    pub timeout_secs: u64,
}

/// TCP transport defaults
#[derive(Debug, Deserialize, Clone)]
pub struct TcpConfig {
    /// Connect timeout in milliseconds
    /// Default: 30000 (30 seconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Idle timeout in milliseconds
    /// Default: 60000 (60 seconds)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,
    /// Keepalive probe interval in seconds
    /// Default: 75
    #[serde(default = "default_keep_alive_interval")]
    pub keep_alive_interval_secs: u64,
    /// Unanswered keepalive probes before the connection is dropped
    /// Default: 9
    #[serde(default = "default_keep_alive_probes")]
    pub keep_alive_probes: u32,
    /// Send buffer size in bytes
    /// Default: 65536 (64 KiB)
    #[serde(default = "default_buffer_size")]
    pub send_buffer_size: usize,
    /// Receive buffer size in bytes
    /// Default: 65536 (64 KiB)
    #[serde(default = "default_buffer_size")]
    pub recv_buffer_size: usize,
    /// TCP_NODELAY
    /// Default: true
    #[serde(default = "default_true")]
    pub no_delay: bool,
    /// Maximum segment size advertised by the segment codec
    /// Default: 1460
    #[serde(default = "default_mss")]
    pub mss: u16,
    /// Default window size carried by built segments
    /// Default: 65535
    #[serde(default = "default_window")]
    pub window_size: u16,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            idle_timeout_ms: default_idle_timeout(),
            keep_alive_interval_secs: default_keep_alive_interval(),
            keep_alive_probes: default_keep_alive_probes(),
            send_buffer_size: default_buffer_size(),
            recv_buffer_size: default_buffer_size(),
            no_delay: default_true(),
            mss: default_mss(),
            window_size: default_window(),
        }
    }
}

impl TcpConfig {
    /// Socket options corresponding to these transport defaults
    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            no_delay: Some(self.no_delay),
            keep_alive: Some(true),
            keep_interval_secs: Some(self.keep_alive_interval_secs),
            keep_count: Some(self.keep_alive_probes),
            recv_buffer_size: Some(self.recv_buffer_size),
            send_buffer_size: Some(self.send_buffer_size),
            ..SocketOptions::default()
        }
    }
}

fn default_connect_timeout() -> u64 {
    30000
}

fn default_idle_timeout() -> u64 {
    60000
}

fn default_keep_alive_interval() -> u64 {
    75
}

fn default_keep_alive_probes() -> u32 {
    9
}

fn default_buffer_size() -> usize {
    65536
}

fn default_true() -> bool {
    true
}

fn default_mss() -> u16 {
    1460
}

fn default_window() -> u16 {
    65535
}
