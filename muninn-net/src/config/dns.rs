use serde::Deserialize;

/// DNS resolver configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DnsConfig {
    /// Nameservers tried in order, as `ip` or `ip:port` (port defaults to 53)
    /// Default: ["8.8.8.8", "8.8.4.4"]
    #[serde(default = "default_nameservers")]
    pub nameservers: Vec<String>,
    /// DNS-over-HTTPS endpoint, e.g. "https://cloudflare-dns.com/dns-query"
    ///
    /// When set, queries go over DoH first and fall back to UDP on failure.
    /// Default: None
    #[serde(default)]
    pub doh_endpoint: Option<String>,
    /// Per-attempt query timeout in milliseconds
    /// Default: 5000
    #[serde(default = "default_query_timeout")]
    pub query_timeout_ms: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            nameservers: default_nameservers(),
            doh_endpoint: None,
            query_timeout_ms: default_query_timeout(),
        }
    }
}

/// DNS cache configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DnsCacheConfig {
    /// Interval between automatic stale-entry sweeps in milliseconds
    /// Default: 60000 (60 seconds)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_ms: u64,
}

impl Default for DnsCacheConfig {
    fn default() -> Self {
        Self { cleanup_interval_ms: default_cleanup_interval() }
    }
}

fn default_nameservers() -> Vec<String> {
    vec!["8.8.8.8".to_string(), "8.8.4.4".to_string()]
}

fn default_query_timeout() -> u64 {
    5000
}

fn default_cleanup_interval() -> u64 {
    60000
}
