use serde::Deserialize;

/// Connection pool configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PoolConfig {
    /// Maximum simultaneously checked-out connections per origin
    /// Default: 6
    #[serde(default = "default_max_per_origin")]
    pub max_connections_per_origin: usize,
    /// Idle connections older than this are evicted instead of reused
    /// Default: 60000 (60 seconds)
    #[serde(default = "default_max_idle")]
    pub max_idle_time_ms: u64,
    /// Interval between automatic idle sweeps in milliseconds
    /// Default: 30000 (30 seconds)
    #[serde(default = "default_auto_cleanup")]
    pub auto_cleanup_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_origin: default_max_per_origin(),
            max_idle_time_ms: default_max_idle(),
            auto_cleanup_ms: default_auto_cleanup(),
        }
    }
}

/// Connection manager configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ManagerConfig {
    /// Interval between health-check passes in milliseconds
    /// Default: 60000 (60 seconds)
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_ms: u64,
    /// Connections idle longer than this are considered unhealthy
    /// Default: 300000 (5 minutes)
    #[serde(default = "default_max_healthy_idle")]
    pub max_healthy_idle_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: default_health_check_interval(),
            max_healthy_idle_ms: default_max_healthy_idle(),
        }
    }
}

fn default_max_per_origin() -> usize {
    6
}

fn default_max_idle() -> u64 {
    60000
}

fn default_auto_cleanup() -> u64 {
    30000
}

fn default_health_check_interval() -> u64 {
    60000
}

fn default_max_healthy_idle() -> u64 {
    300000
}
