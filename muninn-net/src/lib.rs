#![forbid(unsafe_code)]

//! Network stack core of the Muninn browser engine: sockets, DNS, a TLS
//! 1.3 client with X.509 validation, and a bounded connection pool.

pub mod cert;
pub mod config;
pub mod dns;
pub mod error;
pub mod pool;
pub mod segment;
pub mod socket;
pub mod tls;

pub use cert::{parse_certificate, validate_certificate, Certificate, ValidationResult};
pub use config::{
    DnsCacheConfig, DnsConfig, ManagerConfig, PoolConfig, SocketOptions, TcpConfig, TlsConfig,
    TlsVersion,
};
pub use dns::{DnsCache, DnsResolution, DnsResolver, RecordType};
pub use error::{NetError, Result};
pub use pool::{
    ConnectionManager, ConnectionPool, ConnectionState, Origin, PoolStats, PooledConnection,
};
pub use segment::{TcpFlags, TcpSegment};
pub use socket::{AddressFamily, Socket, SocketState, Transport};
pub use tls::{CipherSuite, TlsConnection, TlsState};
