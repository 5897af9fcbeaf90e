pub mod dns;
pub mod pool;
pub mod socket;
pub mod tls;

pub use dns::{DnsCacheConfig, DnsConfig};
pub use pool::{ManagerConfig, PoolConfig};
pub use socket::{LingerOptions, SocketOptions, TcpConfig};
pub use tls::{TlsConfig, TlsVersion};
