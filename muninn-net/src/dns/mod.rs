pub mod cache;
pub mod resolver;
pub mod wire;

pub use cache::{CacheStats, DnsCache, DnsResolution};
pub use resolver::DnsResolver;
pub use wire::{
    build_query, decode_domain_name, encode_domain_name, parse_response, DnsHeader, DnsMessage,
    RecordData, RecordType, ResourceRecord,
};
