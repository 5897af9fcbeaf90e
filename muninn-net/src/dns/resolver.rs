use crate::config::DnsConfig;
use crate::dns::cache::{now_ms, DnsResolution};
use crate::dns::wire::{
    build_query, parse_response, DnsMessage, RecordData, RecordType, MAX_UDP_PAYLOAD,
};
use crate::error::{NetError, Result};
use crate::socket::{AddressFamily, Socket};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::Rng;
use std::net::IpAddr;
use tracing::{debug, warn};

const DEFAULT_TTL: u32 = 300;
const DNS_PORT: u16 = 53;

/// Resolver speaking RFC 1035 over UDP, with an optional RFC 8484
/// DNS-over-HTTPS front door
pub struct DnsResolver {
    config: DnsConfig,
    http: reqwest::Client,
}

impl DnsResolver {
    pub fn new(config: DnsConfig) -> Self {
        Self { config, http: reqwest::Client::new() }
    }

    pub fn config(&self) -> &DnsConfig {
        &self.config
    }

    /// Resolve `hostname` to addresses of the given record type
    ///
    /// DoH is attempted first when configured; each UDP nameserver is then
    /// tried in order. The error of the last attempt is surfaced when every
    /// transport fails.
    pub async fn resolve(&self, hostname: &str, record_type: RecordType) -> Result<DnsResolution> {
        if let Some(endpoint) = self.config.doh_endpoint.clone() {
            match self.resolve_doh(&endpoint, hostname, record_type).await {
                Ok(resolution) => return Ok(resolution),
                Err(e) => {
                    warn!(%hostname, error = %e, "DoH lookup failed, falling back to UDP")
                }
            }
        }

        let mut last_error = None;
        for nameserver in &self.config.nameservers {
            match self.resolve_udp(nameserver, hostname, record_type).await {
                Ok(resolution) => return Ok(resolution),
                Err(e) => {
                    debug!(%hostname, %nameserver, error = %e, "nameserver attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| NetError::Dns("no nameservers configured".to_string())))
    }

    async fn resolve_doh(
        &self,
        endpoint: &str,
        hostname: &str,
        record_type: RecordType,
    ) -> Result<DnsResolution> {
        let query = build_query(rand::thread_rng().gen(), hostname, record_type)?;
        let url = format!("{endpoint}?dns={}", URL_SAFE_NO_PAD.encode(&query));
        let response = self
            .http
            .get(&url)
            .header("Accept", "application/dns-message")
            .send()
            .await
            .map_err(|e| NetError::Dns(format!("DoH request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(NetError::Dns(format!("DoH endpoint returned {}", response.status())));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| NetError::Dns(format!("DoH body read failed: {e}")))?;
        let message = parse_response(&body)?;
        check_rcode(&message)?;
        Ok(extract_resolution(hostname, &message))
    }

    async fn resolve_udp(
        &self,
        nameserver: &str,
        hostname: &str,
        record_type: RecordType,
    ) -> Result<DnsResolution> {
        let (server_ip, server_port) = split_nameserver(nameserver)?;
        let query = build_query(rand::thread_rng().gen(), hostname, record_type)?;

        let mut socket = Socket::datagram(AddressFamily::of(server_ip));
        let attempt = async {
            socket.connect(&server_ip.to_string(), server_port).await?;
            socket.write(&query).await?;
            let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
            let n = socket.read(&mut buf).await?;
            Ok::<Vec<u8>, NetError>(buf[..n].to_vec())
        };
        let attempt = tokio::time::timeout(
            std::time::Duration::from_millis(self.config.query_timeout_ms),
            attempt,
        )
        .await
        .map_err(|_| NetError::Dns(format!("query to {nameserver} timed out")))
        .and_then(|r| r);
        // the query socket never outlives the attempt
        let _ = socket.close().await;
        let packet = attempt?;

        let message = parse_response(&packet)?;
        check_rcode(&message)?;
        Ok(extract_resolution(hostname, &message))
    }
}

fn split_nameserver(nameserver: &str) -> Result<(IpAddr, u16)> {
    if let Ok(addr) = nameserver.parse::<std::net::SocketAddr>() {
        return Ok((addr.ip(), addr.port()));
    }
    let ip = nameserver
        .parse::<IpAddr>()
        .map_err(|_| NetError::Dns(format!("invalid nameserver address '{nameserver}'")))?;
    Ok((ip, DNS_PORT))
}

fn check_rcode(message: &DnsMessage) -> Result<()> {
    let reason = match message.header.rcode() {
        0 => return Ok(()),
        1 => "format error",
        2 => "server failure",
        3 => "name does not exist (NXDOMAIN)",
        4 => "not implemented",
        5 => "refused",
        other => return Err(NetError::Dns(format!("server returned rcode {other}"))),
    };
    Err(NetError::Dns(reason.to_string()))
}

/// Collapse the answer section into a resolution
///
/// A CNAME answer is recorded as the resolution hostname but not chased;
/// the TTL is the minimum over the answer records, defaulting when the
/// answer carried none.
fn extract_resolution(queried: &str, message: &DnsMessage) -> DnsResolution {
    let mut addresses = Vec::new();
    let mut hostname = queried.to_string();
    let mut ttl: Option<u32> = None;

    for answer in &message.answers {
        match &answer.data {
            RecordData::A(addr) => addresses.push(IpAddr::V4(*addr)),
            RecordData::Aaaa(addr) => addresses.push(IpAddr::V6(*addr)),
            RecordData::Cname(target) => hostname = target.clone(),
            RecordData::Mx { .. } | RecordData::Txt(_) => {}
        }
        ttl = Some(ttl.map_or(answer.ttl, |t| t.min(answer.ttl)));
    }

    DnsResolution {
        hostname,
        addresses,
        ttl: ttl.unwrap_or(DEFAULT_TTL),
        timestamp_ms: now_ms(),
    }
}
