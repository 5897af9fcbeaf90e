//! Resolver behavior against a loopback fake nameserver, including rcode
//! failures, nameserver fallback and the DoH-to-UDP fallback.

use muninn_net::config::DnsConfig;
use muninn_net::dns::{DnsCache, DnsResolution, DnsResolver, RecordType};
use tokio::net::UdpSocket;

/// Serve canned answers: reads one query, echoes its id and question and
/// appends the given answer section
async fn fake_nameserver(rcode: u8, answers: Vec<(u16, u32, Vec<u8>)>) -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
    let port = socket.local_addr().expect("addr").port();
    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        loop {
            let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let query = &buf[..n];
            let mut response = Vec::new();
            response.extend_from_slice(&query[..2]); // id
            response.extend_from_slice(&(0x8180u16 | u16::from(rcode)).to_be_bytes());
            response.extend_from_slice(&[0, 1]); // one question
            response.extend_from_slice(&(answers.len() as u16).to_be_bytes());
            response.extend_from_slice(&[0, 0, 0, 0]);
            response.extend_from_slice(&query[12..]); // question section
            for (rtype, ttl, rdata) in &answers {
                response.extend_from_slice(&[0xc0, 0x0c]); // name pointer
                response.extend_from_slice(&rtype.to_be_bytes());
                response.extend_from_slice(&[0, 1]); // IN
                response.extend_from_slice(&ttl.to_be_bytes());
                response.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
                response.extend_from_slice(rdata);
            }
            let _ = socket.send_to(&response, peer).await;
        }
    });
    port
}

fn resolver_for(ports: &[u16]) -> DnsResolver {
    DnsResolver::new(DnsConfig {
        nameservers: ports.iter().map(|p| format!("127.0.0.1:{p}")).collect(),
        doh_endpoint: None,
        query_timeout_ms: 500,
    })
}

#[tokio::test]
async fn test_resolve_a_records_over_udp() {
    let port = fake_nameserver(
        0,
        vec![(1, 120, vec![93, 184, 216, 34]), (1, 60, vec![93, 184, 216, 35])],
    )
    .await;
    let resolver = resolver_for(&[port]);

    let resolution = resolver.resolve("example.com", RecordType::A).await.expect("resolve");
    assert_eq!(resolution.hostname, "example.com");
    assert_eq!(
        resolution.addresses,
        vec!["93.184.216.34".parse::<std::net::IpAddr>().expect("ip"), "93.184.216.35".parse().expect("ip")]
    );
    assert_eq!(resolution.ttl, 60, "minimum TTL over the answers");
}

#[tokio::test]
async fn test_nxdomain_maps_to_dns_error() {
    let port = fake_nameserver(3, vec![]).await;
    let resolver = resolver_for(&[port]);

    let err = resolver.resolve("missing.example", RecordType::A).await.expect_err("nxdomain");
    assert!(err.to_string().contains("NXDOMAIN"), "got: {err}");
}

#[tokio::test]
async fn test_dead_nameserver_falls_through_to_the_next() {
    // port 1 has no listener; the second server answers
    let good = fake_nameserver(0, vec![(1, 300, vec![10, 0, 0, 1])]).await;
    let resolver = resolver_for(&[1, good]);

    let resolution = resolver.resolve("fallback.test", RecordType::A).await.expect("resolve");
    assert_eq!(resolution.addresses.len(), 1);
}

#[tokio::test]
async fn test_all_nameservers_exhausted_surfaces_last_error() {
    let refused = fake_nameserver(5, vec![]).await;
    let resolver = resolver_for(&[refused]);
    let err = resolver.resolve("example.com", RecordType::A).await.expect_err("refused");
    assert!(err.to_string().contains("refused"), "got: {err}");
}

#[tokio::test]
async fn test_doh_failure_falls_back_to_udp() {
    let port = fake_nameserver(0, vec![(1, 300, vec![192, 0, 2, 7])]).await;
    let resolver = DnsResolver::new(DnsConfig {
        nameservers: vec![format!("127.0.0.1:{port}")],
        // nothing serves HTTP here, the GET fails fast
        doh_endpoint: Some("http://127.0.0.1:1/dns-query".to_string()),
        query_timeout_ms: 500,
    });

    let resolution = resolver.resolve("doh.test", RecordType::A).await.expect("fallback resolve");
    assert_eq!(resolution.addresses, vec!["192.0.2.7".parse::<std::net::IpAddr>().expect("ip")]);
}

#[tokio::test]
async fn test_resolution_flows_into_the_cache() {
    let port = fake_nameserver(0, vec![(1, 300, vec![198, 51, 100, 9])]).await;
    let resolver = resolver_for(&[port]);
    let cache = DnsCache::default();

    let resolution = resolver.resolve("cached.test", RecordType::A).await.expect("resolve");
    cache.set(resolution.clone());
    assert_eq!(cache.get("cached.test"), Some(resolution));
    assert_eq!(cache.stats().hits, 1);
}

#[tokio::test]
async fn test_stale_cache_entry_expires_end_to_end() {
    let cache = DnsCache::default();
    cache.set(DnsResolution {
        hostname: "h".to_string(),
        addresses: vec!["1.2.3.4".parse().expect("ip")],
        ttl: 1,
        timestamp_ms: chrono::Utc::now().timestamp_millis() - 500,
    });
    assert!(cache.has("h"), "fresh at 500ms with a 1s TTL");

    cache.set(DnsResolution {
        hostname: "h".to_string(),
        addresses: vec!["1.2.3.4".parse().expect("ip")],
        ttl: 1,
        timestamp_ms: chrono::Utc::now().timestamp_millis() - 2000,
    });
    assert!(!cache.has("h"), "stale at 2000ms with a 1s TTL");
    assert_eq!(cache.stats().size, 0);
}
