use crate::cert::Certificate;
use crate::tls::CipherSuite;
use serde::Deserialize;

/// TLS protocol version
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.1")]
    V1_1,
    #[serde(rename = "1.2")]
    V1_2,
    #[serde(rename = "1.3")]
    V1_3,
}

impl TlsVersion {
    /// Wire code of this version (e.g. 0x0304 for TLS 1.3)
    pub fn wire_code(self) -> u16 {
        match self {
            TlsVersion::V1_0 => 0x0301,
            TlsVersion::V1_1 => 0x0302,
            TlsVersion::V1_2 => 0x0303,
            TlsVersion::V1_3 => 0x0304,
        }
    }
}

/// TLS client configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TlsConfig {
    /// Minimum negotiated version; anything below 1.3 is rejected at
    /// connect time (no 1.2 handshake is implemented)
    /// Default: "1.3"
    #[serde(default = "default_version")]
    pub min_version: TlsVersion,
    /// Maximum negotiated version
    /// Default: "1.3"
    #[serde(default = "default_version")]
    pub max_version: TlsVersion,
    /// Offered cipher suites, in preference order
    /// Default: the four TLS 1.3 suites
    #[serde(default = "default_cipher_suites")]
    pub cipher_suites: Vec<CipherSuite>,
    /// Validate the server certificate chain against `trusted_cas`
    /// Default: true
    #[serde(default = "default_true")]
    pub verify_peer_certificate: bool,
    /// Trust anchors used for chain building and root trust
    #[serde(skip)]
    pub trusted_cas: Vec<Certificate>,
    /// Accept a self-signed leaf as its own trust anchor
    /// Default: false
    #[serde(default)]
    pub allow_self_signed: bool,
    /// Hostname sent as SNI and matched against the certificate; when unset
    /// the dialed host is used
    #[serde(default)]
    pub server_name: Option<String>,
    /// ALPN protocols offered, in preference order
    /// Default: ["http/1.1"]
    #[serde(default = "default_alpn")]
    pub alpn_protocols: Vec<String>,
    /// Store NewSessionTicket messages for later resumption
    /// Default: false
    #[serde(default)]
    pub enable_session_resumption: bool,
    /// Lifetime cap applied to stored session tickets in milliseconds
    /// Default: 7200000 (2 hours)
    #[serde(default = "default_ticket_lifetime")]
    pub session_ticket_lifetime_ms: u64,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            min_version: default_version(),
            max_version: default_version(),
            cipher_suites: default_cipher_suites(),
            verify_peer_certificate: default_true(),
            trusted_cas: Vec::new(),
            allow_self_signed: false,
            server_name: None,
            alpn_protocols: default_alpn(),
            enable_session_resumption: false,
            session_ticket_lifetime_ms: default_ticket_lifetime(),
        }
    }
}

fn default_version() -> TlsVersion {
    TlsVersion::V1_3
}

fn default_cipher_suites() -> Vec<CipherSuite> {
    crate::tls::supported_suites().to_vec()
}

fn default_true() -> bool {
    true
}

fn default_alpn() -> Vec<String> {
    vec!["http/1.1".to_string()]
}

fn default_ticket_lifetime() -> u64 {
    7_200_000
}
