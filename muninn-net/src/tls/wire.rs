use crate::error::{NetError, Result};
use crate::tls::CipherSuite;
use bytes::{BufMut, BytesMut};

pub const LEGACY_VERSION: u16 = 0x0303;
pub const TLS13_VERSION: u16 = 0x0304;
/// The only key-exchange group this client offers
pub const GROUP_X25519: u16 = 0x001d;

/// Handshake message type codes (RFC 8446 §4)
pub mod msg {
    pub const CLIENT_HELLO: u8 = 1;
    pub const SERVER_HELLO: u8 = 2;
    pub const NEW_SESSION_TICKET: u8 = 4;
    pub const ENCRYPTED_EXTENSIONS: u8 = 8;
    pub const CERTIFICATE: u8 = 11;
    pub const CERTIFICATE_REQUEST: u8 = 13;
    pub const CERTIFICATE_VERIFY: u8 = 15;
    pub const FINISHED: u8 = 20;
    pub const KEY_UPDATE: u8 = 24;
    pub const MESSAGE_HASH: u8 = 254;
}

/// Extension type codes
pub mod ext {
    pub const SERVER_NAME: u16 = 0;
    pub const SUPPORTED_GROUPS: u16 = 10;
    pub const SIGNATURE_ALGORITHMS: u16 = 13;
    pub const ALPN: u16 = 16;
    pub const SUPPORTED_VERSIONS: u16 = 43;
    pub const KEY_SHARE: u16 = 51;
}

/// Human-readable handshake message name; unknown codes keep their number
pub fn handshake_message_name(msg_type: u8) -> String {
    match msg_type {
        msg::CLIENT_HELLO => "ClientHello".to_string(),
        msg::SERVER_HELLO => "ServerHello".to_string(),
        msg::NEW_SESSION_TICKET => "NewSessionTicket".to_string(),
        msg::ENCRYPTED_EXTENSIONS => "EncryptedExtensions".to_string(),
        msg::CERTIFICATE => "Certificate".to_string(),
        msg::CERTIFICATE_REQUEST => "CertificateRequest".to_string(),
        msg::CERTIFICATE_VERIFY => "CertificateVerify".to_string(),
        msg::FINISHED => "Finished".to_string(),
        msg::KEY_UPDATE => "KeyUpdate".to_string(),
        msg::MESSAGE_HASH => "MessageHash".to_string(),
        other => format!("Unknown_{other}"),
    }
}

/// A typed extension; unknown types are carried verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extension {
    ServerName(String),
    SupportedVersions(Vec<u16>),
    KeyShare { group: u16, public_key: Vec<u8> },
    Alpn(Vec<String>),
    Raw { extension_type: u16, data: Vec<u8> },
}

impl Extension {
    pub fn type_code(&self) -> u16 {
        match self {
            Extension::ServerName(_) => ext::SERVER_NAME,
            Extension::SupportedVersions(_) => ext::SUPPORTED_VERSIONS,
            Extension::KeyShare { .. } => ext::KEY_SHARE,
            Extension::Alpn(_) => ext::ALPN,
            Extension::Raw { extension_type, .. } => *extension_type,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Extension::ServerName(_) => "server_name".to_string(),
            Extension::SupportedVersions(_) => "supported_versions".to_string(),
            Extension::KeyShare { .. } => "key_share".to_string(),
            Extension::Alpn(_) => "application_layer_protocol_negotiation".to_string(),
            Extension::Raw { extension_type, .. } => format!("Unknown_{extension_type}"),
        }
    }
}

/// One handshake message; `framed()` restores its wire form for the
/// transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    pub msg_type: u8,
    pub body: Vec<u8>,
}

impl HandshakeMessage {
    pub fn framed(&self) -> Vec<u8> {
        frame_handshake(self.msg_type, &self.body)
    }

    pub fn name(&self) -> String {
        handshake_message_name(self.msg_type)
    }
}

/// Wrap a body as `[type:1][length:3][body]`
pub fn frame_handshake(msg_type: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + body.len());
    out.push(msg_type);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(body);
    out
}

/// Split a buffer of concatenated handshake frames into messages
pub fn parse_handshake_frames(buf: &[u8]) -> Result<Vec<HandshakeMessage>> {
    let mut reader = Reader::new(buf);
    let mut messages = Vec::new();
    while !reader.at_end() {
        let msg_type = reader.read_u8()?;
        let length = reader.read_u24()? as usize;
        let body = reader.read_bytes(length)?;
        messages.push(HandshakeMessage { msg_type, body: body.to_vec() });
    }
    Ok(messages)
}

/// Fields of a ClientHello, used to serialize one (and by test harnesses
/// to parse one back)
#[derive(Debug, Clone)]
pub struct ClientHello {
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<u16>,
    pub extensions: Vec<Extension>,
}

/// Serialize a full ClientHello handshake message
pub fn build_client_hello(
    random: &[u8; 32],
    cipher_suites: &[CipherSuite],
    server_name: &str,
    key_share_public: &[u8],
    alpn_protocols: &[String],
) -> Vec<u8> {
    let mut body = BytesMut::with_capacity(256);
    body.put_u16(LEGACY_VERSION);
    body.put_slice(random);
    body.put_u8(0); // empty legacy session id
    body.put_u16((cipher_suites.len() * 2) as u16);
    for suite in cipher_suites {
        body.put_u16(suite.code());
    }
    body.put_u8(1); // one compression method: null
    body.put_u8(0);

    let mut extensions = BytesMut::with_capacity(128);
    put_server_name(&mut extensions, server_name);
    put_supported_versions(&mut extensions);
    put_supported_groups(&mut extensions);
    put_signature_algorithms(&mut extensions);
    put_key_share(&mut extensions, key_share_public);
    if !alpn_protocols.is_empty() {
        put_alpn(&mut extensions, alpn_protocols);
    }

    body.put_u16(extensions.len() as u16);
    body.put_slice(&extensions);
    frame_handshake(msg::CLIENT_HELLO, &body)
}

fn put_extension_header(buf: &mut BytesMut, extension_type: u16, data_len: usize) {
    buf.put_u16(extension_type);
    buf.put_u16(data_len as u16);
}

fn put_server_name(buf: &mut BytesMut, server_name: &str) {
    let name = server_name.as_bytes();
    put_extension_header(buf, ext::SERVER_NAME, name.len() + 5);
    buf.put_u16((name.len() + 3) as u16); // server name list
    buf.put_u8(0); // name_type host_name
    buf.put_u16(name.len() as u16);
    buf.put_slice(name);
}

fn put_supported_versions(buf: &mut BytesMut) {
    put_extension_header(buf, ext::SUPPORTED_VERSIONS, 3);
    buf.put_u8(2);
    buf.put_u16(TLS13_VERSION);
}

fn put_supported_groups(buf: &mut BytesMut) {
    put_extension_header(buf, ext::SUPPORTED_GROUPS, 4);
    buf.put_u16(2);
    buf.put_u16(GROUP_X25519);
}

fn put_signature_algorithms(buf: &mut BytesMut) {
    // ecdsa_secp256r1_sha256, ed25519, rsa_pss_rsae_sha256, rsa_pkcs1_sha256
    let schemes: [u16; 4] = [0x0403, 0x0807, 0x0804, 0x0401];
    put_extension_header(buf, ext::SIGNATURE_ALGORITHMS, 2 + schemes.len() * 2);
    buf.put_u16((schemes.len() * 2) as u16);
    for scheme in schemes {
        buf.put_u16(scheme);
    }
}

fn put_key_share(buf: &mut BytesMut, public_key: &[u8]) {
    put_extension_header(buf, ext::KEY_SHARE, public_key.len() + 6);
    buf.put_u16((public_key.len() + 4) as u16); // client shares list
    buf.put_u16(GROUP_X25519);
    buf.put_u16(public_key.len() as u16);
    buf.put_slice(public_key);
}

fn put_alpn(buf: &mut BytesMut, protocols: &[String]) {
    let list_len: usize = protocols.iter().map(|p| p.len() + 1).sum();
    put_extension_header(buf, ext::ALPN, list_len + 2);
    buf.put_u16(list_len as u16);
    for protocol in protocols {
        buf.put_u8(protocol.len() as u8);
        buf.put_slice(protocol.as_bytes());
    }
}

/// A parsed ServerHello
#[derive(Debug, Clone)]
pub struct ServerHello {
    pub legacy_version: u16,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suite: u16,
    pub extensions: Vec<Extension>,
}

impl ServerHello {
    /// The version the server selected via supported_versions, falling
    /// back to the legacy field
    pub fn selected_version(&self) -> u16 {
        self.extensions
            .iter()
            .find_map(|e| match e {
                Extension::SupportedVersions(versions) => versions.first().copied(),
                _ => None,
            })
            .unwrap_or(self.legacy_version)
    }

    pub fn key_share(&self) -> Option<(u16, &[u8])> {
        self.extensions.iter().find_map(|e| match e {
            Extension::KeyShare { group, public_key } => Some((*group, public_key.as_slice())),
            _ => None,
        })
    }
}

pub fn parse_server_hello(body: &[u8]) -> Result<ServerHello> {
    let mut reader = Reader::new(body);
    let legacy_version = reader.read_u16()?;
    let mut random = [0u8; 32];
    random.copy_from_slice(reader.read_bytes(32)?);
    let session_id_len = reader.read_u8()? as usize;
    let session_id = reader.read_bytes(session_id_len)?.to_vec();
    let cipher_suite = reader.read_u16()?;
    let _compression = reader.read_u8()?;
    let extensions = parse_extensions(&mut reader, ExtensionContext::ServerFlight)?;
    Ok(ServerHello { legacy_version, random, session_id, cipher_suite, extensions })
}

/// Parse a ClientHello body back into its fields
pub fn parse_client_hello(body: &[u8]) -> Result<ClientHello> {
    let mut reader = Reader::new(body);
    let _legacy_version = reader.read_u16()?;
    let mut random = [0u8; 32];
    random.copy_from_slice(reader.read_bytes(32)?);
    let session_id_len = reader.read_u8()? as usize;
    let session_id = reader.read_bytes(session_id_len)?.to_vec();
    let suites_len = reader.read_u16()? as usize;
    if suites_len % 2 != 0 {
        return Err(NetError::Protocol("odd cipher suite list length".to_string()));
    }
    let mut cipher_suites = Vec::with_capacity(suites_len / 2);
    for _ in 0..suites_len / 2 {
        cipher_suites.push(reader.read_u16()?);
    }
    let compression_len = reader.read_u8()? as usize;
    reader.read_bytes(compression_len)?;
    let extensions = parse_extensions(&mut reader, ExtensionContext::ClientHello)?;
    Ok(ClientHello { random, session_id, cipher_suites, extensions })
}

pub fn parse_encrypted_extensions(body: &[u8]) -> Result<Vec<Extension>> {
    let mut reader = Reader::new(body);
    parse_extensions(&mut reader, ExtensionContext::ServerFlight)
}

/// DER certificates from a Certificate message, leaf first
pub fn parse_certificate_msg(body: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut reader = Reader::new(body);
    let context_len = reader.read_u8()? as usize;
    reader.read_bytes(context_len)?;
    let list_len = reader.read_u24()? as usize;
    let mut list = Reader::new(reader.read_bytes(list_len)?);
    let mut certificates = Vec::new();
    while !list.at_end() {
        let cert_len = list.read_u24()? as usize;
        certificates.push(list.read_bytes(cert_len)?.to_vec());
        let extensions_len = list.read_u16()? as usize;
        list.read_bytes(extensions_len)?;
    }
    Ok(certificates)
}

/// Signature scheme and signature bytes from a CertificateVerify message
pub fn parse_certificate_verify(body: &[u8]) -> Result<(u16, Vec<u8>)> {
    let mut reader = Reader::new(body);
    let scheme = reader.read_u16()?;
    let signature_len = reader.read_u16()? as usize;
    Ok((scheme, reader.read_bytes(signature_len)?.to_vec()))
}

/// A Finished body is the verify_data itself
pub fn parse_finished(body: &[u8]) -> Result<Vec<u8>> {
    if body.is_empty() {
        return Err(NetError::Protocol("empty Finished message".to_string()));
    }
    Ok(body.to_vec())
}

/// A parsed NewSessionTicket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionTicket {
    pub lifetime_secs: u32,
    pub age_add: u32,
    pub nonce: Vec<u8>,
    pub ticket: Vec<u8>,
}

pub fn parse_new_session_ticket(body: &[u8]) -> Result<NewSessionTicket> {
    let mut reader = Reader::new(body);
    let lifetime_secs = reader.read_u32()?;
    let age_add = reader.read_u32()?;
    let nonce_len = reader.read_u8()? as usize;
    let nonce = reader.read_bytes(nonce_len)?.to_vec();
    let ticket_len = reader.read_u16()? as usize;
    let ticket = reader.read_bytes(ticket_len)?.to_vec();
    // trailing extensions are not interpreted
    Ok(NewSessionTicket { lifetime_secs, age_add, nonce, ticket })
}

pub fn build_alert(level: u8, description: u8) -> [u8; 2] {
    [level, description]
}

pub fn parse_alert(body: &[u8]) -> Result<(u8, u8)> {
    if body.len() < 2 {
        return Err(NetError::Protocol("alert shorter than 2 bytes".to_string()));
    }
    Ok((body[0], body[1]))
}

/// The same extension code can carry different shapes in a ClientHello
/// versus the server flight
#[derive(Clone, Copy, PartialEq, Eq)]
enum ExtensionContext {
    ClientHello,
    ServerFlight,
}

fn parse_extensions(reader: &mut Reader<'_>, context: ExtensionContext) -> Result<Vec<Extension>> {
    if reader.at_end() {
        return Ok(Vec::new());
    }
    let total = reader.read_u16()? as usize;
    let mut block = Reader::new(reader.read_bytes(total)?);
    let mut extensions = Vec::new();
    while !block.at_end() {
        let extension_type = block.read_u16()?;
        let data_len = block.read_u16()? as usize;
        let data = block.read_bytes(data_len)?;
        extensions.push(parse_extension(extension_type, data, context)?);
    }
    Ok(extensions)
}

fn parse_extension(extension_type: u16, data: &[u8], context: ExtensionContext) -> Result<Extension> {
    let mut reader = Reader::new(data);
    match extension_type {
        ext::SERVER_NAME => {
            if data.is_empty() {
                // the server acknowledges SNI with an empty body
                return Ok(Extension::ServerName(String::new()));
            }
            let _list_len = reader.read_u16()?;
            let _name_type = reader.read_u8()?;
            let name_len = reader.read_u16()? as usize;
            let name = reader.read_bytes(name_len)?;
            Ok(Extension::ServerName(String::from_utf8_lossy(name).into_owned()))
        }
        ext::SUPPORTED_VERSIONS => match context {
            ExtensionContext::ServerFlight => Ok(Extension::SupportedVersions(vec![reader.read_u16()?])),
            ExtensionContext::ClientHello => {
                let list_len = reader.read_u8()? as usize;
                let mut versions = Vec::with_capacity(list_len / 2);
                for _ in 0..list_len / 2 {
                    versions.push(reader.read_u16()?);
                }
                Ok(Extension::SupportedVersions(versions))
            }
        },
        ext::KEY_SHARE => match context {
            ExtensionContext::ServerFlight => {
                let group = reader.read_u16()?;
                if reader.at_end() {
                    // HelloRetryRequest form carries the group alone
                    return Ok(Extension::KeyShare { group, public_key: Vec::new() });
                }
                let key_len = reader.read_u16()? as usize;
                let public_key = reader.read_bytes(key_len)?.to_vec();
                Ok(Extension::KeyShare { group, public_key })
            }
            ExtensionContext::ClientHello => {
                let list_len = reader.read_u16()? as usize;
                let mut list = Reader::new(reader.read_bytes(list_len)?);
                let group = list.read_u16()?;
                let key_len = list.read_u16()? as usize;
                let public_key = list.read_bytes(key_len)?.to_vec();
                // only the first share is surfaced
                Ok(Extension::KeyShare { group, public_key })
            }
        },
        ext::ALPN => {
            let list_len = reader.read_u16()? as usize;
            let mut list = Reader::new(reader.read_bytes(list_len)?);
            let mut protocols = Vec::new();
            while !list.at_end() {
                let len = list.read_u8()? as usize;
                protocols.push(String::from_utf8_lossy(list.read_bytes(len)?).into_owned());
            }
            Ok(Extension::Alpn(protocols))
        }
        _ => Ok(Extension::Raw { extension_type, data: data.to_vec() }),
    }
}

/// Bounds-checked big-endian cursor used by every parser here
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let bytes = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or_else(|| NetError::Protocol("handshake message truncated".to_string()))?;
        self.pos += len;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u24(&mut self) -> Result<u32> {
        let b = self.read_bytes(3)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}
