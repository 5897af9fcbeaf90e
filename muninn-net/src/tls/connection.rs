use crate::cert::{parse_certificate, validate_certificate, Certificate};
use crate::config::{TlsConfig, TlsVersion};
use crate::error::{NetError, Result};
use crate::socket::Socket;
use crate::tls::key_schedule::{
    application_secrets, finished_verify_data, handshake_secrets, transcript_hash,
};
use crate::tls::record::{
    encode_plaintext_record, DirectionKeys, RecordHeader, HEADER_LEN, MAX_CIPHERTEXT_LEN,
};
use crate::tls::wire::{
    self, build_client_hello, frame_handshake, msg, parse_alert, parse_certificate_msg,
    parse_encrypted_extensions, parse_finished, parse_handshake_frames, parse_new_session_ticket,
    parse_server_hello, Extension, HandshakeMessage, GROUP_X25519, TLS13_VERSION,
};
use crate::tls::{AlertDescription, AlertLevel, CipherSuite, ContentType};
use bytes::{Buf, BytesMut};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::VecDeque;
use tracing::{debug, trace, warn};
use x25519_dalek::{EphemeralSecret, PublicKey};

/// Handshake progress of a TLS connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsState {
    None,
    ClientHello,
    ServerHello,
    Certificate,
    KeyExchange,
    Established,
    Error,
}

/// A NewSessionTicket retained for resumption
#[derive(Debug, Clone)]
pub struct SessionTicket {
    pub ticket: Vec<u8>,
    pub nonce: Vec<u8>,
    pub lifetime_ms: u64,
    pub received_at_ms: i64,
}

/// TLS 1.3 client connection over an owned [`Socket`]
///
/// Drives the handshake to `Established`, then exposes encrypted
/// `read`/`write` through the record layer.
pub struct TlsConnection {
    socket: Socket,
    config: TlsConfig,
    state: TlsState,
    suite: Option<CipherSuite>,
    transcript: Vec<u8>,
    send_keys: Option<DirectionKeys>,
    recv_keys: Option<DirectionKeys>,
    negotiated_alpn: Option<String>,
    peer_certificate: Option<Certificate>,
    session_tickets: Vec<SessionTicket>,
    pending_handshake: VecDeque<HandshakeMessage>,
    plain_buf: BytesMut,
}

impl TlsConnection {
    pub fn new(socket: Socket, config: TlsConfig) -> Self {
        Self {
            socket,
            config,
            state: TlsState::None,
            suite: None,
            transcript: Vec::new(),
            send_keys: None,
            recv_keys: None,
            negotiated_alpn: None,
            peer_certificate: None,
            session_tickets: Vec::new(),
            pending_handshake: VecDeque::new(),
            plain_buf: BytesMut::new(),
        }
    }

    pub fn state(&self) -> TlsState {
        self.state
    }

    /// The ALPN protocol the server selected, when any
    pub fn alpn_protocol(&self) -> Option<&str> {
        self.negotiated_alpn.as_deref()
    }

    pub fn peer_certificate(&self) -> Option<&Certificate> {
        self.peer_certificate.as_ref()
    }

    pub fn session_tickets(&self) -> &[SessionTicket] {
        &self.session_tickets
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    /// Run the client handshake to completion
    pub async fn handshake(&mut self) -> Result<()> {
        if self.state != TlsState::None {
            return Err(NetError::State(format!(
                "handshake requires a fresh connection, state is {:?}",
                self.state
            )));
        }
        if self.config.min_version < TlsVersion::V1_3 || self.config.max_version < TlsVersion::V1_3 {
            // the 1.2 PRF exists but no 1.2 handshake does
            return Err(NetError::Handshake(
                "TLS below 1.3 is not implemented; raise min_version to 1.3".to_string(),
            ));
        }
        match self.run_handshake().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = TlsState::Error;
                Err(e)
            }
        }
    }

    async fn run_handshake(&mut self) -> Result<()> {
        let server_name = self.config.server_name.clone().unwrap_or_default();

        // ClientHello with a fresh random and an ephemeral X25519 pair
        let mut client_random = [0u8; 32];
        OsRng.fill_bytes(&mut client_random);
        let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
        let public_key = PublicKey::from(&ephemeral_secret);

        let client_hello = build_client_hello(
            &client_random,
            &self.config.cipher_suites,
            &server_name,
            public_key.as_bytes(),
            &self.config.alpn_protocols,
        );
        self.socket
            .write_all(&encode_plaintext_record(ContentType::Handshake, &client_hello))
            .await?;
        self.transcript.extend_from_slice(&client_hello);
        self.state = TlsState::ClientHello;
        debug!(%server_name, "sent ClientHello");

        // ServerHello
        let message = self.read_plaintext_handshake().await?;
        if message.msg_type != msg::SERVER_HELLO {
            return Err(NetError::Handshake(format!(
                "expected ServerHello, received {}",
                message.name()
            )));
        }
        self.transcript.extend_from_slice(&message.framed());
        let server_hello = parse_server_hello(&message.body)?;
        if server_hello.selected_version() != TLS13_VERSION {
            return Err(NetError::Handshake("server did not negotiate TLS 1.3".to_string()));
        }
        let suite = CipherSuite::from_code(server_hello.cipher_suite).ok_or_else(|| {
            NetError::Handshake(format!(
                "server selected unknown cipher suite 0x{:04x}",
                server_hello.cipher_suite
            ))
        })?;
        if !self.config.cipher_suites.contains(&suite) {
            return Err(NetError::Handshake(format!(
                "server selected {} which was not offered",
                suite.name()
            )));
        }
        self.suite = Some(suite);
        let (group, server_share) = server_hello
            .key_share()
            .ok_or_else(|| NetError::Handshake("ServerHello carried no key_share".to_string()))?;
        if group != GROUP_X25519 {
            return Err(NetError::Handshake(format!("server chose unsupported group 0x{group:04x}")));
        }
        let server_public: [u8; 32] = server_share
            .try_into()
            .map_err(|_| NetError::Handshake("x25519 key share must be 32 bytes".to_string()))?;
        self.state = TlsState::ServerHello;
        debug!(suite = suite.name(), "received ServerHello");

        // genuine ECDHE; the shared secret is never fabricated
        let shared_secret = ephemeral_secret.diffie_hellman(&PublicKey::from(server_public));
        if !shared_secret.was_contributory() {
            return Err(NetError::Handshake("non-contributory X25519 key share".to_string()));
        }
        let hello_hash = transcript_hash(&self.transcript);
        let (handshake_secret, handshake_traffic) =
            handshake_secrets(shared_secret.as_bytes(), &hello_hash);
        self.send_keys = Some(DirectionKeys::from_secret(&handshake_traffic.client, suite));
        self.recv_keys = Some(DirectionKeys::from_secret(&handshake_traffic.server, suite));

        // encrypted server flight through Finished
        loop {
            let message = self.read_encrypted_handshake().await?;
            match message.msg_type {
                msg::ENCRYPTED_EXTENSIONS => {
                    let extensions = parse_encrypted_extensions(&message.body)?;
                    self.negotiated_alpn = extensions.iter().find_map(|e| match e {
                        Extension::Alpn(protocols) => protocols.first().cloned(),
                        _ => None,
                    });
                    self.transcript.extend_from_slice(&message.framed());
                }
                msg::CERTIFICATE => {
                    let certificates = parse_certificate_msg(&message.body)?;
                    let leaf_der = certificates
                        .first()
                        .ok_or_else(|| NetError::Handshake("empty Certificate message".to_string()))?;
                    let certificate = parse_certificate(leaf_der)?;
                    if self.config.verify_peer_certificate {
                        self.validate_peer(&certificate, &server_name)?;
                    }
                    self.peer_certificate = Some(certificate);
                    self.transcript.extend_from_slice(&message.framed());
                    self.state = TlsState::Certificate;
                }
                msg::CERTIFICATE_VERIFY => {
                    // TODO: check the CertificateVerify signature over the
                    // transcript with the leaf public key
                    self.transcript.extend_from_slice(&message.framed());
                    self.state = TlsState::KeyExchange;
                }
                msg::FINISHED => {
                    let verify_data = parse_finished(&message.body)?;
                    let expected = finished_verify_data(
                        &handshake_traffic.server,
                        &transcript_hash(&self.transcript),
                    );
                    if verify_data != expected {
                        return Err(NetError::Handshake(
                            "server Finished verification failed".to_string(),
                        ));
                    }
                    self.transcript.extend_from_slice(&message.framed());
                    self.state = TlsState::KeyExchange;
                    break;
                }
                msg::CERTIFICATE_REQUEST => {
                    return Err(NetError::Handshake(
                        "client certificates are not supported".to_string(),
                    ));
                }
                other => {
                    return Err(NetError::Handshake(format!(
                        "unexpected {} during the server flight",
                        wire::handshake_message_name(other)
                    )));
                }
            }
        }

        if self.config.verify_peer_certificate && self.peer_certificate.is_none() {
            return Err(NetError::Handshake("server sent no Certificate message".to_string()));
        }

        // application secrets from the transcript through server Finished
        let full_hash = transcript_hash(&self.transcript);
        let (_master_secret, application_traffic) = application_secrets(&handshake_secret, &full_hash);

        // client Finished goes out under the handshake keys
        let verify_data = finished_verify_data(&handshake_traffic.client, &full_hash);
        let finished = frame_handshake(msg::FINISHED, &verify_data);
        let record = self
            .send_keys
            .as_mut()
            .ok_or_else(|| NetError::Handshake("send keys missing".to_string()))?
            .seal(ContentType::Handshake, &finished)?;
        self.socket.write_all(&record).await?;
        self.transcript.extend_from_slice(&finished);

        self.send_keys = Some(DirectionKeys::from_secret(&application_traffic.client, suite));
        self.recv_keys = Some(DirectionKeys::from_secret(&application_traffic.server, suite));
        self.state = TlsState::Established;
        debug!(alpn = ?self.negotiated_alpn, "handshake complete");
        Ok(())
    }

    fn validate_peer(&self, certificate: &Certificate, server_name: &str) -> Result<()> {
        let result = if self.config.allow_self_signed && certificate.is_self_signed() {
            let mut trust = self.config.trusted_cas.clone();
            trust.push(certificate.clone());
            validate_certificate(certificate, server_name, &trust)
        } else {
            validate_certificate(certificate, server_name, &self.config.trusted_cas)
        };
        if result.valid {
            Ok(())
        } else {
            Err(NetError::Certificate(
                result.reason.unwrap_or_else(|| "certificate validation failed".to_string()),
            ))
        }
    }

    /// Encrypt and send application data; returns the plaintext bytes accepted
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.state != TlsState::Established {
            return Err(NetError::State(format!(
                "write requires an established connection, state is {:?}",
                self.state
            )));
        }
        for chunk in data.chunks(16384) {
            let record = self
                .send_keys
                .as_mut()
                .ok_or_else(|| NetError::State("connection has no send keys".to_string()))?
                .seal(ContentType::ApplicationData, chunk)?;
            self.socket.write_all(&record).await?;
        }
        trace!(bytes = data.len(), "wrote application data");
        Ok(data.len())
    }

    /// Read decrypted application data; `Ok(0)` after close_notify or a
    /// clean transport end-of-stream
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.state != TlsState::Established {
            return Err(NetError::State(format!(
                "read requires an established connection, state is {:?}",
                self.state
            )));
        }
        loop {
            if !self.plain_buf.is_empty() {
                let n = buf.len().min(self.plain_buf.len());
                buf[..n].copy_from_slice(&self.plain_buf[..n]);
                self.plain_buf.advance(n);
                return Ok(n);
            }
            let Some((header, body)) = self.read_record().await? else {
                return Ok(0);
            };
            match ContentType::from_code(header.content_type) {
                Some(ContentType::ApplicationData) => {
                    let keys = self
                        .recv_keys
                        .as_mut()
                        .ok_or_else(|| NetError::State("connection has no receive keys".to_string()))?;
                    let (inner_type, plaintext) = keys.open(&header, &body)?;
                    match inner_type {
                        ContentType::ApplicationData => self.plain_buf.extend_from_slice(&plaintext),
                        ContentType::Handshake => self.handle_post_handshake(&plaintext)?,
                        ContentType::Alert => {
                            if self.handle_alert(&plaintext)? {
                                return Ok(0);
                            }
                        }
                        ContentType::ChangeCipherSpec => {
                            return Err(NetError::Protocol("Unexpected record type 20".to_string()))
                        }
                    }
                }
                Some(ContentType::Alert) => {
                    if self.handle_alert(&body)? {
                        return Ok(0);
                    }
                }
                Some(other) => {
                    return Err(NetError::Protocol(format!(
                        "Unexpected record type {}",
                        other.code()
                    )));
                }
                None => {
                    return Err(NetError::Protocol(format!(
                        "Unexpected record type {}",
                        header.content_type
                    )));
                }
            }
        }
    }

    /// Send close_notify and close the socket; the connection returns to
    /// the initial state
    pub async fn close(&mut self) -> Result<()> {
        if self.state == TlsState::Established {
            let alert = wire::build_alert(AlertLevel::Warning.code(), AlertDescription::CloseNotify.code());
            let sealed = self
                .send_keys
                .as_mut()
                .map(|keys| keys.seal(ContentType::Alert, &alert))
                .transpose();
            match sealed {
                Ok(Some(record)) => {
                    if let Err(e) = self.socket.write_all(&record).await {
                        debug!(error = %e, "close_notify was not delivered");
                    }
                }
                Ok(None) => {}
                Err(e) => debug!(error = %e, "close_notify could not be sealed"),
            }
        }
        self.socket.close().await?;
        self.state = TlsState::None;
        Ok(())
    }

    /// NewSessionTicket and friends arriving after the handshake
    fn handle_post_handshake(&mut self, plaintext: &[u8]) -> Result<()> {
        for message in parse_handshake_frames(plaintext)? {
            match message.msg_type {
                msg::NEW_SESSION_TICKET => {
                    let ticket = parse_new_session_ticket(&message.body)?;
                    if self.config.enable_session_resumption {
                        let lifetime_ms = u64::from(ticket.lifetime_secs)
                            .saturating_mul(1000)
                            .min(self.config.session_ticket_lifetime_ms);
                        self.session_tickets.push(SessionTicket {
                            ticket: ticket.ticket,
                            nonce: ticket.nonce,
                            lifetime_ms,
                            received_at_ms: chrono::Utc::now().timestamp_millis(),
                        });
                    } else {
                        trace!("discarding session ticket, resumption disabled");
                    }
                }
                msg::KEY_UPDATE => {
                    return Err(NetError::Handshake("KeyUpdate is not supported".to_string()));
                }
                other => {
                    warn!(message = %wire::handshake_message_name(other), "ignoring post-handshake message");
                }
            }
        }
        Ok(())
    }

    /// Returns true when the alert was close_notify
    fn handle_alert(&mut self, body: &[u8]) -> Result<bool> {
        let (level, code) = parse_alert(body)?;
        let description = AlertDescription::from_code(code);
        if description == AlertDescription::CloseNotify {
            debug!("peer sent close_notify");
            return Ok(true);
        }
        if AlertLevel::from_code(level) == Some(AlertLevel::Fatal) {
            self.state = TlsState::Error;
        }
        Err(NetError::Handshake(format!("alert received: {description}")))
    }

    /// Next handshake message from unprotected records, skipping
    /// ChangeCipherSpec
    async fn read_plaintext_handshake(&mut self) -> Result<HandshakeMessage> {
        loop {
            if let Some(message) = self.pending_handshake.pop_front() {
                return Ok(message);
            }
            let Some((header, body)) = self.read_record().await? else {
                return Err(NetError::Handshake("connection closed during handshake".to_string()));
            };
            match ContentType::from_code(header.content_type) {
                Some(ContentType::Handshake) => {
                    self.pending_handshake.extend(parse_handshake_frames(&body)?);
                }
                Some(ContentType::ChangeCipherSpec) => continue,
                Some(ContentType::Alert) => {
                    self.handle_alert(&body)?;
                    return Err(NetError::Handshake("connection closed during handshake".to_string()));
                }
                _ => {
                    return Err(NetError::Protocol(format!(
                        "Unexpected record type {}",
                        header.content_type
                    )));
                }
            }
        }
    }

    /// Next handshake message from the encrypted server flight
    async fn read_encrypted_handshake(&mut self) -> Result<HandshakeMessage> {
        loop {
            if let Some(message) = self.pending_handshake.pop_front() {
                return Ok(message);
            }
            let Some((header, body)) = self.read_record().await? else {
                return Err(NetError::Handshake("connection closed during handshake".to_string()));
            };
            match ContentType::from_code(header.content_type) {
                Some(ContentType::ApplicationData) => {
                    let keys = self
                        .recv_keys
                        .as_mut()
                        .ok_or_else(|| NetError::State("connection has no receive keys".to_string()))?;
                    let (inner_type, plaintext) = keys.open(&header, &body)?;
                    match inner_type {
                        ContentType::Handshake => {
                            self.pending_handshake.extend(parse_handshake_frames(&plaintext)?);
                        }
                        ContentType::Alert => {
                            self.handle_alert(&plaintext)?;
                            return Err(NetError::Handshake(
                                "connection closed during handshake".to_string(),
                            ));
                        }
                        other => {
                            return Err(NetError::Protocol(format!(
                                "Unexpected record type {}",
                                other.code()
                            )));
                        }
                    }
                }
                Some(ContentType::ChangeCipherSpec) => continue,
                Some(ContentType::Alert) => {
                    self.handle_alert(&body)?;
                    return Err(NetError::Handshake("connection closed during handshake".to_string()));
                }
                _ => {
                    return Err(NetError::Protocol(format!(
                        "Unexpected record type {}",
                        header.content_type
                    )));
                }
            }
        }
    }

    /// One record off the wire; `None` on a clean end-of-stream at a
    /// record boundary
    async fn read_record(&mut self) -> Result<Option<(RecordHeader, Vec<u8>)>> {
        let mut header_bytes = [0u8; HEADER_LEN];
        let mut read = 0;
        while read < HEADER_LEN {
            let n = self.socket.read(&mut header_bytes[read..]).await?;
            if n == 0 {
                if read == 0 {
                    return Ok(None);
                }
                return Err(NetError::Protocol("connection closed mid-record".to_string()));
            }
            read += n;
        }
        let header = RecordHeader::parse(&header_bytes);
        let length = header.length as usize;
        if length > MAX_CIPHERTEXT_LEN {
            return Err(NetError::Protocol(format!("record of {length} bytes overflows the limit")));
        }
        let mut body = vec![0u8; length];
        let mut read = 0;
        while read < length {
            let n = self.socket.read(&mut body[read..]).await?;
            if n == 0 {
                return Err(NetError::Protocol("connection closed mid-record".to_string()));
            }
            read += n;
        }
        Ok(Some((header, body)))
    }
}

impl std::fmt::Debug for TlsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnection")
            .field("state", &self.state)
            .field("suite", &self.suite)
            .field("alpn", &self.negotiated_alpn)
            .field("socket", &self.socket)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::AddressFamily;

    fn fresh_connection() -> TlsConnection {
        TlsConnection::new(Socket::stream(AddressFamily::V4), TlsConfig::default())
    }

    #[tokio::test]
    async fn test_versions_below_13_are_rejected() {
        let mut config = TlsConfig::default();
        config.min_version = TlsVersion::V1_2;
        let mut connection = TlsConnection::new(Socket::stream(AddressFamily::V4), config);
        let err = connection.handshake().await.expect_err("must reject");
        assert!(matches!(err, NetError::Handshake(_)));
        assert!(err.to_string().contains("1.3"));
    }

    #[tokio::test]
    async fn test_read_write_require_established() {
        let mut connection = fresh_connection();
        let mut buf = [0u8; 8];
        assert!(matches!(connection.read(&mut buf).await, Err(NetError::State(_))));
        assert!(matches!(connection.write(b"x").await, Err(NetError::State(_))));
    }

    #[tokio::test]
    async fn test_close_from_initial_state_is_clean() {
        let mut connection = fresh_connection();
        connection.close().await.expect("close");
        assert_eq!(connection.state(), TlsState::None);
    }

    #[test]
    fn test_handle_alert_distinguishes_close_notify() {
        let mut connection = fresh_connection();
        assert!(connection.handle_alert(&[1, 0]).expect("close_notify"));
        let err = connection.handle_alert(&[2, 40]).expect_err("fatal alert");
        assert!(err.to_string().contains("handshake_failure"));
        assert_eq!(connection.state(), TlsState::Error);
    }
}
