use crate::error::{NetError, Result};
use crate::tls::key_schedule::hkdf_expand_label;
use crate::tls::{CipherSuite, ContentType};
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, KeyInit, Nonce};
use chacha20poly1305::ChaCha20Poly1305;

pub const HEADER_LEN: usize = 5;
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
/// Plaintext limit plus AEAD expansion allowance (RFC 8446 §5.2)
pub const MAX_CIPHERTEXT_LEN: usize = 16384 + 256;

const RECORD_LEGACY_VERSION: u16 = 0x0303;

/// 5-byte record header `{type, legacy_version, length}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub content_type: u8,
    pub legacy_version: u16,
    pub length: u16,
}

impl RecordHeader {
    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Self {
        Self {
            content_type: bytes[0],
            legacy_version: u16::from_be_bytes([bytes[1], bytes[2]]),
            length: u16::from_be_bytes([bytes[3], bytes[4]]),
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.content_type;
        out[1..3].copy_from_slice(&self.legacy_version.to_be_bytes());
        out[3..5].copy_from_slice(&self.length.to_be_bytes());
        out
    }
}

/// Wrap a plaintext payload in an unprotected record
pub fn encode_plaintext_record(content_type: ContentType, payload: &[u8]) -> Vec<u8> {
    let header = RecordHeader {
        content_type: content_type.code(),
        legacy_version: RECORD_LEGACY_VERSION,
        length: payload.len() as u16,
    };
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out
}

/// AEAD key, static IV and sequence counter for one direction
///
/// The counter is strictly monotonic; record `n` is protected with
/// sequence `n - 1` counted from the last key change.
pub struct DirectionKeys {
    suite: CipherSuite,
    key: Vec<u8>,
    iv: [u8; IV_LEN],
    sequence: u64,
}

impl DirectionKeys {
    /// Map a traffic secret to AEAD key material
    ///
    /// 16-byte-key suites slice the secret directly (key = bytes 0..16,
    /// IV = bytes 16..28); 32-byte-key suites derive key and IV with
    /// `HKDF-Expand-Label` since the secret is too short to slice.
    pub fn from_secret(secret: &[u8; 32], suite: CipherSuite) -> Self {
        let key_len = suite.key_len();
        let (key, iv_bytes) = if key_len == 16 {
            (secret[..16].to_vec(), secret[16..28].to_vec())
        } else {
            (
                hkdf_expand_label(secret, "key", b"", key_len),
                hkdf_expand_label(secret, "iv", b"", IV_LEN),
            )
        };
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&iv_bytes);
        Self { suite, key, iv, sequence: 0 }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// `nonce = IV XOR sequence`, big-endian right-aligned
    pub fn nonce_for(&self, sequence: u64) -> [u8; IV_LEN] {
        let mut nonce = self.iv;
        for (i, byte) in sequence.to_be_bytes().iter().enumerate() {
            nonce[IV_LEN - 8 + i] ^= byte;
        }
        nonce
    }

    /// Protect `plaintext` carrying `inner_type`, returning a complete
    /// record and advancing the sequence counter
    pub fn seal(&mut self, inner_type: ContentType, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut inner = Vec::with_capacity(plaintext.len() + 1);
        inner.extend_from_slice(plaintext);
        inner.push(inner_type.code());

        let ciphertext_len = inner.len() + TAG_LEN;
        if ciphertext_len > MAX_CIPHERTEXT_LEN {
            return Err(NetError::Protocol(format!(
                "record of {ciphertext_len} bytes exceeds the ciphertext limit"
            )));
        }
        let header = RecordHeader {
            content_type: ContentType::ApplicationData.code(),
            legacy_version: RECORD_LEGACY_VERSION,
            length: ciphertext_len as u16,
        };
        let aad = header.encode();
        let nonce = self.nonce_for(self.sequence);
        let ciphertext = self.encrypt(&nonce, &aad, &inner)?;
        self.sequence += 1;

        let mut record = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        record.extend_from_slice(&aad);
        record.extend_from_slice(&ciphertext);
        Ok(record)
    }

    /// Open a protected record body, returning the inner content type and
    /// plaintext with the padding stripped
    pub fn open(&mut self, header: &RecordHeader, ciphertext: &[u8]) -> Result<(ContentType, Vec<u8>)> {
        let aad = header.encode();
        let nonce = self.nonce_for(self.sequence);
        let mut inner = self.decrypt(&nonce, &aad, ciphertext)?;
        self.sequence += 1;

        // strip zero padding, then the trailing inner content type
        while inner.last() == Some(&0) {
            inner.pop();
        }
        let type_code = inner
            .pop()
            .ok_or_else(|| NetError::Protocol("protected record with no content type".to_string()))?;
        let inner_type = ContentType::from_code(type_code)
            .ok_or_else(|| NetError::Protocol(format!("Unexpected record type {type_code}")))?;
        Ok((inner_type, inner))
    }

    fn encrypt(&self, nonce: &[u8; IV_LEN], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let payload = Payload { msg: plaintext, aad };
        match self.suite {
            CipherSuite::Aes128GcmSha256 => Aes128Gcm::new_from_slice(&self.key)
                .map_err(|_| internal_key_error())?
                .encrypt(Nonce::from_slice(nonce), payload)
                .map_err(|_| NetError::Protocol("record encryption failed".to_string())),
            CipherSuite::Aes256GcmSha384 => Aes256Gcm::new_from_slice(&self.key)
                .map_err(|_| internal_key_error())?
                .encrypt(Nonce::from_slice(nonce), payload)
                .map_err(|_| NetError::Protocol("record encryption failed".to_string())),
            CipherSuite::ChaCha20Poly1305Sha256 => ChaCha20Poly1305::new_from_slice(&self.key)
                .map_err(|_| internal_key_error())?
                .encrypt(Nonce::from_slice(nonce), payload)
                .map_err(|_| NetError::Protocol("record encryption failed".to_string())),
            CipherSuite::Aes128CcmSha256 => {
                Err(NetError::Handshake("TLS_AES_128_CCM_SHA256 has no AEAD backend".to_string()))
            }
        }
    }

    fn decrypt(&self, nonce: &[u8; IV_LEN], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let payload = Payload { msg: ciphertext, aad };
        match self.suite {
            CipherSuite::Aes128GcmSha256 => Aes128Gcm::new_from_slice(&self.key)
                .map_err(|_| internal_key_error())?
                .decrypt(Nonce::from_slice(nonce), payload)
                .map_err(|_| bad_record_mac()),
            CipherSuite::Aes256GcmSha384 => Aes256Gcm::new_from_slice(&self.key)
                .map_err(|_| internal_key_error())?
                .decrypt(Nonce::from_slice(nonce), payload)
                .map_err(|_| bad_record_mac()),
            CipherSuite::ChaCha20Poly1305Sha256 => ChaCha20Poly1305::new_from_slice(&self.key)
                .map_err(|_| internal_key_error())?
                .decrypt(Nonce::from_slice(nonce), payload)
                .map_err(|_| bad_record_mac()),
            CipherSuite::Aes128CcmSha256 => {
                Err(NetError::Handshake("TLS_AES_128_CCM_SHA256 has no AEAD backend".to_string()))
            }
        }
    }
}

fn internal_key_error() -> NetError {
    NetError::Handshake("AEAD key has the wrong length".to_string())
}

fn bad_record_mac() -> NetError {
    NetError::Protocol("bad record MAC".to_string())
}
