use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const HASH_LEN: usize = 32;

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; HASH_LEN] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// SHA-256 over the concatenated handshake messages exchanged so far
pub fn transcript_hash(transcript: &[u8]) -> [u8; HASH_LEN] {
    Sha256::digest(transcript).into()
}

// ---------------------------------------------------------------------------
// TLS 1.2 pseudo-random function (RFC 5246 §5)
// ---------------------------------------------------------------------------

/// P_SHA256: A(0) = seed, A(i) = HMAC(secret, A(i-1)), output is the
/// concatenation of HMAC(secret, A(i) || seed) truncated to `len`
pub fn p_sha256(secret: &[u8], seed: &[u8], len: usize) -> Vec<u8> {
    let mut output = Vec::with_capacity(len + HASH_LEN);
    let mut a = hmac_sha256(secret, seed);
    while output.len() < len {
        let mut block = Vec::with_capacity(HASH_LEN + seed.len());
        block.extend_from_slice(&a);
        block.extend_from_slice(seed);
        output.extend_from_slice(&hmac_sha256(secret, &block));
        a = hmac_sha256(secret, &a);
    }
    output.truncate(len);
    output
}

/// `PRF(secret, label, seed) = P_SHA256(secret, label || seed)`
pub fn prf(secret: &[u8], label: &str, seed: &[u8], len: usize) -> Vec<u8> {
    let mut label_seed = Vec::with_capacity(label.len() + seed.len());
    label_seed.extend_from_slice(label.as_bytes());
    label_seed.extend_from_slice(seed);
    p_sha256(secret, &label_seed, len)
}

/// TLS 1.2 master secret: 48 bytes from the premaster secret and both
/// randoms in client-then-server order
pub fn master_secret_v12(premaster: &[u8], client_random: &[u8], server_random: &[u8]) -> Vec<u8> {
    let mut seed = Vec::with_capacity(client_random.len() + server_random.len());
    seed.extend_from_slice(client_random);
    seed.extend_from_slice(server_random);
    prf(premaster, "master secret", &seed, 48)
}

/// Byte widths of the legacy key block, per cipher family
///
/// MAC length is zero for AEAD families; key 16 for AES-128, 32 for
/// AES-256 and ChaCha20; IV 12 for GCM/CCM/ChaCha20 and 16 for CBC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMaterialSpec {
    pub mac_len: usize,
    pub key_len: usize,
    pub iv_len: usize,
}

/// The TLS 1.2 key block split in its standard order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyKeyBlock {
    pub client_mac: Vec<u8>,
    pub server_mac: Vec<u8>,
    pub client_key: Vec<u8>,
    pub server_key: Vec<u8>,
    pub client_iv: Vec<u8>,
    pub server_iv: Vec<u8>,
}

/// Expand the master secret into session keys with the "key expansion"
/// label and a server-then-client seed
pub fn key_block_v12(
    master: &[u8],
    client_random: &[u8],
    server_random: &[u8],
    spec: KeyMaterialSpec,
) -> LegacyKeyBlock {
    let mut seed = Vec::with_capacity(client_random.len() + server_random.len());
    seed.extend_from_slice(server_random);
    seed.extend_from_slice(client_random);
    let total = 2 * spec.mac_len + 2 * spec.key_len + 2 * spec.iv_len;
    let block = prf(master, "key expansion", &seed, total);

    let mut offset = 0;
    let mut take = |len: usize| {
        let slice = block[offset..offset + len].to_vec();
        offset += len;
        slice
    };
    LegacyKeyBlock {
        client_mac: take(spec.mac_len),
        server_mac: take(spec.mac_len),
        client_key: take(spec.key_len),
        server_key: take(spec.key_len),
        client_iv: take(spec.iv_len),
        server_iv: take(spec.iv_len),
    }
}

// ---------------------------------------------------------------------------
// TLS 1.3 HKDF schedule (RFC 8446 §7.1), SHA-256 throughout
// ---------------------------------------------------------------------------

/// `HKDF-Extract(salt, ikm) = HMAC(salt, ikm)`
pub fn hkdf_extract(salt: &[u8], ikm: &[u8]) -> [u8; HASH_LEN] {
    hmac_sha256(salt, ikm)
}

/// `HKDF-Expand(prk, info, len)`
pub fn hkdf_expand(prk: &[u8], info: &[u8], len: usize) -> Vec<u8> {
    let mut output = Vec::with_capacity(len + HASH_LEN);
    let mut block: Vec<u8> = Vec::new();
    let mut counter = 1u8;
    while output.len() < len {
        let mut data = Vec::with_capacity(block.len() + info.len() + 1);
        data.extend_from_slice(&block);
        data.extend_from_slice(info);
        data.push(counter);
        block = hmac_sha256(prk, &data).to_vec();
        output.extend_from_slice(&block);
        counter += 1;
    }
    output.truncate(len);
    output
}

/// `HKDF-Expand-Label` with the mandatory `tls13 ` label prefix and the
/// HkdfLabel struct `{u16 length, opaque label<7..255>, opaque context<0..255>}`
pub fn hkdf_expand_label(secret: &[u8], label: &str, context: &[u8], len: usize) -> Vec<u8> {
    let full_label = format!("tls13 {label}");
    let mut info = Vec::with_capacity(4 + full_label.len() + context.len());
    info.extend_from_slice(&(len as u16).to_be_bytes());
    info.push(full_label.len() as u8);
    info.extend_from_slice(full_label.as_bytes());
    info.push(context.len() as u8);
    info.extend_from_slice(context);
    hkdf_expand(secret, &info, len)
}

/// `Derive-Secret(secret, label, messages) = HKDF-Expand-Label(secret,
/// label, Hash(messages), 32)`
pub fn derive_secret(secret: &[u8], label: &str, transcript: &[u8]) -> [u8; HASH_LEN] {
    let hash = transcript_hash(transcript);
    let expanded = hkdf_expand_label(secret, label, &hash, HASH_LEN);
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&expanded);
    out
}

fn to_hash(bytes: Vec<u8>) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&bytes);
    out
}

/// Client and server secrets for one phase of the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficSecrets {
    pub client: [u8; HASH_LEN],
    pub server: [u8; HASH_LEN],
}

/// Early secret with no PSK: `HKDF-Extract(0, 0)`
pub fn early_secret() -> [u8; HASH_LEN] {
    hkdf_extract(&[0u8; HASH_LEN], &[0u8; HASH_LEN])
}

/// Handshake secret and both handshake traffic secrets from the ECDHE
/// shared secret and the ClientHello..ServerHello transcript hash
pub fn handshake_secrets(shared_secret: &[u8], hello_hash: &[u8; HASH_LEN]) -> ([u8; HASH_LEN], TrafficSecrets) {
    let early = early_secret();
    let derived = derive_secret(&early, "derived", b"");
    let handshake_secret = hkdf_extract(&derived, shared_secret);
    let secrets = TrafficSecrets {
        client: to_hash(hkdf_expand_label(&handshake_secret, "c hs traffic", hello_hash, HASH_LEN)),
        server: to_hash(hkdf_expand_label(&handshake_secret, "s hs traffic", hello_hash, HASH_LEN)),
    };
    (handshake_secret, secrets)
}

/// Master secret and both application traffic secrets from the transcript
/// hash through the server Finished
pub fn application_secrets(
    handshake_secret: &[u8; HASH_LEN],
    full_hash: &[u8; HASH_LEN],
) -> ([u8; HASH_LEN], TrafficSecrets) {
    let derived = derive_secret(handshake_secret, "derived", b"");
    let master_secret = hkdf_extract(&derived, &[0u8; HASH_LEN]);
    let secrets = TrafficSecrets {
        client: to_hash(hkdf_expand_label(&master_secret, "c ap traffic", full_hash, HASH_LEN)),
        server: to_hash(hkdf_expand_label(&master_secret, "s ap traffic", full_hash, HASH_LEN)),
    };
    (master_secret, secrets)
}

/// `verify_data` for a Finished message: HMAC of the transcript hash with
/// the expand-label "finished" key
pub fn finished_verify_data(traffic_secret: &[u8; HASH_LEN], transcript_hash: &[u8; HASH_LEN]) -> [u8; HASH_LEN] {
    let finished_key = hkdf_expand_label(traffic_secret, "finished", b"", HASH_LEN);
    hmac_sha256(&finished_key, transcript_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_early_secret_is_the_known_constant() {
        // HKDF-Extract with all-zero salt and IKM over SHA-256
        assert_eq!(
            early_secret(),
            hex!("33ad0a1c607ec03b09e6cd9893680ce210adf300aa1f2660e1b22e10f170f92a")
        );
    }

    #[test]
    fn test_hkdf_expand_label_returns_exact_length() {
        let secret = [7u8; 32];
        for len in [1usize, 12, 16, 32, 48, 100] {
            assert_eq!(hkdf_expand_label(&secret, "key", b"", len).len(), len);
        }
    }

    #[test]
    fn test_hkdf_expand_rfc5869_case_1() {
        // RFC 5869 appendix A.1
        let ikm = hex!("0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b");
        let salt = hex!("000102030405060708090a0b0c");
        let info = hex!("f0f1f2f3f4f5f6f7f8f9");
        let prk = hkdf_extract(&salt, &ikm);
        assert_eq!(
            prk,
            hex!("077709362c2e32df0ddc3f0dc47bba6390b6c73bb50f9c3122ec844ad7c2b3e5")
        );
        let okm = hkdf_expand(&prk, &info, 42);
        assert_eq!(
            okm,
            hex!("3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865")
        );
    }

    #[test]
    fn test_prf_is_deterministic_and_sized() {
        let a = prf(b"secret", "master secret", b"seed", 48);
        let b = prf(b"secret", "master secret", b"seed", 48);
        assert_eq!(a, b);
        assert_eq!(a.len(), 48);
        // a different label changes the output
        assert_ne!(a, prf(b"secret", "key expansion", b"seed", 48));
    }

    #[test]
    fn test_master_secret_v12_length() {
        assert_eq!(master_secret_v12(&[1u8; 48], &[2u8; 32], &[3u8; 32]).len(), 48);
    }

    #[test]
    fn test_key_block_split_order_and_sizes() {
        let spec = KeyMaterialSpec { mac_len: 32, key_len: 16, iv_len: 16 };
        let block = key_block_v12(&[1u8; 48], &[2u8; 32], &[3u8; 32], spec);
        assert_eq!(block.client_mac.len(), 32);
        assert_eq!(block.server_mac.len(), 32);
        assert_eq!(block.client_key.len(), 16);
        assert_eq!(block.server_key.len(), 16);
        assert_eq!(block.client_iv.len(), 16);
        assert_eq!(block.server_iv.len(), 16);
        assert_ne!(block.client_key, block.server_key);
    }

    #[test]
    fn test_aead_key_block_has_no_mac_slices() {
        let spec = KeyMaterialSpec { mac_len: 0, key_len: 16, iv_len: 12 };
        let block = key_block_v12(&[1u8; 48], &[2u8; 32], &[3u8; 32], spec);
        assert!(block.client_mac.is_empty());
        assert!(block.server_mac.is_empty());
        assert_eq!(block.client_iv.len(), 12);
    }

    #[test]
    fn test_traffic_secrets_differ_by_direction() {
        let hello_hash = transcript_hash(b"client hello server hello");
        let (handshake_secret, hs) = handshake_secrets(&[9u8; 32], &hello_hash);
        assert_ne!(hs.client, hs.server);

        let full_hash = transcript_hash(b"entire handshake");
        let (master, app) = application_secrets(&handshake_secret, &full_hash);
        assert_ne!(app.client, app.server);
        assert_ne!(master, handshake_secret);
        assert_ne!(app.client, hs.client);
    }

    #[test]
    fn test_finished_verify_data_depends_on_transcript() {
        let secret = [5u8; 32];
        let a = finished_verify_data(&secret, &transcript_hash(b"one"));
        let b = finished_verify_data(&secret, &transcript_hash(b"two"));
        assert_ne!(a, b);
    }
}
