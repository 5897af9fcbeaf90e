use crate::cert::x509::Certificate;
use chrono::Utc;
use ed25519_dalek::Verifier as _;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::Pkcs1v15Sign;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use tracing::debug;

const MAX_CHAIN_DEPTH: usize = 10;

/// Result of validating a certificate against a hostname and trust store
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    /// First failing check, absent when valid
    pub reason: Option<String>,
    /// The chain `[leaf, issuer…, root]` when one could be built
    pub chain: Vec<Certificate>,
}

impl ValidationResult {
    fn failure(reason: impl Into<String>) -> Self {
        Self { valid: false, reason: Some(reason.into()), chain: Vec::new() }
    }
}

/// Revocation status; OCSP and CRL fetching are not implemented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationStatus {
    NotRevoked,
}

pub fn check_revocation(_cert: &Certificate) -> RevocationStatus {
    RevocationStatus::NotRevoked
}

/// Validate `cert` for `hostname`; checks run in a fixed order and the
/// first failure wins
///
/// Order: validity window, hostname, chain building, per-link signatures,
/// root trust.
pub fn validate_certificate(
    cert: &Certificate,
    hostname: &str,
    trusted_cas: &[Certificate],
) -> ValidationResult {
    let now = Utc::now();
    if now < cert.not_before {
        return ValidationResult::failure("Certificate not yet valid");
    }
    if now > cert.not_after {
        return ValidationResult::failure("Certificate expired");
    }

    if !hostname_matches(hostname, cert) {
        return ValidationResult::failure("Hostname mismatch");
    }

    let chain = match build_certificate_chain(cert, trusted_cas) {
        Some(chain) => chain,
        None => return ValidationResult::failure("Unable to build certificate chain"),
    };

    for pair in chain.windows(2) {
        let (child, parent) = (&pair[0], &pair[1]);
        if !verify_signature(child, parent) {
            return ValidationResult::failure(format!("Invalid signature for {}", child.subject));
        }
    }

    let root = &chain[chain.len() - 1];
    if !trusted_cas.iter().any(|ca| ca.subject == root.subject) {
        return ValidationResult::failure("Untrusted root CA");
    }

    debug!(subject = %cert.subject, depth = chain.len(), "certificate validated");
    ValidationResult { valid: true, reason: None, chain }
}

/// Match a hostname against the subject CN and every SAN, allowing a
/// single-label `*.` wildcard
pub fn hostname_matches(hostname: &str, cert: &Certificate) -> bool {
    cert.common_name()
        .into_iter()
        .chain(cert.subject_alt_names.iter().map(String::as_str))
        .any(|name| name_matches(hostname, name))
}

fn name_matches(hostname: &str, pattern: &str) -> bool {
    if hostname.eq_ignore_ascii_case(pattern) {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix("*.") {
        // the wildcard covers exactly one label
        if let Some((_, rest)) = hostname.split_once('.') {
            return rest.eq_ignore_ascii_case(suffix);
        }
    }
    false
}

/// Walk issuer links through the trust store, leaf first
///
/// A self-signed certificate terminates the chain. Returns `None` when a
/// link is missing or the depth limit is hit.
pub fn build_certificate_chain(
    leaf: &Certificate,
    trusted_cas: &[Certificate],
) -> Option<Vec<Certificate>> {
    let mut chain = vec![leaf.clone()];
    let mut current = leaf.clone();
    for _ in 0..MAX_CHAIN_DEPTH {
        if current.is_self_signed() {
            return Some(chain);
        }
        let parent = trusted_cas.iter().find(|ca| ca.subject == current.issuer)?;
        chain.push(parent.clone());
        current = parent.clone();
    }
    None
}

/// Verify `child`'s signature with `parent`'s public key, dispatching on
/// the child's declared algorithm; an unknown algorithm falls back to
/// RSASSA-PKCS1-v1_5 with SHA-256
fn verify_signature(child: &Certificate, parent: &Certificate) -> bool {
    match child.signature_algorithm.as_str() {
        "RSA-SHA1" => {
            rsa_verify(parent, child, Pkcs1v15Sign::new::<Sha1>(), &Sha1::digest(&child.tbs_raw))
        }
        "RSA-SHA384" => {
            rsa_verify(parent, child, Pkcs1v15Sign::new::<Sha384>(), &Sha384::digest(&child.tbs_raw))
        }
        "RSA-SHA512" => {
            rsa_verify(parent, child, Pkcs1v15Sign::new::<Sha512>(), &Sha512::digest(&child.tbs_raw))
        }
        "ECDSA-SHA256" | "ECDSA-SHA1" | "ECDSA-SHA384" | "ECDSA-SHA512" => ecdsa_verify(parent, child),
        "Ed25519" => ed25519_verify(parent, child),
        _ => {
            rsa_verify(parent, child, Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(&child.tbs_raw))
        }
    }
}

fn rsa_verify(parent: &Certificate, child: &Certificate, scheme: Pkcs1v15Sign, digest: &[u8]) -> bool {
    let Ok(key) = rsa::RsaPublicKey::from_pkcs1_der(&parent.public_key) else {
        return false;
    };
    key.verify(scheme, digest, &child.signature).is_ok()
}

fn ecdsa_verify(parent: &Certificate, child: &Certificate) -> bool {
    let Ok(key) = p256::ecdsa::VerifyingKey::from_sec1_bytes(&parent.public_key) else {
        return false;
    };
    let Ok(signature) = p256::ecdsa::Signature::from_der(&child.signature) else {
        return false;
    };
    key.verify(&child.tbs_raw, &signature).is_ok()
}

fn ed25519_verify(parent: &Certificate, child: &Certificate) -> bool {
    let Ok(key_bytes) = <[u8; 32]>::try_from(parent.public_key.as_slice()) else {
        return false;
    };
    let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(signature_bytes) = <[u8; 64]>::try_from(child.signature.as_slice()) else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(&signature_bytes);
    key.verify(&child.tbs_raw, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn cert(subject: &str, issuer: &str, sans: &[&str]) -> Certificate {
        Certificate {
            version: 3,
            serial: "01".to_string(),
            signature_algorithm: "Ed25519".to_string(),
            issuer: issuer.to_string(),
            subject: subject.to_string(),
            subject_alt_names: sans.iter().map(|s| s.to_string()).collect(),
            not_before: Utc::now() - Duration::days(1),
            not_after: Utc::now() + Duration::days(1),
            public_key_algorithm: "Ed25519".to_string(),
            public_key: Vec::new(),
            signature: Vec::new(),
            tbs_raw: Vec::new(),
        }
    }

    #[test]
    fn test_not_yet_valid_is_first_reason() {
        // both the window and the hostname are wrong; the window wins
        let mut c = cert("CN=example.com", "CN=example.com", &[]);
        c.not_before = Utc::now() + Duration::days(1);
        c.not_after = Utc::now() + Duration::days(2);
        let result = validate_certificate(&c, "different.com", &[c.clone()]);
        assert_eq!(result.reason.as_deref(), Some("Certificate not yet valid"));
    }

    #[test]
    fn test_expired_reason() {
        let mut c = cert("CN=example.com", "CN=example.com", &["example.com"]);
        c.not_before = Utc::now() - Duration::days(2);
        c.not_after = Utc::now() - Duration::days(1);
        let result = validate_certificate(&c, "example.com", &[c.clone()]);
        assert_eq!(result.reason.as_deref(), Some("Certificate expired"));
    }

    #[test]
    fn test_hostname_mismatch_reason() {
        let c = cert("CN=example.com", "CN=example.com", &["example.com"]);
        let result = validate_certificate(&c, "different.com", &[c.clone()]);
        assert!(!result.valid);
        assert_eq!(result.reason.as_deref(), Some("Hostname mismatch"));
    }

    #[test]
    fn test_chain_unbuildable_reason() {
        let c = cert("CN=leaf.example.com", "CN=missing issuer", &["leaf.example.com"]);
        let result = validate_certificate(&c, "leaf.example.com", &[]);
        assert_eq!(result.reason.as_deref(), Some("Unable to build certificate chain"));
    }

    #[test]
    fn test_wildcard_matches_single_label() {
        let c = cert("CN=ignored", "CN=ignored", &["*.example.com"]);
        assert!(hostname_matches("sub.example.com", &c));
        assert!(!hostname_matches("example.com", &c));
        assert!(!hostname_matches("a.b.example.com", &c));
    }

    #[test]
    fn test_hostname_match_is_case_insensitive() {
        let c = cert("CN=Example.COM", "CN=Example.COM", &[]);
        assert!(hostname_matches("example.com", &c));
    }

    #[test]
    fn test_subject_cn_participates_in_matching() {
        let c = cert("CN=example.com, O=Example", "CN=root", &[]);
        assert!(hostname_matches("example.com", &c));
    }

    #[test]
    fn test_chain_walks_to_root() {
        let root = cert("CN=root", "CN=root", &[]);
        let intermediate = cert("CN=intermediate", "CN=root", &[]);
        let leaf = cert("CN=leaf", "CN=intermediate", &[]);
        let chain =
            build_certificate_chain(&leaf, &[intermediate.clone(), root.clone()]).expect("chain");
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].subject, "CN=leaf");
        assert_eq!(chain[2].subject, "CN=root");
    }

    #[test]
    fn test_chain_terminates_on_issuer_cycle() {
        // a ↔ b reference each other; the walk must stop at the depth cap
        let a = cert("CN=a", "CN=b", &[]);
        let b = cert("CN=b", "CN=a", &[]);
        assert!(build_certificate_chain(&a, &[a.clone(), b]).is_none());
    }

    #[test]
    fn test_revocation_stub() {
        let c = cert("CN=x", "CN=x", &[]);
        assert_eq!(check_revocation(&c), RevocationStatus::NotRevoked);
    }
}
