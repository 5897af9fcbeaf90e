//! Shared helpers for integration tests: a small DER writer and an
//! Ed25519 certificate builder.
#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

/// Route test logs through the fmt subscriber when RUST_LOG is set
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_SET: u8 = 0x31;
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_BIT_STRING: u8 = 0x03;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_UTF8_STRING: u8 = 0x0c;
pub const TAG_UTC_TIME: u8 = 0x17;
// GeneralName dNSName: context tag [2], primitive
pub const TAG_DNS_NAME: u8 = 0x82;

pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    match content.len() {
        len if len < 128 => out.push(len as u8),
        len if len < 256 => {
            out.push(0x81);
            out.push(len as u8);
        }
        len => {
            out.push(0x82);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
    }
    out.extend_from_slice(content);
    out
}

pub fn der_oid(oid: &str) -> Vec<u8> {
    let arcs: Vec<u64> = oid.split('.').map(|arc| arc.parse().expect("numeric arc")).collect();
    let mut content = vec![(arcs[0] * 40 + arcs[1]) as u8];
    for &arc in &arcs[2..] {
        content.extend_from_slice(&base128(arc));
    }
    tlv(0x06, &content)
}

fn base128(mut value: u64) -> Vec<u8> {
    let mut bytes = vec![(value & 0x7f) as u8];
    value >>= 7;
    while value > 0 {
        bytes.push(((value & 0x7f) | 0x80) as u8);
        value >>= 7;
    }
    bytes.reverse();
    bytes
}

fn bit_string(bits: &[u8]) -> Vec<u8> {
    let mut content = vec![0u8]; // no unused bits
    content.extend_from_slice(bits);
    tlv(TAG_BIT_STRING, &content)
}

fn cn_name(cn: &str) -> Vec<u8> {
    let mut attribute = der_oid("2.5.4.3");
    attribute.extend_from_slice(&tlv(TAG_UTF8_STRING, cn.as_bytes()));
    let attribute = tlv(TAG_SEQUENCE, &attribute);
    tlv(TAG_SEQUENCE, &tlv(TAG_SET, &attribute))
}

fn utc_time(instant: DateTime<Utc>) -> Vec<u8> {
    let text = instant.format("%y%m%d%H%M%SZ").to_string();
    tlv(TAG_UTC_TIME, text.as_bytes())
}

pub struct CertSpec<'a> {
    pub subject_cn: &'a str,
    pub issuer_cn: &'a str,
    pub sans: &'a [&'a str],
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl<'a> CertSpec<'a> {
    pub fn self_signed(cn: &'a str, sans: &'a [&'a str]) -> Self {
        Self {
            subject_cn: cn,
            issuer_cn: cn,
            sans,
            not_before: Utc::now() - Duration::days(1),
            not_after: Utc::now() + Duration::days(1),
        }
    }
}

/// Build a DER certificate with the subject's key, signed by `signer`
pub fn build_ed25519_cert(
    spec: &CertSpec<'_>,
    signer: &SigningKey,
    subject_key: &VerifyingKey,
) -> Vec<u8> {
    let algorithm = tlv(TAG_SEQUENCE, &der_oid("1.3.101.112"));

    let mut spki = algorithm.clone();
    spki.extend_from_slice(&bit_string(subject_key.as_bytes()));
    let spki = tlv(TAG_SEQUENCE, &spki);

    let mut validity = utc_time(spec.not_before);
    validity.extend_from_slice(&utc_time(spec.not_after));
    let validity = tlv(TAG_SEQUENCE, &validity);

    let mut tbs_content = Vec::new();
    tbs_content.extend_from_slice(&tlv(0xa0, &tlv(TAG_INTEGER, &[0x02]))); // v3
    tbs_content.extend_from_slice(&tlv(TAG_INTEGER, &[0x01]));
    tbs_content.extend_from_slice(&algorithm);
    tbs_content.extend_from_slice(&cn_name(spec.issuer_cn));
    tbs_content.extend_from_slice(&validity);
    tbs_content.extend_from_slice(&cn_name(spec.subject_cn));
    tbs_content.extend_from_slice(&spki);
    if !spec.sans.is_empty() {
        let san_list: Vec<u8> = spec
            .sans
            .iter()
            .flat_map(|san| tlv(TAG_DNS_NAME, san.as_bytes()))
            .collect();
        let mut extension = der_oid("2.5.29.17");
        extension.extend_from_slice(&tlv(TAG_OCTET_STRING, &tlv(TAG_SEQUENCE, &san_list)));
        let extensions = tlv(TAG_SEQUENCE, &tlv(TAG_SEQUENCE, &extension));
        tbs_content.extend_from_slice(&tlv(0xa3, &extensions));
    }
    let tbs = tlv(TAG_SEQUENCE, &tbs_content);

    let signature = signer.sign(&tbs);
    let mut certificate = tbs;
    certificate.extend_from_slice(&algorithm);
    certificate.extend_from_slice(&bit_string(&signature.to_bytes()));
    tlv(TAG_SEQUENCE, &certificate)
}

/// A fresh key pair plus a self-signed certificate for `cn`
pub fn self_signed(cn: &str, sans: &[&str]) -> (SigningKey, Vec<u8>) {
    let key = SigningKey::generate(&mut OsRng);
    let der = build_ed25519_cert(&CertSpec::self_signed(cn, sans), &key, &key.verifying_key());
    (key, der)
}
