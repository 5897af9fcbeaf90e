use crate::cert::der::{decode_string, tag, DerParser};
use crate::error::{NetError, Result};
use chrono::{DateTime, Utc};

const OID_SUBJECT_ALT_NAME: &str = "2.5.29.17";
// GeneralName CHOICE: dNSName is context tag [2], primitive
const GENERAL_NAME_DNS: u8 = 0x82;

/// A parsed X.509 v3 certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// 1, 2 or 3
    pub version: u8,
    /// Serial number as colon-separated hex
    pub serial: String,
    /// OID-mapped name, e.g. "RSA-SHA256"
    pub signature_algorithm: String,
    /// Comma-joined distinguished name, e.g. "CN=example.com, O=Example"
    pub issuer: String,
    pub subject: String,
    /// Every dNSName from the subjectAltName extension
    pub subject_alt_names: Vec<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// OID-mapped SPKI algorithm name
    pub public_key_algorithm: String,
    /// SPKI public-key BIT STRING contents
    pub public_key: Vec<u8>,
    /// Outer signature BIT STRING contents
    pub signature: Vec<u8>,
    /// Raw TBSCertificate TLV, the input to signature verification
    pub tbs_raw: Vec<u8>,
}

impl Certificate {
    pub fn is_self_signed(&self) -> bool {
        self.subject == self.issuer
    }

    /// Value of the CN attribute of the subject, when present
    pub fn common_name(&self) -> Option<&str> {
        self.subject
            .split(", ")
            .find_map(|part| part.strip_prefix("CN="))
    }
}

/// Parse a DER-encoded certificate per RFC 5280 §4
pub fn parse_certificate(der: &[u8]) -> Result<Certificate> {
    let mut outer = DerParser::new(der);
    let mut cert = outer.read_sequence()?;

    let (tbs_tag, _, tbs_raw) = cert.read_element()?;
    if tbs_tag != tag::SEQUENCE {
        return Err(NetError::Protocol("TBSCertificate is not a SEQUENCE".to_string()));
    }
    let mut tbs = DerParser::new(&tbs_raw[..]);
    let mut tbs = tbs.read_sequence()?;

    // version [0] EXPLICIT, defaulting to v1
    let version = if tbs.peek_tag()? == tag::context(0) {
        let mut wrapper = tbs.read_explicit(0)?;
        wrapper.read_integer_u64()? as u8 + 1
    } else {
        1
    };

    let serial = colon_hex(tbs.read_integer_bytes()?);
    let signature_algorithm = read_algorithm_identifier(&mut tbs)?;
    let issuer = read_distinguished_name(&mut tbs)?;

    let mut validity = tbs.read_sequence()?;
    let not_before = validity.read_time()?;
    let not_after = validity.read_time()?;

    let subject = read_distinguished_name(&mut tbs)?;

    let mut spki = tbs.read_sequence()?;
    let public_key_algorithm = read_algorithm_identifier(&mut spki)?;
    let public_key = spki.read_bit_string()?.to_vec();

    // optional issuerUniqueID [1] and subjectUniqueID [2]
    let mut subject_alt_names = Vec::new();
    while !tbs.at_end() {
        let next = tbs.peek_tag()?;
        match next {
            t if t == tag::context(1) || t == tag::context(2) => tbs.skip()?,
            t if t == tag::context(3) => {
                let mut wrapper = tbs.read_explicit(3)?;
                subject_alt_names = read_extensions(&mut wrapper)?;
            }
            _ => tbs.skip()?,
        }
    }

    // outer signatureAlgorithm, then the signature itself
    cert.read_sequence()?;
    let signature = cert.read_bit_string()?.to_vec();

    Ok(Certificate {
        version,
        serial,
        signature_algorithm,
        issuer,
        subject,
        subject_alt_names,
        not_before,
        not_after,
        public_key_algorithm,
        public_key,
        signature,
        tbs_raw: tbs_raw.to_vec(),
    })
}

fn read_algorithm_identifier(parser: &mut DerParser<'_>) -> Result<String> {
    let mut algorithm = parser.read_sequence()?;
    let oid = algorithm.read_oid()?;
    // optional parameters (NULL for RSA, a curve OID for EC) are ignored
    Ok(signature_algorithm_name(&oid).to_string())
}

fn read_distinguished_name(parser: &mut DerParser<'_>) -> Result<String> {
    let mut name = parser.read_sequence()?;
    let mut parts = Vec::new();
    while !name.at_end() {
        let mut rdn = DerParser::new(name.read_tlv(tag::SET)?);
        while !rdn.at_end() {
            let mut attribute = rdn.read_sequence()?;
            let oid = attribute.read_oid()?;
            let value = attribute.read_string()?;
            match dn_attribute_name(&oid) {
                Some(short) => parts.push(format!("{short}={value}")),
                None => parts.push(format!("{oid}={value}")),
            }
        }
    }
    Ok(parts.join(", "))
}

fn read_extensions(wrapper: &mut DerParser<'_>) -> Result<Vec<String>> {
    let mut extensions = wrapper.read_sequence()?;
    let mut sans = Vec::new();
    while !extensions.at_end() {
        let mut extension = extensions.read_sequence()?;
        let oid = extension.read_oid()?;
        if extension.peek_tag().is_ok_and(|t| t == 0x01) {
            extension.skip()?; // critical BOOLEAN
        }
        let value = extension.read_octet_string()?;
        if oid == OID_SUBJECT_ALT_NAME {
            sans = read_subject_alt_names(value)?;
        }
    }
    Ok(sans)
}

fn read_subject_alt_names(value: &[u8]) -> Result<Vec<String>> {
    let mut outer = DerParser::new(value);
    let mut names = outer.read_sequence()?;
    let mut sans = Vec::new();
    while !names.at_end() {
        let (name_tag, content, _) = names.read_element()?;
        if name_tag == GENERAL_NAME_DNS {
            sans.push(decode_string(tag::IA5_STRING, content)?);
        }
    }
    Ok(sans)
}

fn colon_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Map a signature or SPKI algorithm OID to its conventional name
///
/// Unknown OIDs are kept dotted-decimal so the validator can apply its
/// documented default.
pub fn signature_algorithm_name(oid: &str) -> &str {
    match oid {
        "1.2.840.113549.1.1.1" => "RSA",
        "1.2.840.113549.1.1.5" => "RSA-SHA1",
        "1.2.840.113549.1.1.11" => "RSA-SHA256",
        "1.2.840.113549.1.1.12" => "RSA-SHA384",
        "1.2.840.113549.1.1.13" => "RSA-SHA512",
        "1.2.840.10045.2.1" => "EC",
        "1.2.840.10045.4.1" => "ECDSA-SHA1",
        "1.2.840.10045.4.3.2" => "ECDSA-SHA256",
        "1.2.840.10045.4.3.3" => "ECDSA-SHA384",
        "1.2.840.10045.4.3.4" => "ECDSA-SHA512",
        "1.3.101.112" => "Ed25519",
        other => other,
    }
}

fn dn_attribute_name(oid: &str) -> Option<&'static str> {
    match oid {
        "2.5.4.3" => Some("CN"),
        "2.5.4.4" => Some("SN"),
        "2.5.4.6" => Some("C"),
        "2.5.4.7" => Some("L"),
        "2.5.4.8" => Some("ST"),
        "2.5.4.10" => Some("O"),
        "2.5.4.11" => Some("OU"),
        "2.5.4.12" => Some("T"),
        "2.5.4.42" => Some("GN"),
        "1.2.840.113549.1.9.1" => Some("E"),
        _ => None,
    }
}
