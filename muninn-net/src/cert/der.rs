use crate::error::{NetError, Result};
use chrono::{DateTime, TimeZone, Utc};

/// Universal tags used by the certificate parser
pub mod tag {
    pub const INTEGER: u8 = 0x02;
    pub const BIT_STRING: u8 = 0x03;
    pub const OCTET_STRING: u8 = 0x04;
    pub const NULL: u8 = 0x05;
    pub const OBJECT_IDENTIFIER: u8 = 0x06;
    pub const UTF8_STRING: u8 = 0x0c;
    pub const PRINTABLE_STRING: u8 = 0x13;
    pub const TELETEX_STRING: u8 = 0x14;
    pub const IA5_STRING: u8 = 0x16;
    pub const UTC_TIME: u8 = 0x17;
    pub const GENERALIZED_TIME: u8 = 0x18;
    pub const BMP_STRING: u8 = 0x1e;
    pub const SEQUENCE: u8 = 0x30;
    pub const SET: u8 = 0x31;

    /// Constructed context-specific tag `[n]`
    pub const fn context(n: u8) -> u8 {
        0xa0 + n
    }
}

/// Cursor over definite-length DER content
///
/// Rejects indefinite lengths and long forms beyond four length octets.
pub struct DerParser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DerParser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Tag of the next element without consuming it
    pub fn peek_tag(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| NetError::Protocol("DER input exhausted".to_string()))
    }

    fn read_byte(&mut self) -> Result<u8> {
        let byte = self.peek_tag()?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let bytes = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or_else(|| NetError::Protocol(format!("DER element of {len} bytes runs past input")))?;
        self.pos += len;
        Ok(bytes)
    }

    fn read_length(&mut self) -> Result<usize> {
        let first = self.read_byte()?;
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }
        let octets = (first & 0x7f) as usize;
        if octets == 0 {
            return Err(NetError::Protocol("indefinite DER length".to_string()));
        }
        if octets > 4 {
            return Err(NetError::Protocol(format!("DER length of {octets} octets")));
        }
        let mut length = 0usize;
        for _ in 0..octets {
            length = (length << 8) | self.read_byte()? as usize;
        }
        Ok(length)
    }

    /// Content bytes of the next element, which must carry `expected`
    pub fn read_tlv(&mut self, expected: u8) -> Result<&'a [u8]> {
        let tag = self.read_byte()?;
        if tag != expected {
            return Err(NetError::Protocol(format!(
                "expected DER tag 0x{expected:02x}, found 0x{tag:02x}"
            )));
        }
        let length = self.read_length()?;
        self.read_bytes(length)
    }

    /// The next element whole: tag, content, and the raw TLV bytes
    pub fn read_element(&mut self) -> Result<(u8, &'a [u8], &'a [u8])> {
        let start = self.pos;
        let tag = self.read_byte()?;
        let length = self.read_length()?;
        let content = self.read_bytes(length)?;
        Ok((tag, content, &self.data[start..self.pos]))
    }

    /// Skip one element of any tag
    pub fn skip(&mut self) -> Result<()> {
        self.read_element().map(|_| ())
    }

    /// Descend into a SEQUENCE
    pub fn read_sequence(&mut self) -> Result<DerParser<'a>> {
        Ok(DerParser::new(self.read_tlv(tag::SEQUENCE)?))
    }

    /// Descend into an explicit `[n]` tag
    pub fn read_explicit(&mut self, n: u8) -> Result<DerParser<'a>> {
        Ok(DerParser::new(self.read_tlv(tag::context(n))?))
    }

    /// INTEGER content bytes, big-endian two's complement
    pub fn read_integer_bytes(&mut self) -> Result<&'a [u8]> {
        self.read_tlv(tag::INTEGER)
    }

    /// Small non-negative INTEGER as u64
    pub fn read_integer_u64(&mut self) -> Result<u64> {
        let bytes = self.read_integer_bytes()?;
        if bytes.len() > 8 {
            return Err(NetError::Protocol("INTEGER too large".to_string()));
        }
        Ok(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
    }

    /// BIT STRING content with the unused-bits prefix stripped
    pub fn read_bit_string(&mut self) -> Result<&'a [u8]> {
        let content = self.read_tlv(tag::BIT_STRING)?;
        let (&unused, bits) = content
            .split_first()
            .ok_or_else(|| NetError::Protocol("empty BIT STRING".to_string()))?;
        if unused > 7 {
            return Err(NetError::Protocol(format!("BIT STRING with {unused} unused bits")));
        }
        Ok(bits)
    }

    pub fn read_octet_string(&mut self) -> Result<&'a [u8]> {
        self.read_tlv(tag::OCTET_STRING)
    }

    /// OBJECT IDENTIFIER rendered dotted-decimal
    pub fn read_oid(&mut self) -> Result<String> {
        let content = self.read_tlv(tag::OBJECT_IDENTIFIER)?;
        decode_oid(content)
    }

    /// Any of the string types, decoded to UTF-8
    pub fn read_string(&mut self) -> Result<String> {
        let (found, content, _) = self.read_element()?;
        decode_string(found, content)
    }

    /// UTCTime or GeneralizedTime as a UTC instant
    pub fn read_time(&mut self) -> Result<DateTime<Utc>> {
        let (found, content, _) = self.read_element()?;
        match found {
            tag::UTC_TIME => parse_utc_time(content),
            tag::GENERALIZED_TIME => parse_generalized_time(content),
            other => Err(NetError::Protocol(format!("expected a time, found tag 0x{other:02x}"))),
        }
    }
}

pub(crate) fn decode_oid(content: &[u8]) -> Result<String> {
    let (&first, rest) = content
        .split_first()
        .ok_or_else(|| NetError::Protocol("empty OBJECT IDENTIFIER".to_string()))?;
    // first octet packs the first two arcs as 40·X+Y
    let mut arcs = vec![u64::from(first / 40), u64::from(first % 40)];
    let mut arc = 0u64;
    for &byte in rest {
        arc = (arc << 7) | u64::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            arcs.push(arc);
            arc = 0;
        }
    }
    if arc != 0 {
        return Err(NetError::Protocol("truncated OBJECT IDENTIFIER arc".to_string()));
    }
    Ok(arcs.iter().map(u64::to_string).collect::<Vec<_>>().join("."))
}

pub(crate) fn decode_string(string_tag: u8, content: &[u8]) -> Result<String> {
    match string_tag {
        tag::UTF8_STRING | tag::PRINTABLE_STRING | tag::IA5_STRING | tag::TELETEX_STRING => {
            Ok(String::from_utf8_lossy(content).into_owned())
        }
        tag::BMP_STRING => {
            if content.len() % 2 != 0 {
                return Err(NetError::Protocol("BMPString with odd length".to_string()));
            }
            let units: Vec<u16> = content
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            Ok(String::from_utf16_lossy(&units))
        }
        other => Err(NetError::Protocol(format!("tag 0x{other:02x} is not a string type"))),
    }
}

fn parse_utc_time(content: &[u8]) -> Result<DateTime<Utc>> {
    // YYMMDDhhmmssZ with the RFC 5280 50-year cutoff
    let text = std::str::from_utf8(content)
        .map_err(|_| NetError::Protocol("non-ASCII UTCTime".to_string()))?;
    if text.len() != 13 || !text.ends_with('Z') {
        return Err(NetError::Protocol(format!("malformed UTCTime '{text}'")));
    }
    let yy: i32 = parse_digits(&text[0..2])?;
    let year = if yy >= 50 { 1900 + yy } else { 2000 + yy };
    build_utc(year, &text[2..12])
}

fn parse_generalized_time(content: &[u8]) -> Result<DateTime<Utc>> {
    // YYYYMMDDhhmmssZ
    let text = std::str::from_utf8(content)
        .map_err(|_| NetError::Protocol("non-ASCII GeneralizedTime".to_string()))?;
    if text.len() != 15 || !text.ends_with('Z') {
        return Err(NetError::Protocol(format!("malformed GeneralizedTime '{text}'")));
    }
    build_utc(parse_digits(&text[0..4])?, &text[4..14])
}

fn build_utc(year: i32, rest: &str) -> Result<DateTime<Utc>> {
    let month: u32 = parse_digits(&rest[0..2])?;
    let day: u32 = parse_digits(&rest[2..4])?;
    let hour: u32 = parse_digits(&rest[4..6])?;
    let minute: u32 = parse_digits(&rest[6..8])?;
    let second: u32 = parse_digits(&rest[8..10])?;
    Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .ok_or_else(|| NetError::Protocol(format!("invalid calendar time {year}-{month}-{day}")))
}

fn parse_digits<T: std::str::FromStr>(text: &str) -> Result<T> {
    text.parse()
        .map_err(|_| NetError::Protocol(format!("expected digits, found '{text}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_and_long_length_forms() {
        let mut short = DerParser::new(&[0x04, 0x02, 0xaa, 0xbb]);
        assert_eq!(short.read_octet_string().expect("short"), &[0xaa, 0xbb]);

        let mut long = vec![0x04, 0x81, 0x80];
        long.extend(std::iter::repeat(0x55).take(128));
        let mut parser = DerParser::new(&long);
        assert_eq!(parser.read_octet_string().expect("long").len(), 128);
    }

    #[test]
    fn test_indefinite_length_rejected() {
        let mut parser = DerParser::new(&[0x30, 0x80, 0x00, 0x00]);
        assert!(matches!(parser.read_sequence(), Err(NetError::Protocol(_))));
    }

    #[test]
    fn test_five_octet_length_rejected() {
        let mut parser = DerParser::new(&[0x04, 0x85, 0x01, 0x00, 0x00, 0x00, 0x00]);
        assert!(matches!(parser.read_octet_string(), Err(NetError::Protocol(_))));
    }

    #[test]
    fn test_tag_mismatch() {
        let mut parser = DerParser::new(&[0x02, 0x01, 0x05]);
        let err = parser.read_octet_string().expect_err("mismatch");
        assert!(err.to_string().contains("0x04"));
    }

    #[test]
    fn test_integer_u64() {
        let mut parser = DerParser::new(&[0x02, 0x02, 0x01, 0x00]);
        assert_eq!(parser.read_integer_u64().expect("int"), 256);
    }

    #[test]
    fn test_bit_string_strips_unused_bits_byte() {
        let mut parser = DerParser::new(&[0x03, 0x03, 0x00, 0xde, 0xad]);
        assert_eq!(parser.read_bit_string().expect("bits"), &[0xde, 0xad]);
    }

    #[test]
    fn test_oid_rsa_encryption() {
        // 1.2.840.113549.1.1.1
        let mut parser =
            DerParser::new(&[0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01]);
        assert_eq!(parser.read_oid().expect("oid"), "1.2.840.113549.1.1.1");
    }

    #[test]
    fn test_oid_common_name() {
        let mut parser = DerParser::new(&[0x06, 0x03, 0x55, 0x04, 0x03]);
        assert_eq!(parser.read_oid().expect("oid"), "2.5.4.3");
    }

    #[test]
    fn test_utc_time_with_cutoff() {
        let mut body = vec![0x17, 13];
        body.extend_from_slice(b"230101000000Z");
        let mut parser = DerParser::new(&body);
        let time = parser.read_time().expect("time");
        assert_eq!(time, Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).single().expect("date"));

        let mut body = vec![0x17, 13];
        body.extend_from_slice(b"700101000000Z");
        let mut parser = DerParser::new(&body);
        assert_eq!(parser.read_time().expect("time").timestamp(), 0);
    }

    #[test]
    fn test_generalized_time() {
        let mut body = vec![0x18, 15];
        body.extend_from_slice(b"20450630120000Z");
        let mut parser = DerParser::new(&body);
        let time = parser.read_time().expect("time");
        assert_eq!(time, Utc.with_ymd_and_hms(2045, 6, 30, 12, 0, 0).single().expect("date"));
    }

    #[test]
    fn test_bmp_string() {
        let mut parser = DerParser::new(&[0x1e, 0x04, 0x00, b'h', 0x00, b'i']);
        assert_eq!(parser.read_string().expect("string"), "hi");
    }

    #[test]
    fn test_explicit_tag() {
        let mut parser = DerParser::new(&[0xa0, 0x03, 0x02, 0x01, 0x02]);
        let mut inner = parser.read_explicit(0).expect("explicit");
        assert_eq!(inner.read_integer_u64().expect("int"), 2);
    }

    #[test]
    fn test_read_element_returns_raw_tlv() {
        let data = [0x30, 0x03, 0x02, 0x01, 0x07, 0xff];
        let mut parser = DerParser::new(&data);
        let (tag_byte, content, raw) = parser.read_element().expect("element");
        assert_eq!(tag_byte, tag::SEQUENCE);
        assert_eq!(content, &[0x02, 0x01, 0x07]);
        assert_eq!(raw, &data[..5]);
        assert_eq!(parser.remaining(), 1);
    }
}
