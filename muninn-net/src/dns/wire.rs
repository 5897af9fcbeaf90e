use crate::error::{NetError, Result};
use bytes::{BufMut, BytesMut};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Largest answer read over plain UDP transport
pub const MAX_UDP_PAYLOAD: usize = 512;

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;
// generous bound; real packets need a handful of hops at most
const MAX_POINTER_HOPS: usize = 32;

/// Record types this resolver understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    A,
    Cname,
    Mx,
    Txt,
    Aaaa,
}

impl RecordType {
    pub fn code(self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::Cname => 5,
            RecordType::Mx => 15,
            RecordType::Txt => 16,
            RecordType::Aaaa => 28,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(RecordType::A),
            5 => Some(RecordType::Cname),
            15 => Some(RecordType::Mx),
            16 => Some(RecordType::Txt),
            28 => Some(RecordType::Aaaa),
            _ => None,
        }
    }
}

/// 12-byte message header (RFC 1035 §4.1.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,
    pub flags: u16,
    pub question_count: u16,
    pub answer_count: u16,
    pub authority_count: u16,
    pub additional_count: u16,
}

impl DnsHeader {
    pub fn is_response(&self) -> bool {
        self.flags & 0x8000 != 0
    }

    pub fn truncated(&self) -> bool {
        self.flags & 0x0200 != 0
    }

    pub fn recursion_desired(&self) -> bool {
        self.flags & 0x0100 != 0
    }

    pub fn rcode(&self) -> u8 {
        (self.flags & 0x000f) as u8
    }
}

/// Typed rdata of a parsed resource record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Cname(String),
    Mx { priority: u16, exchange: String },
    Txt(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: String,
    pub record_type: RecordType,
    pub class: u16,
    pub ttl: u32,
    pub data: RecordData,
}

/// A parsed response: header plus the answer section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsMessage {
    pub header: DnsHeader,
    pub answers: Vec<ResourceRecord>,
}

/// Encode a domain name as length-prefixed labels with a zero terminator
///
/// The root name (empty or ".") is a single zero byte.
pub fn encode_domain_name(name: &str, buf: &mut BytesMut) -> Result<()> {
    let trimmed = name.trim_end_matches('.');
    if trimmed.is_empty() {
        buf.put_u8(0);
        return Ok(());
    }
    let mut encoded_len = 1; // terminator
    for label in trimmed.split('.') {
        if label.is_empty() {
            return Err(NetError::Protocol(format!("empty label in domain name '{name}'")));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(NetError::Protocol(format!(
                "label '{label}' exceeds {MAX_LABEL_LEN} bytes"
            )));
        }
        encoded_len += 1 + label.len();
        if encoded_len > MAX_NAME_LEN {
            return Err(NetError::Protocol(format!("domain name '{name}' exceeds {MAX_NAME_LEN} bytes")));
        }
        buf.put_u8(label.len() as u8);
        buf.put_slice(label.as_bytes());
    }
    buf.put_u8(0);
    Ok(())
}

/// Decode a domain name starting at `offset`, following pointer compression
///
/// Returns the name and the number of bytes consumed at the original
/// position: a pointer counts as its two bytes, not the bytes it leads to.
pub fn decode_domain_name(packet: &[u8], offset: usize) -> Result<(String, usize)> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = offset;
    let mut consumed = 0usize;
    let mut jumped = false;
    let mut hops = 0usize;

    loop {
        let len = *packet
            .get(pos)
            .ok_or_else(|| NetError::Protocol("domain name runs past end of packet".to_string()))?
            as usize;

        if len & 0xc0 == 0xc0 {
            let low = *packet
                .get(pos + 1)
                .ok_or_else(|| NetError::Protocol("truncated compression pointer".to_string()))?
                as usize;
            if !jumped {
                consumed += 2;
                jumped = true;
            }
            hops += 1;
            if hops > MAX_POINTER_HOPS {
                return Err(NetError::Protocol("compression pointer loop".to_string()));
            }
            pos = ((len & 0x3f) << 8) | low;
            continue;
        }
        if len & 0xc0 != 0 {
            return Err(NetError::Protocol(format!("reserved label type 0x{len:02x}")));
        }

        if !jumped {
            consumed += 1 + len;
        }
        if len == 0 {
            break;
        }
        let bytes = packet
            .get(pos + 1..pos + 1 + len)
            .ok_or_else(|| NetError::Protocol("label runs past end of packet".to_string()))?;
        labels.push(String::from_utf8_lossy(bytes).into_owned());
        pos += 1 + len;
    }

    Ok((labels.join("."), consumed))
}

/// Build a query packet: one question, recursion desired
pub fn build_query(id: u16, hostname: &str, record_type: RecordType) -> Result<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(hostname.len() + 18);
    buf.put_u16(id);
    buf.put_u16(0x0100); // RD
    buf.put_u16(1); // one question
    buf.put_u16(0);
    buf.put_u16(0);
    buf.put_u16(0);
    encode_domain_name(hostname, &mut buf)?;
    buf.put_u16(record_type.code());
    buf.put_u16(1); // IN
    Ok(buf.to_vec())
}

/// Parse a response packet into its header and answer records
pub fn parse_response(packet: &[u8]) -> Result<DnsMessage> {
    if packet.len() < 12 {
        return Err(NetError::Protocol(format!(
            "DNS response requires at least 12 bytes, got {}",
            packet.len()
        )));
    }
    let header = DnsHeader {
        id: read_u16(packet, 0)?,
        flags: read_u16(packet, 2)?,
        question_count: read_u16(packet, 4)?,
        answer_count: read_u16(packet, 6)?,
        authority_count: read_u16(packet, 8)?,
        additional_count: read_u16(packet, 10)?,
    };
    let mut pos = 12;

    for _ in 0..header.question_count {
        let (_, consumed) = decode_domain_name(packet, pos)?;
        pos += consumed + 4; // qtype + qclass
    }

    let mut answers = Vec::with_capacity(header.answer_count as usize);
    for _ in 0..header.answer_count {
        let (name, consumed) = decode_domain_name(packet, pos)?;
        pos += consumed;
        let type_code = read_u16(packet, pos)?;
        let class = read_u16(packet, pos + 2)?;
        let ttl = read_u32(packet, pos + 4)?;
        let rdlength = read_u16(packet, pos + 8)? as usize;
        pos += 10;
        let rdata = packet
            .get(pos..pos + rdlength)
            .ok_or_else(|| NetError::Protocol("rdata runs past end of packet".to_string()))?;

        if let Some(record_type) = RecordType::from_code(type_code) {
            let data = parse_rdata(packet, pos, rdata, record_type)?;
            answers.push(ResourceRecord { name, record_type, class, ttl, data });
        }
        pos += rdlength;
    }

    Ok(DnsMessage { header, answers })
}

fn parse_rdata(
    packet: &[u8],
    rdata_offset: usize,
    rdata: &[u8],
    record_type: RecordType,
) -> Result<RecordData> {
    match record_type {
        RecordType::A => {
            let octets: [u8; 4] = rdata
                .try_into()
                .map_err(|_| NetError::Protocol(format!("A record rdata must be 4 bytes, got {}", rdata.len())))?;
            Ok(RecordData::A(Ipv4Addr::from(octets)))
        }
        RecordType::Aaaa => {
            let octets: [u8; 16] = rdata.try_into().map_err(|_| {
                NetError::Protocol(format!("AAAA record rdata must be 16 bytes, got {}", rdata.len()))
            })?;
            Ok(RecordData::Aaaa(Ipv6Addr::from(octets)))
        }
        RecordType::Cname => {
            let (target, _) = decode_domain_name(packet, rdata_offset)?;
            Ok(RecordData::Cname(target))
        }
        RecordType::Mx => {
            if rdata.len() < 2 {
                return Err(NetError::Protocol("MX record rdata shorter than 2 bytes".to_string()));
            }
            let priority = u16::from_be_bytes([rdata[0], rdata[1]]);
            let (exchange, _) = decode_domain_name(packet, rdata_offset + 2)?;
            Ok(RecordData::Mx { priority, exchange })
        }
        RecordType::Txt => {
            let mut text = String::new();
            let mut pos = 0;
            while pos < rdata.len() {
                let len = rdata[pos] as usize;
                let chunk = rdata
                    .get(pos + 1..pos + 1 + len)
                    .ok_or_else(|| NetError::Protocol("TXT string runs past rdata".to_string()))?;
                text.push_str(&String::from_utf8_lossy(chunk));
                pos += 1 + len;
            }
            Ok(RecordData::Txt(text))
        }
    }
}

fn read_u16(packet: &[u8], pos: usize) -> Result<u16> {
    packet
        .get(pos..pos + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| NetError::Protocol("truncated DNS packet".to_string()))
}

fn read_u32(packet: &[u8], pos: usize) -> Result<u32> {
    packet
        .get(pos..pos + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| NetError::Protocol("truncated DNS packet".to_string()))
}
