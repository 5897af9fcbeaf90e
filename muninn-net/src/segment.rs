use crate::error::{NetError, Result};
use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Fixed header length emitted by this codec; options are carried on the
/// value but never serialized.
pub const HEADER_LEN: usize = 20;

bitflags! {
    /// TCP control flags, low byte of the flags word at header offset 12
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TcpFlags: u16 {
        const FIN = 0x001;
        const SYN = 0x002;
        const RST = 0x004;
        const PSH = 0x008;
        const ACK = 0x010;
        const URG = 0x020;
        const ECE = 0x040;
        const CWR = 0x080;
    }
}

/// Optional fields negotiated out of band; not part of the 20-byte header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentOptions {
    pub mss: Option<u16>,
    pub window_scale: Option<u8>,
    pub sack_permitted: bool,
}

/// Application-level TCP segment record; immutable once built
#[derive(Debug, Clone, PartialEq)]
pub struct TcpSegment {
    pub source_port: u16,
    pub destination_port: u16,
    pub sequence: u32,
    pub acknowledgment: u32,
    pub data_offset: u8,
    pub flags: TcpFlags,
    pub window_size: u16,
    pub checksum: u16,
    pub urgent_pointer: u16,
    pub options: SegmentOptions,
    pub payload: Bytes,
    pub timestamp_ms: i64,
}

impl Default for TcpSegment {
    fn default() -> Self {
        Self {
            source_port: 0,
            destination_port: 0,
            sequence: 0,
            acknowledgment: 0,
            data_offset: 5,
            flags: TcpFlags::empty(),
            window_size: 65535,
            checksum: 0,
            urgent_pointer: 0,
            options: SegmentOptions::default(),
            payload: Bytes::new(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

impl TcpSegment {
    /// Serialize into the fixed 20-byte header followed by the payload
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u16(self.source_port);
        buf.put_u16(self.destination_port);
        buf.put_u32(self.sequence);
        buf.put_u32(self.acknowledgment);
        let offset_and_flags = (u16::from(self.data_offset) << 12) | self.flags.bits();
        buf.put_u16(offset_and_flags);
        buf.put_u16(self.window_size);
        buf.put_u16(self.checksum);
        buf.put_u16(self.urgent_pointer);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a serialized segment; the exact inverse of [`serialize`]
    ///
    /// [`serialize`]: TcpSegment::serialize
    pub fn parse(data: &[u8]) -> Result<TcpSegment> {
        if data.len() < HEADER_LEN {
            return Err(NetError::Protocol(format!(
                "TCP segment requires at least {HEADER_LEN} bytes, got {}",
                data.len()
            )));
        }
        let mut buf = data;
        let source_port = buf.get_u16();
        let destination_port = buf.get_u16();
        let sequence = buf.get_u32();
        let acknowledgment = buf.get_u32();
        let offset_and_flags = buf.get_u16();
        let window_size = buf.get_u16();
        let checksum = buf.get_u16();
        let urgent_pointer = buf.get_u16();
        Ok(TcpSegment {
            source_port,
            destination_port,
            sequence,
            acknowledgment,
            data_offset: (offset_and_flags >> 12) as u8,
            flags: TcpFlags::from_bits_truncate(offset_and_flags & 0x01ff),
            window_size,
            checksum,
            urgent_pointer,
            options: SegmentOptions::default(),
            payload: Bytes::copy_from_slice(buf),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        })
    }
}

/// RFC 1071 ones'-complement checksum over `data`
///
/// Built segments may carry the result in their `checksum` field; the
/// codec itself never validates it.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}
