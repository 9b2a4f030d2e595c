/// IEX-TP transport framing and TOPS message type codes
///
/// Transport header: 40 bytes, all integers little-endian
///   - version: u8
///   - reserved: u8
///   - protocol_id: u16
///   - channel_id: u32
///   - session_id: u32
///   - payload_length: u16 - bytes of message blocks following the header
///   - message_count: u16
///   - stream_offset: u64
///   - first_sequence_number: u64
///   - timestamp: u64 - nanoseconds since the epoch
///
/// Each message block: [message_length: u16][message body: message_length bytes]
/// The body starts with a one byte message type.

use byteorder::{ByteOrder, LittleEndian};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const HEADER_SIZE: usize = 40;

/// Size of the length prefix in front of every message body
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// TOPS message protocol id carried in the transport header
pub const TOPS_PROTOCOL_ID: u16 = 0x8003;

/// Schema revision of the TOPS feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    /// TOPS 1.5: quotes, trades and trade breaks only
    V1,
    /// TOPS 1.6: adds administrative and auction messages
    V2,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V1 => f.write_str("TOPS 1.5"),
            ProtocolVersion::V2 => f.write_str("TOPS 1.6"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown protocol version {0:?} (expected 1.5 or 1.6)")]
pub struct UnknownProtocolVersion(pub String);

impl FromStr for ProtocolVersion {
    type Err = UnknownProtocolVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1.5" | "v1" | "tops-1.5" => Ok(ProtocolVersion::V1),
            "1.6" | "v2" | "tops-1.6" => Ok(ProtocolVersion::V2),
            _ => Err(UnknownProtocolVersion(s.to_string())),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    SystemEvent = b'S',
    SecurityDirectory = b'D',
    TradingStatus = b'H',
    OperationalHalt = b'O',
    ShortSalePriceTest = b'P',
    Quote = b'Q',
    Trade = b'T',
    TradeBreak = b'B',
    OfficialPrice = b'X',
    Auction = b'A',
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            b'S' => Some(MessageType::SystemEvent),
            b'D' => Some(MessageType::SecurityDirectory),
            b'H' => Some(MessageType::TradingStatus),
            b'O' => Some(MessageType::OperationalHalt),
            b'P' => Some(MessageType::ShortSalePriceTest),
            b'Q' => Some(MessageType::Quote),
            b'T' => Some(MessageType::Trade),
            b'B' => Some(MessageType::TradeBreak),
            b'X' => Some(MessageType::OfficialPrice),
            b'A' => Some(MessageType::Auction),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Printable form used in decoded records
    pub fn as_char(self) -> char {
        self as u8 as char
    }
}

/// Fixed transport header in front of every batch of messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportHeader {
    pub version: u8,
    pub reserved: u8,
    pub protocol_id: u16,
    pub channel_id: u32,
    pub session_id: u32,
    pub payload_length: u16,
    pub message_count: u16,
    pub stream_offset: u64,
    pub first_sequence_number: u64,
    pub timestamp_nanos: u64,
}

impl TransportHeader {
    /// Read the header from the first `HEADER_SIZE` bytes of `buf`.
    /// The caller guarantees the length.
    pub(crate) fn read_from(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= HEADER_SIZE);
        TransportHeader {
            version: buf[0],
            reserved: buf[1],
            protocol_id: LittleEndian::read_u16(&buf[2..4]),
            channel_id: LittleEndian::read_u32(&buf[4..8]),
            session_id: LittleEndian::read_u32(&buf[8..12]),
            payload_length: LittleEndian::read_u16(&buf[12..14]),
            message_count: LittleEndian::read_u16(&buf[14..16]),
            stream_offset: LittleEndian::read_u64(&buf[16..24]),
            first_sequence_number: LittleEndian::read_u64(&buf[24..32]),
            timestamp_nanos: LittleEndian::read_u64(&buf[32..40]),
        }
    }

    /// Write the header in wire layout
    pub fn write_to(&self, buf: &mut [u8; HEADER_SIZE]) {
        buf[0] = self.version;
        buf[1] = self.reserved;
        LittleEndian::write_u16(&mut buf[2..4], self.protocol_id);
        LittleEndian::write_u32(&mut buf[4..8], self.channel_id);
        LittleEndian::write_u32(&mut buf[8..12], self.session_id);
        LittleEndian::write_u16(&mut buf[12..14], self.payload_length);
        LittleEndian::write_u16(&mut buf[14..16], self.message_count);
        LittleEndian::write_u64(&mut buf[16..24], self.stream_offset);
        LittleEndian::write_u64(&mut buf[24..32], self.first_sequence_number);
        LittleEndian::write_u64(&mut buf[32..40], self.timestamp_nanos);
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.write_to(&mut buf);
        buf
    }
}
