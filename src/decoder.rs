/// Schema-driven message and frame decoder
///
/// `MessageDecoder` walks one message body using the layout registered for its
/// type code in the active schema revision. `FrameDecoder` reads the transport
/// header and then decodes exactly `message_count` messages, advancing by each
/// message's declared length.

use crate::flags::{decode_flags, FlagSet};
use crate::protocol::*;
use crate::schema::{FieldKind, IntWidth, Schema};
use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use thiserror::Error;

fn printable(code: &u8) -> char {
    if code.is_ascii_graphic() {
        *code as char
    } else {
        '?'
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated frame at offset {offset}: need {need} bytes, have {have}")]
    TruncatedFrame { offset: usize, need: usize, have: usize },

    #[error("message count mismatch: header declares {declared}, payload ends after {decoded}")]
    MessageCountMismatch { declared: u16, decoded: u16 },

    #[error(
        "unknown message type {code:#04x} ('{}') at offset {offset} for {version}",
        printable(.code)
    )]
    UnknownMessageType {
        code: u8,
        offset: usize,
        version: ProtocolVersion,
    },

    #[error(
        "length mismatch for type '{}' at offset {offset}: declared {declared}, layout has {expected}",
        printable(.code)
    )]
    LengthMismatch {
        code: u8,
        offset: usize,
        declared: u16,
        expected: usize,
    },
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Decoded value of a non-common message field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    UInt(u64),
    Code(char),
    Text(String),
}

/// One decoded TOPS message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_type: MessageType,
    /// Body length as declared on the wire (excludes the length prefix)
    pub message_length: u16,
    pub timestamp_nanos: u64,
    /// Right-trimmed ticker; `None` for types without a symbol field
    pub symbol: Option<String>,
    /// Named flag bits; `None` when the type carries no flag byte
    pub flags: Option<FlagSet>,
    /// Remaining fields in layout order
    pub fields: Vec<(&'static str, FieldValue)>,
}

impl Message {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn uint(&self, name: &str) -> Option<u64> {
        match self.field(name) {
            Some(FieldValue::UInt(v)) => Some(*v),
            _ => None,
        }
    }
}

/// Transport header plus its messages, in wire order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFrame {
    pub header: TransportHeader,
    pub messages: Vec<Message>,
}

fn read_uint(raw: &[u8], width: IntWidth) -> u64 {
    match width {
        IntWidth::U8 => raw[0] as u64,
        IntWidth::U16 => LittleEndian::read_u16(raw) as u64,
        IntWidth::U32 => LittleEndian::read_u32(raw) as u64,
        IntWidth::U64 => LittleEndian::read_u64(raw),
    }
}

/// Printable codes render as characters, anything else as its number
fn code_value(byte: u8) -> FieldValue {
    if byte.is_ascii_graphic() {
        FieldValue::Code(byte as char)
    } else {
        FieldValue::UInt(byte as u64)
    }
}

fn trim_text(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(|c| c == ' ' || c == '\0')
        .to_string()
}

#[derive(Debug, Clone, Copy)]
pub struct MessageDecoder {
    schema: &'static Schema,
}

impl MessageDecoder {
    pub fn new(version: ProtocolVersion) -> Self {
        MessageDecoder {
            schema: Schema::for_version(version),
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.schema.version
    }

    /// Decode the message block starting at `offset`.
    /// Returns the message and the bytes consumed (length prefix included).
    pub fn decode_message(&self, buffer: &[u8], offset: usize) -> DecodeResult<(Message, usize)> {
        let have = buffer.len().saturating_sub(offset);
        if have < LENGTH_PREFIX_SIZE + 1 {
            return Err(DecodeError::TruncatedFrame {
                offset,
                need: LENGTH_PREFIX_SIZE + 1,
                have,
            });
        }

        let declared = LittleEndian::read_u16(&buffer[offset..offset + LENGTH_PREFIX_SIZE]);
        let consumed = LENGTH_PREFIX_SIZE + declared as usize;
        if have < consumed {
            return Err(DecodeError::TruncatedFrame {
                offset,
                need: consumed,
                have,
            });
        }

        let code = buffer[offset + LENGTH_PREFIX_SIZE];
        let layout = self
            .schema
            .layout(code)
            .ok_or(DecodeError::UnknownMessageType {
                code,
                offset,
                version: self.schema.version,
            })?;

        if declared as usize != layout.body_len {
            return Err(DecodeError::LengthMismatch {
                code,
                offset,
                declared,
                expected: layout.body_len,
            });
        }

        let body = &buffer[offset + LENGTH_PREFIX_SIZE..offset + consumed];
        let mut timestamp_nanos = 0;
        let mut symbol = None;
        let mut flag_byte = None;
        let mut fields = Vec::with_capacity(layout.fields.len());

        // Type byte already read
        let mut pos = 1;
        for field in layout.fields {
            let size = field.kind.size();
            let raw = &body[pos..pos + size];
            pos += size;

            match field.kind {
                FieldKind::Flags => flag_byte = Some(raw[0]),
                FieldKind::Timestamp => timestamp_nanos = LittleEndian::read_u64(raw),
                FieldKind::Symbol => symbol = Some(trim_text(raw)),
                FieldKind::UInt(width) => {
                    fields.push((field.name, FieldValue::UInt(read_uint(raw, width))))
                }
                FieldKind::Code => fields.push((field.name, code_value(raw[0]))),
                FieldKind::Text(_) => fields.push((field.name, FieldValue::Text(trim_text(raw)))),
                FieldKind::Reserved(_) => {}
            }
        }
        debug_assert_eq!(pos, body.len());

        let flags = flag_byte
            .map(|byte| decode_flags(self.schema.version, layout.message_type, byte))
            .filter(|flags| !flags.is_empty());

        let message = Message {
            message_type: layout.message_type,
            message_length: declared,
            timestamp_nanos,
            symbol,
            flags,
            fields,
        };

        Ok((message, consumed))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    messages: MessageDecoder,
}

impl FrameDecoder {
    pub fn new(version: ProtocolVersion) -> Self {
        FrameDecoder {
            messages: MessageDecoder::new(version),
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.messages.version()
    }

    pub fn decode_header(buffer: &[u8]) -> DecodeResult<TransportHeader> {
        if buffer.len() < HEADER_SIZE {
            return Err(DecodeError::TruncatedFrame {
                offset: 0,
                need: HEADER_SIZE,
                have: buffer.len(),
            });
        }
        Ok(TransportHeader::read_from(buffer))
    }

    /// Decode one captured payload into a frame with all of its messages
    pub fn decode_frame(&self, buffer: &[u8]) -> DecodeResult<TransportFrame> {
        let mut messages = Vec::new();
        let header = self.decode_messages(buffer, |msg| messages.push(msg))?;
        Ok(TransportFrame { header, messages })
    }

    /// Decode the messages of one payload, handing each to `callback` in wire order.
    /// Returns the transport header once all `message_count` messages are decoded.
    pub fn decode_messages<F>(
        &self,
        buffer: &[u8],
        mut callback: F,
    ) -> DecodeResult<TransportHeader>
    where
        F: FnMut(Message),
    {
        let header = Self::decode_header(buffer)?;
        let mut offset = HEADER_SIZE;

        for decoded in 0..header.message_count {
            if buffer.len() - offset < LENGTH_PREFIX_SIZE {
                return Err(DecodeError::MessageCountMismatch {
                    declared: header.message_count,
                    decoded,
                });
            }
            let (msg, consumed) = self.messages.decode_message(buffer, offset)?;
            offset += consumed;
            callback(msg);
        }

        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote_block(flags: u8) -> Vec<u8> {
        let mut msg = vec![0u8; 44];
        LittleEndian::write_u16(&mut msg[0..2], 42);
        msg[2] = b'Q';
        msg[3] = flags;
        LittleEndian::write_u64(&mut msg[4..12], 1_500_000_000_000_000_000);
        msg[12..20].copy_from_slice(b"AAPL    ");
        LittleEndian::write_u32(&mut msg[20..24], 100);
        LittleEndian::write_u64(&mut msg[24..32], 1_234_500);
        LittleEndian::write_u64(&mut msg[32..40], 1_235_000);
        LittleEndian::write_u32(&mut msg[40..44], 200);
        msg
    }

    #[test]
    fn test_decode_quote() {
        let decoder = MessageDecoder::new(ProtocolVersion::V2);
        let (msg, consumed) = decoder.decode_message(&quote_block(0xC0), 0).unwrap();
        assert_eq!(consumed, 44);
        assert_eq!(msg.message_type, MessageType::Quote);
        assert_eq!(msg.symbol.as_deref(), Some("AAPL"));
        assert_eq!(msg.uint("bidSize"), Some(100));
        assert_eq!(msg.uint("askPrice"), Some(1_235_000));
        assert_eq!(msg.flags.as_ref().and_then(|f| f.get("A")), Some(true));
    }

    #[test]
    fn test_decode_at_offset() {
        let mut buffer = vec![0xEE; 5];
        buffer.extend_from_slice(&quote_block(0));
        let decoder = MessageDecoder::new(ProtocolVersion::V1);
        let (msg, consumed) = decoder.decode_message(&buffer, 5).unwrap();
        assert_eq!(consumed, 44);
        assert_eq!(msg.flags.as_ref().and_then(|f| f.get("H")), Some(false));
    }

    #[test]
    fn test_unknown_message_type() {
        let mut msg = quote_block(0);
        msg[2] = b'Z';
        let result = MessageDecoder::new(ProtocolVersion::V2).decode_message(&msg, 0);
        assert!(matches!(result, Err(DecodeError::UnknownMessageType { code: b'Z', .. })));
    }

    #[test]
    fn test_v2_type_unknown_to_v1() {
        let mut msg = vec![0u8; 12];
        LittleEndian::write_u16(&mut msg[0..2], 10);
        msg[2] = b'S';
        msg[3] = b'O';
        assert!(MessageDecoder::new(ProtocolVersion::V2).decode_message(&msg, 0).is_ok());
        let result = MessageDecoder::new(ProtocolVersion::V1).decode_message(&msg, 0);
        assert!(matches!(result, Err(DecodeError::UnknownMessageType { code: b'S', .. })));
    }

    #[test]
    fn test_length_mismatch() {
        let mut msg = quote_block(0);
        msg.extend_from_slice(&[0, 0]);
        LittleEndian::write_u16(&mut msg[0..2], 44);
        let result = MessageDecoder::new(ProtocolVersion::V2).decode_message(&msg, 0);
        assert!(matches!(
            result,
            Err(DecodeError::LengthMismatch { declared: 44, expected: 42, .. })
        ));
    }

    #[test]
    fn test_truncated_message() {
        let msg = quote_block(0);
        let result = MessageDecoder::new(ProtocolVersion::V2).decode_message(&msg[..30], 0);
        assert!(matches!(
            result,
            Err(DecodeError::TruncatedFrame { need: 44, have: 30, .. })
        ));
    }

    #[test]
    fn test_header_too_small() {
        let result = FrameDecoder::decode_header(&[0u8; 12]);
        assert!(matches!(result, Err(DecodeError::TruncatedFrame { need: 40, have: 12, .. })));
    }

    #[test]
    fn test_error_messages_name_the_type() {
        let err = DecodeError::UnknownMessageType {
            code: b'Z',
            offset: 40,
            version: ProtocolVersion::V1,
        };
        assert_eq!(
            err.to_string(),
            "unknown message type 0x5a ('Z') at offset 40 for TOPS 1.5"
        );
    }
}
