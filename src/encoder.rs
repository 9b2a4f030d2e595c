/// Wire encoders for synthetic feeds
///
/// Builds message blocks, transport frames and Ethernet/IPv4/UDP packets the
/// decoder can read back. Used by the tests, the benches and the capture
/// generator demo.

use crate::protocol::*;
use crate::schema::SYMBOL_SIZE;
use byteorder::{ByteOrder, LittleEndian};
use etherparse::PacketBuilder;
use std::io;

/// UDP port IEX publishes TOPS on
pub const TOPS_UDP_PORT: u16 = 10378;

/// Builds one message block: length prefix followed by the body
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    body: Vec<u8>,
}

impl MessageBuilder {
    pub fn new(message_type: u8) -> Self {
        MessageBuilder {
            body: vec![message_type],
        }
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.body.push(v);
        self
    }

    pub fn u32(mut self, v: u32) -> Self {
        self.body.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(mut self, v: u64) -> Self {
        self.body.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Fixed width text, space padded (or truncated) to `len` bytes
    pub fn text(mut self, s: &str, len: usize) -> Self {
        let mut field = vec![b' '; len];
        let n = s.len().min(len);
        field[..n].copy_from_slice(&s.as_bytes()[..n]);
        self.body.extend_from_slice(&field);
        self
    }

    pub fn symbol(self, s: &str) -> Self {
        self.text(s, SYMBOL_SIZE)
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(bytes);
        self
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    pub fn build(self) -> Vec<u8> {
        let declared = self.body.len() as u16;
        self.build_with_length(declared)
    }

    /// Build with an explicit (possibly wrong) declared length
    pub fn build_with_length(self, declared: u16) -> Vec<u8> {
        let mut block = Vec::with_capacity(LENGTH_PREFIX_SIZE + self.body.len());
        block.extend_from_slice(&declared.to_le_bytes());
        block.extend_from_slice(&self.body);
        block
    }
}

pub fn quote_message(
    flags: u8,
    timestamp: u64,
    symbol: &str,
    bid_size: u32,
    bid_price: u64,
    ask_price: u64,
    ask_size: u32,
) -> Vec<u8> {
    MessageBuilder::new(MessageType::Quote.code())
        .u8(flags)
        .u64(timestamp)
        .symbol(symbol)
        .u32(bid_size)
        .u64(bid_price)
        .u64(ask_price)
        .u32(ask_size)
        .build()
}

/// Trade report in the TOPS 1.6 layout
pub fn trade_message(
    flags: u8,
    timestamp: u64,
    symbol: &str,
    size: u32,
    price: u64,
    trade_id: u64,
) -> Vec<u8> {
    MessageBuilder::new(MessageType::Trade.code())
        .u8(flags)
        .u64(timestamp)
        .symbol(symbol)
        .u32(size)
        .u64(price)
        .u64(trade_id)
        .build()
}

pub fn system_event_message(event: u8, timestamp: u64) -> Vec<u8> {
    MessageBuilder::new(MessageType::SystemEvent.code())
        .u8(event)
        .u64(timestamp)
        .build()
}

/// Builds one transport frame. `payload_length` and `message_count` are
/// derived from the appended blocks unless overridden.
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    header: TransportHeader,
    blocks: Vec<u8>,
    count: u16,
    count_override: Option<u16>,
}

impl FrameBuilder {
    pub fn new(session_id: u32, first_sequence_number: u64, timestamp_nanos: u64) -> Self {
        FrameBuilder {
            header: TransportHeader {
                version: 1,
                reserved: 0,
                protocol_id: TOPS_PROTOCOL_ID,
                channel_id: 1,
                session_id,
                payload_length: 0,
                message_count: 0,
                stream_offset: 0,
                first_sequence_number,
                timestamp_nanos,
            },
            blocks: Vec::new(),
            count: 0,
            count_override: None,
        }
    }

    pub fn stream_offset(mut self, offset: u64) -> Self {
        self.header.stream_offset = offset;
        self
    }

    pub fn message(mut self, block: &[u8]) -> Self {
        self.blocks.extend_from_slice(block);
        self.count += 1;
        self
    }

    pub fn message_count(mut self, count: u16) -> Self {
        self.count_override = Some(count);
        self
    }

    pub fn header(&self) -> TransportHeader {
        TransportHeader {
            payload_length: self.blocks.len() as u16,
            message_count: self.count_override.unwrap_or(self.count),
            ..self.header
        }
    }

    pub fn build(self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(HEADER_SIZE + self.blocks.len());
        frame.extend_from_slice(&self.header().to_bytes());
        frame.extend_from_slice(&self.blocks);
        frame
    }
}

/// Wrap an application payload in Ethernet II, IPv4 and UDP headers
pub fn ethernet_udp(payload: &[u8]) -> io::Result<Vec<u8>> {
    let builder = PacketBuilder::ethernet2([0x02, 0, 0, 0, 0, 1], [0x01, 0, 0x5e, 0x57, 0x15, 0x04])
        .ipv4([10, 0, 0, 1], [233, 215, 21, 4], 64)
        .udp(TOPS_UDP_PORT, TOPS_UDP_PORT);
    let mut packet = Vec::with_capacity(builder.size(payload.len()));
    builder
        .write(&mut packet, payload)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    Ok(packet)
}

/// Patch the declared length of the message block at `offset`
pub fn set_declared_length(buffer: &mut [u8], offset: usize, declared: u16) {
    LittleEndian::write_u16(&mut buffer[offset..offset + LENGTH_PREFIX_SIZE], declared);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_block_size() {
        let block = quote_message(0, 0, "IBM", 1, 2, 3, 4);
        assert_eq!(block.len(), 44);
        assert_eq!(LittleEndian::read_u16(&block[0..2]), 42);
        assert_eq!(&block[12..20], b"IBM     ");
    }

    #[test]
    fn test_frame_counts_messages() {
        let builder = FrameBuilder::new(7, 100, 0)
            .message(&system_event_message(b'O', 0))
            .message(&trade_message(0, 0, "IBM", 1, 2, 3));
        let header = builder.header();
        assert_eq!(header.message_count, 2);
        assert_eq!(header.payload_length, 12 + 40);
        assert_eq!(builder.build().len(), HEADER_SIZE + 52);
    }

    #[test]
    fn test_ethernet_udp_wraps_payload() {
        let packet = ethernet_udp(&[1, 2, 3]).unwrap();
        assert_eq!(packet.len(), 14 + 20 + 8 + 3);
        assert_eq!(&packet[packet.len() - 3..], &[1, 2, 3]);
    }
}
