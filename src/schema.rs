/// Versioned TOPS message schema
///
/// Each (protocol version, message type) pair maps to a static `MessageLayout`:
/// an ordered list of typed field descriptors following the type byte. The
/// layout is fully determined by the pair, so a message decodes in one pass.
/// The two schema revisions are separate tables; shared type codes do not
/// share flag definitions.

use crate::protocol::{MessageType, ProtocolVersion};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    U8,
    U16,
    U32,
    U64,
}

impl IntWidth {
    pub const fn size(self) -> usize {
        match self {
            IntWidth::U8 => 1,
            IntWidth::U16 => 2,
            IntWidth::U32 => 4,
            IntWidth::U64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Flag byte, expanded through the flag table
    Flags,
    /// Event time, nanoseconds since the epoch
    Timestamp,
    /// 8 byte padded ticker
    Symbol,
    /// Little-endian unsigned integer, emitted as a number
    UInt(IntWidth),
    /// Single ASCII code byte, emitted as a one character string
    Code,
    /// Fixed length text, right-trimmed of padding
    Text(usize),
    /// Skipped bytes, never emitted
    Reserved(usize),
}

impl FieldKind {
    pub const fn size(self) -> usize {
        match self {
            FieldKind::Flags | FieldKind::Code => 1,
            FieldKind::Timestamp => 8,
            FieldKind::Symbol => SYMBOL_SIZE,
            FieldKind::UInt(width) => width.size(),
            FieldKind::Text(len) | FieldKind::Reserved(len) => len,
        }
    }
}

pub const SYMBOL_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    const fn new(name: &'static str, kind: FieldKind) -> Self {
        FieldSpec { name, kind }
    }
}

const FLAGS: FieldSpec = FieldSpec::new("flags", FieldKind::Flags);
const TIMESTAMP: FieldSpec = FieldSpec::new("timestamp", FieldKind::Timestamp);
const SYMBOL: FieldSpec = FieldSpec::new("symbol", FieldKind::Symbol);

const fn u8_field(name: &'static str) -> FieldSpec {
    FieldSpec::new(name, FieldKind::UInt(IntWidth::U8))
}

const fn u32_field(name: &'static str) -> FieldSpec {
    FieldSpec::new(name, FieldKind::UInt(IntWidth::U32))
}

const fn u64_field(name: &'static str) -> FieldSpec {
    FieldSpec::new(name, FieldKind::UInt(IntWidth::U64))
}

const fn code_field(name: &'static str) -> FieldSpec {
    FieldSpec::new(name, FieldKind::Code)
}

/// Named bit inside a message's flag byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagBit {
    pub name: &'static str,
    pub mask: u8,
}

const fn bit(name: &'static str, mask: u8) -> FlagBit {
    FlagBit { name, mask }
}

#[derive(Debug, Clone, Copy)]
pub struct MessageLayout {
    pub message_type: MessageType,
    pub fields: &'static [FieldSpec],
    pub flag_bits: &'static [FlagBit],
    /// Body length in bytes: type byte plus all fields
    pub body_len: usize,
}

impl MessageLayout {
    const fn new(
        message_type: MessageType,
        fields: &'static [FieldSpec],
        flag_bits: &'static [FlagBit],
    ) -> Self {
        let mut body_len = 1;
        let mut i = 0;
        while i < fields.len() {
            body_len += fields[i].kind.size();
            i += 1;
        }
        MessageLayout {
            message_type,
            fields,
            flag_bits,
            body_len,
        }
    }

    pub fn has_symbol(&self) -> bool {
        self.fields.iter().any(|f| f.kind == FieldKind::Symbol)
    }
}

#[derive(Debug)]
pub struct Schema {
    pub version: ProtocolVersion,
    layouts: &'static [MessageLayout],
}

impl Schema {
    pub fn for_version(version: ProtocolVersion) -> &'static Schema {
        match version {
            ProtocolVersion::V1 => &V1_SCHEMA,
            ProtocolVersion::V2 => &V2_SCHEMA,
        }
    }

    /// Layout for a raw type code, `None` when the code is not part of this revision
    pub fn layout(&self, code: u8) -> Option<&'static MessageLayout> {
        let layouts: &'static [MessageLayout] = self.layouts;
        layouts.iter().find(|layout| layout.message_type as u8 == code)
    }

    pub fn layouts(&self) -> &'static [MessageLayout] {
        self.layouts
    }

    pub fn flag_bits(&self, message_type: MessageType) -> &'static [FlagBit] {
        self.layout(message_type.code())
            .map(|layout| layout.flag_bits)
            .unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// TOPS 1.5
// ---------------------------------------------------------------------------

const V1_QUOTE_FLAGS: &[FlagBit] = &[bit("H", 0x80), bit("P", 0x40)];

// I and B share a mask in this revision
const V1_TRADE_FLAGS: &[FlagBit] = &[
    bit("F", 0x80),
    bit("T", 0x40),
    bit("I", 0x20),
    bit("B", 0x20),
];

const V1_QUOTE_FIELDS: &[FieldSpec] = &[
    FLAGS,
    TIMESTAMP,
    SYMBOL,
    u32_field("bidSize"),
    u64_field("bidPrice"),
    u64_field("askPrice"),
    u32_field("askSize"),
];

const V1_TRADE_FIELDS: &[FieldSpec] = &[
    FLAGS,
    TIMESTAMP,
    SYMBOL,
    u32_field("size"),
    u64_field("price"),
    u64_field("tradeId"),
    FieldSpec::new("reserved", FieldKind::Reserved(4)),
];

const V1_LAYOUTS: &[MessageLayout] = &[
    MessageLayout::new(MessageType::Quote, V1_QUOTE_FIELDS, V1_QUOTE_FLAGS),
    MessageLayout::new(MessageType::Trade, V1_TRADE_FIELDS, V1_TRADE_FLAGS),
    MessageLayout::new(MessageType::TradeBreak, V1_TRADE_FIELDS, V1_TRADE_FLAGS),
];

static V1_SCHEMA: Schema = Schema {
    version: ProtocolVersion::V1,
    layouts: V1_LAYOUTS,
};

// ---------------------------------------------------------------------------
// TOPS 1.6
// ---------------------------------------------------------------------------

const V2_DIRECTORY_FLAGS: &[FlagBit] = &[bit("T", 0x80), bit("W", 0x40), bit("E", 0x20)];

const V2_QUOTE_FLAGS: &[FlagBit] = &[bit("A", 0x80), bit("P", 0x40)];

const V2_TRADE_FLAGS: &[FlagBit] = &[
    bit("F", 0x80),
    bit("T", 0x40),
    bit("I", 0x20),
    bit("8", 0x10),
    bit("X", 0x08),
];

const V2_SYSTEM_EVENT_FIELDS: &[FieldSpec] = &[code_field("systemEvent"), TIMESTAMP];

const V2_DIRECTORY_FIELDS: &[FieldSpec] = &[
    FLAGS,
    TIMESTAMP,
    SYMBOL,
    u32_field("roundLotSize"),
    u64_field("adjustedPocPrice"),
    u8_field("LULDTier"),
];

const V2_TRADING_STATUS_FIELDS: &[FieldSpec] = &[
    code_field("tradingStatus"),
    TIMESTAMP,
    SYMBOL,
    FieldSpec::new("reason", FieldKind::Text(4)),
];

const V2_OPERATIONAL_HALT_FIELDS: &[FieldSpec] =
    &[code_field("operationalHaltStatus"), TIMESTAMP, SYMBOL];

const V2_SHORT_SALE_FIELDS: &[FieldSpec] = &[
    u8_field("shortSalePriceTestStatus"),
    TIMESTAMP,
    SYMBOL,
    code_field("detail"),
];

const V2_QUOTE_FIELDS: &[FieldSpec] = &[
    FLAGS,
    TIMESTAMP,
    SYMBOL,
    u32_field("bidSize"),
    u64_field("bidPrice"),
    u64_field("askPrice"),
    u32_field("askSize"),
];

const V2_TRADE_FIELDS: &[FieldSpec] = &[
    FLAGS,
    TIMESTAMP,
    SYMBOL,
    u32_field("size"),
    u64_field("price"),
    u64_field("tradeId"),
];

const V2_OFFICIAL_PRICE_FIELDS: &[FieldSpec] = &[
    code_field("priceType"),
    TIMESTAMP,
    SYMBOL,
    u64_field("officialPrice"),
];

const V2_AUCTION_FIELDS: &[FieldSpec] = &[
    code_field("auctionType"),
    TIMESTAMP,
    SYMBOL,
    u32_field("pairedShares"),
    u64_field("referencePrice"),
    u64_field("indicativeClearingPrice"),
    u32_field("imbalanceShares"),
    code_field("imbalanceSide"),
    u8_field("extensionNumber"),
    u32_field("scheduledAuctionTime"),
    u64_field("auctionBookClearingPrice"),
    u64_field("collarReferencePrice"),
    u64_field("lowerAuctionCollar"),
    u64_field("upperAuctionCollar"),
];

const V2_LAYOUTS: &[MessageLayout] = &[
    MessageLayout::new(MessageType::SystemEvent, V2_SYSTEM_EVENT_FIELDS, &[]),
    MessageLayout::new(
        MessageType::SecurityDirectory,
        V2_DIRECTORY_FIELDS,
        V2_DIRECTORY_FLAGS,
    ),
    MessageLayout::new(MessageType::TradingStatus, V2_TRADING_STATUS_FIELDS, &[]),
    MessageLayout::new(MessageType::OperationalHalt, V2_OPERATIONAL_HALT_FIELDS, &[]),
    MessageLayout::new(MessageType::ShortSalePriceTest, V2_SHORT_SALE_FIELDS, &[]),
    MessageLayout::new(MessageType::Quote, V2_QUOTE_FIELDS, V2_QUOTE_FLAGS),
    MessageLayout::new(MessageType::Trade, V2_TRADE_FIELDS, V2_TRADE_FLAGS),
    MessageLayout::new(MessageType::TradeBreak, V2_TRADE_FIELDS, V2_TRADE_FLAGS),
    MessageLayout::new(MessageType::OfficialPrice, V2_OFFICIAL_PRICE_FIELDS, &[]),
    MessageLayout::new(MessageType::Auction, V2_AUCTION_FIELDS, &[]),
];

static V2_SCHEMA: Schema = Schema {
    version: ProtocolVersion::V2,
    layouts: V2_LAYOUTS,
};

// Compile-time assertions for message body sizes
const _: () = {
    assert!(V1_LAYOUTS[0].body_len == 42);
    assert!(V1_LAYOUTS[1].body_len == 42);
    assert!(V2_LAYOUTS[0].body_len == 10);
    assert!(V2_LAYOUTS[1].body_len == 31);
    assert!(V2_LAYOUTS[2].body_len == 22);
    assert!(V2_LAYOUTS[3].body_len == 18);
    assert!(V2_LAYOUTS[4].body_len == 19);
    assert!(V2_LAYOUTS[5].body_len == 42);
    assert!(V2_LAYOUTS[6].body_len == 38);
    assert!(V2_LAYOUTS[8].body_len == 26);
    assert!(V2_LAYOUTS[9].body_len == 80);
};
