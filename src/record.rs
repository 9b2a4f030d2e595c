/// JSON projection of decoded messages
///
/// A `DecodedRecord` is the flat object written for every message: the type as
/// a one character string, the event time as an RFC 3339 UTC timestamp, the
/// symbol when the type has one, the layout's remaining fields, and the named
/// flag bits when the type carries a flag byte. Prices stay raw scaled integers.

use crate::decoder::Message;
use chrono::{DateTime, SecondsFormat};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Render nanoseconds since the epoch as `YYYY-MM-DDTHH:MM:SS.fffffffffZ`
pub fn format_timestamp(nanos: u64) -> String {
    let nanos = i64::try_from(nanos).unwrap_or(i64::MAX);
    DateTime::from_timestamp_nanos(nanos).to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[derive(Debug, Clone, Copy)]
pub struct DecodedRecord<'a> {
    message: &'a Message,
}

impl<'a> DecodedRecord<'a> {
    pub fn new(message: &'a Message) -> Self {
        DecodedRecord { message }
    }
}

impl<'a> From<&'a Message> for DecodedRecord<'a> {
    fn from(message: &'a Message) -> Self {
        DecodedRecord::new(message)
    }
}

impl Serialize for DecodedRecord<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let msg = self.message;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("messageType", &msg.message_type.as_char())?;
        map.serialize_entry("timestamp", &format_timestamp(msg.timestamp_nanos))?;
        if let Some(symbol) = &msg.symbol {
            map.serialize_entry("symbol", symbol)?;
        }
        for (name, value) in &msg.fields {
            map.serialize_entry(name, value)?;
        }
        if let Some(flags) = &msg.flags {
            map.serialize_entry("flags", flags)?;
        }
        map.end()
    }
}
