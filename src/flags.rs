/// Flag byte expansion
///
/// Maps a raw flag byte to the named bits defined for a message type in the
/// active schema revision. Bits without a name are ignored.

use crate::protocol::{MessageType, ProtocolVersion};
use crate::schema::Schema;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Named flag bits in schema table order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlagSet {
    bits: Vec<(&'static str, bool)>,
}

impl FlagSet {
    pub fn get(&self, name: &str) -> Option<bool> {
        self.bits.iter().find(|(n, _)| *n == name).map(|&(_, set)| set)
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, bool)> + '_ {
        self.bits.iter().copied()
    }
}

impl Serialize for FlagSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.bits.len()))?;
        for (name, set) in &self.bits {
            map.serialize_entry(name, set)?;
        }
        map.end()
    }
}

/// Expand `flag_byte` for `message_type` under `version`.
/// Types without flag bits (or not in the revision) yield an empty set.
pub fn decode_flags(version: ProtocolVersion, message_type: MessageType, flag_byte: u8) -> FlagSet {
    let bits = Schema::for_version(version)
        .flag_bits(message_type)
        .iter()
        .map(|bit| (bit.name, (flag_byte & bit.mask) != 0))
        .collect();
    FlagSet { bits }
}
