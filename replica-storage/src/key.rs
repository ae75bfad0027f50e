//! Row keys for the LMDB replica store.
//!
//! A key is the entity set name, a separator byte, then the row `ID`.
//! The separator never occurs in UTF-8 text, so an entity set's rows form
//! one contiguous, prefix-addressable range.

use replica_core::EntitySet;

/// Separator byte between entity set and row id. Invalid in UTF-8.
const SEPARATOR: u8 = 0xFF;

/// Storage key of one replica row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey {
    entity_set: EntitySet,
    id: String,
}

impl RowKey {
    pub fn new(entity_set: EntitySet, id: impl Into<String>) -> Self {
        Self {
            entity_set,
            id: id.into(),
        }
    }

    pub fn entity_set(&self) -> &EntitySet {
        &self.entity_set
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Encode as `[entity_set bytes][0xFF][id bytes]`.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Self::prefix(&self.entity_set);
        bytes.extend_from_slice(self.id.as_bytes());
        bytes
    }

    /// Decode a key produced by [`RowKey::encode`].
    ///
    /// Returns `None` if the separator is missing or either part is not UTF-8.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let split = bytes.iter().position(|b| *b == SEPARATOR)?;
        let entity_set = std::str::from_utf8(&bytes[..split]).ok()?;
        let id = std::str::from_utf8(&bytes[split + 1..]).ok()?;
        Some(Self::new(EntitySet::new(entity_set), id))
    }

    /// Key prefix shared by every row of an entity set.
    pub fn prefix(entity_set: &EntitySet) -> Vec<u8> {
        let name = entity_set.as_str().as_bytes();
        let mut bytes = Vec::with_capacity(name.len() + 1);
        bytes.extend_from_slice(name);
        bytes.push(SEPARATOR);
        bytes
    }
}
