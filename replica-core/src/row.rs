//! Row and record types for replicated addresses.
//!
//! A [`Row`] is the field bag exchanged with both the remote source and the
//! local store. [`AddressRecord`] is a typed view over a row that pulls out
//! the three fields replication cares about and keeps everything else opaque.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StorageError;

/// Key field of every replicated row.
pub const FIELD_ID: &str = "ID";

/// Scoping field naming the owning remote business partner.
pub const FIELD_BUSINESS_PARTNER: &str = "businessPartner";

/// Logical-deletion marker maintained only by the local replica.
pub const FIELD_TOMBSTONE: &str = "tombstone";

/// Ordered mapping from field name to value.
///
/// `serde_json::Map` keeps keys sorted, so two rows with the same fields
/// compare and serialize identically regardless of insertion order.
pub type Row = serde_json::Map<String, Value>;

/// Accessors for the replication fields of a [`Row`].
pub trait RowExt {
    /// The row's `ID`, if present and a string.
    fn id(&self) -> Option<&str>;

    /// The row's `businessPartner`, if present and a string.
    fn business_partner(&self) -> Option<&str>;

    /// Whether the row is marked as deleted upstream.
    ///
    /// A missing or null `tombstone` field reads as `false`.
    fn is_tombstoned(&self) -> bool;

    /// Set the tombstone flag, leaving every other field untouched.
    fn set_tombstone(&mut self, tombstone: bool);

    /// The row's `ID`, or a [`StorageError::MissingKey`] naming the entity set.
    fn require_id(&self, entity_set: &str) -> Result<&str, StorageError> {
        self.id().ok_or_else(|| StorageError::MissingKey {
            entity_set: entity_set.to_string(),
            field: FIELD_ID.to_string(),
        })
    }
}

impl RowExt for Row {
    fn id(&self) -> Option<&str> {
        self.get(FIELD_ID).and_then(Value::as_str)
    }

    fn business_partner(&self) -> Option<&str> {
        self.get(FIELD_BUSINESS_PARTNER).and_then(Value::as_str)
    }

    fn is_tombstoned(&self) -> bool {
        self.get(FIELD_TOMBSTONE)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    fn set_tombstone(&mut self, tombstone: bool) {
        self.insert(FIELD_TOMBSTONE.to_string(), Value::Bool(tombstone));
    }
}

/// Build the replacement for a local replica from its matching remote row.
///
/// Every field is copied from `remote`; nothing from the old replica survives.
/// The tombstone flag is local metadata the remote never carries, so the
/// result is a live (non-tombstoned) replica.
pub fn replace_from_remote(remote: &Row) -> Row {
    let mut merged = remote.clone();
    merged.remove(FIELD_TOMBSTONE);
    merged
}

/// Typed view over an address row.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressRecord {
    /// Unique identifier within the replica store.
    pub id: String,
    /// Owning remote partner.
    pub business_partner: String,
    /// Marked as deleted upstream.
    pub tombstone: bool,
    /// Every other field (street, city, region, ...).
    pub fields: Row,
}

impl AddressRecord {
    /// Create a live record with an empty field bag.
    pub fn new(id: impl Into<String>, business_partner: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            business_partner: business_partner.into(),
            tombstone: false,
            fields: Row::new(),
        }
    }

    /// Add an opaque field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Mark the record as tombstoned.
    pub fn tombstoned(mut self) -> Self {
        self.tombstone = true;
        self
    }

    /// Read a record out of a row.
    ///
    /// Returns `None` if `ID` or `businessPartner` is missing or not a string.
    pub fn from_row(row: &Row) -> Option<Self> {
        let id = row.id()?.to_string();
        let business_partner = row.business_partner()?.to_string();
        let tombstone = row.is_tombstoned();
        let fields = row
            .iter()
            .filter(|(k, _)| {
                !matches!(
                    k.as_str(),
                    FIELD_ID | FIELD_BUSINESS_PARTNER | FIELD_TOMBSTONE
                )
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Some(Self {
            id,
            business_partner,
            tombstone,
            fields,
        })
    }

    /// Flatten the record back into a row.
    ///
    /// A live record carries no `tombstone` field, matching rows that came
    /// straight from the remote source.
    pub fn into_row(self) -> Row {
        let mut row = self.fields;
        row.insert(FIELD_ID.to_string(), Value::String(self.id));
        row.insert(
            FIELD_BUSINESS_PARTNER.to_string(),
            Value::String(self.business_partner),
        );
        if self.tombstone {
            row.set_tombstone(true);
        }
        row
    }
}

/// An order draft referencing a shipping address.
///
/// Only used to trigger lazy replication; never persisted here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReference {
    /// Order key, if the draft already has one.
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    /// Referenced address; `None` when the patch does not touch it.
    #[serde(
        rename = "shippingAddress_ID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub shipping_address_id: Option<String>,
}

impl OrderReference {
    /// Create a reference to the given shipping address.
    pub fn shipping_to(address_id: impl Into<String>) -> Self {
        Self {
            order_id: None,
            shipping_address_id: Some(address_id.into()),
        }
    }
}
