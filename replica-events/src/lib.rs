//! Replica Events - Change Event Envelopes
//!
//! Parses the payload text delivered by the messaging service when business
//! partners change upstream. The envelope carries only the keys of the
//! changed partners, never a field diff:
//!
//! ```text
//! {
//!   "specversion": "1.0",
//!   "type": "sap.s4.beh.businesspartner.v1.BusinessPartner.Changed.v1",
//!   "data": { "key": [ { "businesspartner": "10401010" } ] }
//! }
//! ```
//!
//! Everything outside `data.key[].businesspartner` is ignored.

mod envelope;

pub use envelope::{ChangeEvent, InboundMessage, PARTNER_KEY_FIELD};
