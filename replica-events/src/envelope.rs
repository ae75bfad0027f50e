//! Change event envelope parsing.

use replica_core::{BusinessPartnerId, EventError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field naming the changed partner inside each `data.key[]` entry.
pub const PARTNER_KEY_FIELD: &str = "businesspartner";

// ============================================================================
// INBOUND MESSAGE
// ============================================================================

/// A message as handed over by the transport: where it came from and its
/// raw payload text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Messaging service that delivered the message.
    pub service: String,
    /// Event topic.
    pub event: String,
    /// Payload text, not yet parsed.
    pub payload: String,
}

impl InboundMessage {
    pub fn new(
        service: impl Into<String>,
        event: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            event: event.into(),
            payload: payload.into(),
        }
    }

    /// Parse the payload as a partner change event.
    pub fn change_event(&self) -> Result<ChangeEvent, EventError> {
        ChangeEvent::parse(&self.payload)
    }
}

// ============================================================================
// CHANGE EVENT
// ============================================================================

/// The set of business partners a change event names.
///
/// Partners appear in first-mention order without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeEvent {
    partners: Vec<BusinessPartnerId>,
}

impl ChangeEvent {
    /// An event naming the given partners.
    pub fn for_partners<I, P>(partners: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<BusinessPartnerId>,
    {
        let mut event = Self::default();
        for partner in partners {
            event.push(partner.into());
        }
        event
    }

    /// Parse payload text.
    ///
    /// Fails with [`EventError::Malformed`] when the text is not JSON or when
    /// `data` is missing or not an object. A missing or non-array `key`, and
    /// entries without a string `businesspartner`, contribute nothing.
    pub fn parse(payload: &str) -> Result<Self, EventError> {
        let envelope: Value = serde_json::from_str(payload).map_err(|e| EventError::Malformed {
            reason: e.to_string(),
        })?;

        let data = match envelope.get("data") {
            Some(Value::Object(data)) => data,
            Some(other) => {
                return Err(EventError::Malformed {
                    reason: format!("'data' is {}, expected an object", kind_of(other)),
                })
            }
            None => {
                return Err(EventError::Malformed {
                    reason: "envelope has no 'data' field".to_string(),
                })
            }
        };

        let keys = match data.get("key") {
            Some(Value::Array(keys)) => keys.as_slice(),
            _ => &[],
        };

        let mut event = Self::default();
        for key in keys {
            match key.get(PARTNER_KEY_FIELD) {
                Some(Value::String(partner)) if !partner.is_empty() => {
                    event.push(BusinessPartnerId::new(partner.as_str()));
                }
                Some(Value::Null) | None => {}
                Some(other) => {
                    tracing::debug!(
                        value = %other,
                        "skipping change event key with non-string business partner"
                    );
                }
            }
        }
        Ok(event)
    }

    /// Parse payload text, treating anything unreadable as an empty change
    /// set. The parse error is returned alongside so it can be reported.
    pub fn parse_or_empty(payload: &str) -> (Self, Option<EventError>) {
        match Self::parse(payload) {
            Ok(event) => (event, None),
            Err(err) => (Self::default(), Some(err)),
        }
    }

    pub fn partners(&self) -> &[BusinessPartnerId] {
        &self.partners
    }

    pub fn is_empty(&self) -> bool {
        self.partners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.partners.len()
    }

    fn push(&mut self, partner: BusinessPartnerId) {
        if !self.partners.contains(&partner) {
            self.partners.push(partner);
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(event: &ChangeEvent) -> Vec<&str> {
        event.partners().iter().map(BusinessPartnerId::as_str).collect()
    }

    #[test]
    fn test_parse_single_partner() {
        let event =
            ChangeEvent::parse(r#"{"data":{"key":[{"businesspartner":"BP100"}]}}"#).unwrap();
        assert_eq!(ids(&event), vec!["BP100"]);
    }

    #[test]
    fn test_parse_ignores_other_envelope_fields() {
        let payload = r#"{
            "specversion": "1.0",
            "type": "BusinessPartner.Changed",
            "data": {
                "key": [
                    {"businesspartner": "BP100", "extra": 1},
                    {"businesspartner": "BP200"}
                ],
                "other": true
            }
        }"#;
        let event = ChangeEvent::parse(payload).unwrap();
        assert_eq!(ids(&event), vec!["BP100", "BP200"]);
    }

    #[test]
    fn test_parse_skips_null_and_missing_partners() {
        let payload = r#"{"data":{"key":[
            {"businesspartner": null},
            {},
            {"businesspartner": 42},
            {"businesspartner": ""},
            {"businesspartner": "BP300"}
        ]}}"#;
        let event = ChangeEvent::parse(payload).unwrap();
        assert_eq!(ids(&event), vec!["BP300"]);
    }

    #[test]
    fn test_parse_deduplicates_in_first_mention_order() {
        let payload = r#"{"data":{"key":[
            {"businesspartner":"BP2"},
            {"businesspartner":"BP1"},
            {"businesspartner":"BP2"}
        ]}}"#;
        let event = ChangeEvent::parse(payload).unwrap();
        assert_eq!(ids(&event), vec!["BP2", "BP1"]);
    }

    #[test]
    fn test_missing_key_array_is_empty() {
        let event = ChangeEvent::parse(r#"{"data":{}}"#).unwrap();
        assert!(event.is_empty());

        let event = ChangeEvent::parse(r#"{"data":{"key":"BP100"}}"#).unwrap();
        assert!(event.is_empty());
    }

    #[test]
    fn test_malformed_payloads() {
        for payload in ["{not json", "", r#"{"data": 1}"#, r#"{"data": null}"#, r#"{"id": "x"}"#, "[]"] {
            let result = ChangeEvent::parse(payload);
            assert!(
                matches!(result, Err(EventError::Malformed { .. })),
                "expected malformed for {:?}",
                payload
            );
        }
    }

    #[test]
    fn test_parse_or_empty() {
        let (event, err) = ChangeEvent::parse_or_empty("{not json");
        assert!(event.is_empty());
        assert!(err.is_some());

        let (event, err) =
            ChangeEvent::parse_or_empty(r#"{"data":{"key":[{"businesspartner":"BP1"}]}}"#);
        assert_eq!(event.len(), 1);
        assert!(err.is_none());
    }

    #[test]
    fn test_inbound_message_change_event() {
        let message = InboundMessage::new(
            "bupa-messaging",
            "BO/BusinessPartner/Changed",
            r#"{"data":{"key":[{"businesspartner":"BP1"}]}}"#,
        );
        assert_eq!(ids(&message.change_event().unwrap()), vec!["BP1"]);
    }

    #[test]
    fn test_for_partners() {
        let event = ChangeEvent::for_partners(["BP1", "BP1", "BP2"]);
        assert_eq!(ids(&event), vec!["BP1", "BP2"]);
    }

    // ========================================================================
    // Property: parsing arbitrary text never panics, and every named partner
    // is a non-empty string.
    // ========================================================================

    mod prop_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(200))]

            #[test]
            fn prop_parse_or_empty_is_total(payload in ".*") {
                let (event, _) = ChangeEvent::parse_or_empty(&payload);
                prop_assert!(event.partners().iter().all(|p| !p.as_str().is_empty()));
            }

            #[test]
            fn prop_named_partners_round_out(partners in prop::collection::vec("[A-Z0-9]{1,10}", 0..8)) {
                let keys: Vec<Value> = partners
                    .iter()
                    .map(|p| serde_json::json!({ PARTNER_KEY_FIELD: p }))
                    .collect();
                let payload = serde_json::json!({ "data": { "key": keys } }).to_string();
                let event = ChangeEvent::parse(&payload).unwrap();
                prop_assert_eq!(event, ChangeEvent::for_partners(partners.iter().map(String::as_str)));
            }
        }
    }
}
