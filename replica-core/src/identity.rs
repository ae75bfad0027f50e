//! Caller identity and scoping.

use std::collections::HashMap;
use std::fmt;

use crate::error::{ReplicaError, ReplicaResult};

/// Caller attribute carrying the associated business partner.
pub const BUSINESS_PARTNER_ATTRIBUTE: &str = "businessPartner";

/// Identifier of a remote business partner; the scoping key of every query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusinessPartnerId(String);

impl BusinessPartnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BusinessPartnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BusinessPartnerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Authenticated caller as seen by the replication handlers.
///
/// Attributes are multi-valued, the way identity providers deliver them.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    user: Option<String>,
    attributes: HashMap<String, Vec<String>>,
}

impl CallerContext {
    /// An anonymous caller with no attributes.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A named caller.
    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            attributes: HashMap::new(),
        }
    }

    /// Add an attribute value.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Shorthand for a caller associated with one business partner.
    pub fn with_business_partner(self, partner: impl Into<String>) -> Self {
        self.with_attribute(BUSINESS_PARTNER_ATTRIBUTE, partner)
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// All values of an attribute.
    pub fn attribute_values(&self, name: &str) -> &[String] {
        self.attributes.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve the caller's scoping partner: the first `businessPartner` value.
    ///
    /// # Errors
    ///
    /// [`ReplicaError::Unauthorized`] when the attribute is absent. It is
    /// never defaulted.
    pub fn business_partner(&self) -> ReplicaResult<BusinessPartnerId> {
        self.attribute_values(BUSINESS_PARTNER_ATTRIBUTE)
            .first()
            .map(|bp| BusinessPartnerId::new(bp.clone()))
            .ok_or_else(|| ReplicaError::Unauthorized {
                attribute: BUSINESS_PARTNER_ATTRIBUTE.to_string(),
            })
    }
}
