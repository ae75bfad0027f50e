//! Scoped query values shared by the remote attempt and the local fallback.
//!
//! A [`ScopedQuery`] is built once per request and passed by value. The
//! fallback path only swaps the [`EntitySet`] via [`ScopedQuery::retarget`],
//! so the predicate, projection, ordering and paging of both attempts are
//! identical by construction.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::row::Row;

// ============================================================================
// ENTITY SETS
// ============================================================================

/// Identifier of a queryable entity set (remote or local).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntitySet(String);

impl EntitySet {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// PREDICATES
// ============================================================================

/// Filter operator for field comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
    /// Greater than
    Gt,
    /// Less than
    Lt,
    /// Greater than or equal
    Gte,
    /// Less than or equal
    Lte,
    /// Contains substring (for strings)
    Contains,
    /// In list of values
    In,
}

/// Predicate tree over row fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Predicate {
    /// Compare a single field against a value.
    Compare {
        field: String,
        operator: FilterOperator,
        value: Value,
    },
    /// All children must match. An empty list matches everything.
    And(Vec<Predicate>),
    /// Any child must match. An empty list matches nothing.
    Or(Vec<Predicate>),
    /// Negation.
    Not(Box<Predicate>),
}

impl Predicate {
    /// Create a comparison.
    pub fn compare(field: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Create an equality comparison.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, FilterOperator::Eq, value)
    }

    /// Logical AND of `self` and `other`.
    ///
    /// Nested conjunctions are flattened so `a.and(b).and(c)` is a single
    /// three-way `And`.
    pub fn and(self, other: Predicate) -> Self {
        let mut terms = match self {
            Self::And(terms) => terms,
            single => vec![single],
        };
        match other {
            Self::And(more) => terms.extend(more),
            single => terms.push(single),
        }
        Self::And(terms)
    }

    /// Logical OR of `self` and `other`.
    pub fn or(self, other: Predicate) -> Self {
        let mut terms = match self {
            Self::Or(terms) => terms,
            single => vec![single],
        };
        match other {
            Self::Or(more) => terms.extend(more),
            single => terms.push(single),
        }
        Self::Or(terms)
    }

    /// Logical negation.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Evaluate the predicate against a row.
    ///
    /// A missing field compares as JSON `null`.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Self::Compare {
                field,
                operator,
                value,
            } => {
                let actual = row.get(field).unwrap_or(&Value::Null);
                compare_field(actual, *operator, value)
            }
            Self::And(terms) => terms.iter().all(|t| t.matches(row)),
            Self::Or(terms) => terms.iter().any(|t| t.matches(row)),
            Self::Not(inner) => !inner.matches(row),
        }
    }
}

fn compare_field(actual: &Value, operator: FilterOperator, expected: &Value) -> bool {
    match operator {
        FilterOperator::Eq => actual == expected,
        FilterOperator::Ne => actual != expected,
        FilterOperator::Gt => compare_values(actual, expected) == Some(Ordering::Greater),
        FilterOperator::Lt => compare_values(actual, expected) == Some(Ordering::Less),
        FilterOperator::Gte => matches!(
            compare_values(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOperator::Lte => matches!(
            compare_values(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOperator::Contains => match (actual, expected) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            _ => false,
        },
        FilterOperator::In => match expected {
            Value::Array(candidates) => candidates.contains(actual),
            _ => false,
        },
    }
}

/// Order two JSON scalars of the same kind. Mixed kinds are unordered.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

// ============================================================================
// PROJECTION AND ORDERING
// ============================================================================

/// Column projection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Columns {
    /// Every field of the row.
    #[default]
    All,
    /// Only the listed fields, in row order.
    Only(Vec<String>),
}

impl Columns {
    pub fn only<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(fields.into_iter().map(Into::into).collect())
    }

    /// Project a row. Listed fields missing from the row are skipped.
    pub fn project(&self, row: Row) -> Row {
        match self {
            Self::All => row,
            Self::Only(fields) => row
                .into_iter()
                .filter(|(k, _)| fields.iter().any(|f| f == k))
                .collect(),
        }
    }
}

/// Sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

// ============================================================================
// SCOPED QUERY
// ============================================================================

/// Immutable (entity set, predicate, projection, ordering, paging) value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopedQuery {
    entity_set: EntitySet,
    #[serde(default)]
    predicate: Option<Predicate>,
    #[serde(default)]
    columns: Columns,
    #[serde(default)]
    order_by: Vec<OrderBy>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: usize,
}

impl ScopedQuery {
    /// Select every row of an entity set.
    pub fn select(entity_set: EntitySet) -> Self {
        Self {
            entity_set,
            predicate: None,
            columns: Columns::All,
            order_by: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    /// Replace the predicate.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// AND a predicate onto the existing one (or set it if there is none).
    pub fn and_filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Replace the column projection.
    pub fn columns(mut self, columns: Columns) -> Self {
        self.columns = columns;
        self
    }

    /// Append a sort key.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Page the result: skip `offset` rows, then take at most `limit`.
    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    /// The same query against another entity set.
    pub fn retarget(&self, entity_set: EntitySet) -> Self {
        Self {
            entity_set,
            ..self.clone()
        }
    }

    /// Whether two queries differ at most in their entity set.
    pub fn is_equivalent_to(&self, other: &ScopedQuery) -> bool {
        self.predicate == other.predicate
            && self.columns == other.columns
            && self.order_by == other.order_by
            && self.limit == other.limit
            && self.offset == other.offset
    }

    pub fn entity_set(&self) -> &EntitySet {
        &self.entity_set
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    pub fn projection(&self) -> &Columns {
        &self.columns
    }

    /// Whether a row passes the predicate.
    pub fn matches(&self, row: &Row) -> bool {
        self.predicate.as_ref().map_or(true, |p| p.matches(row))
    }

    /// Run the query over an in-memory row set.
    ///
    /// Filters, sorts, pages, and only then projects, so sort keys need not
    /// be part of the projection.
    pub fn evaluate<I>(&self, rows: I) -> Vec<Row>
    where
        I: IntoIterator<Item = Row>,
    {
        let mut selected: Vec<Row> = rows.into_iter().filter(|r| self.matches(r)).collect();

        if !self.order_by.is_empty() {
            selected.sort_by(|a, b| {
                for key in &self.order_by {
                    let left = a.get(&key.field).unwrap_or(&Value::Null);
                    let right = b.get(&key.field).unwrap_or(&Value::Null);
                    let ord = sort_order(left, right);
                    let ord = if key.descending { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        selected
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .map(|r| self.columns.project(r))
            .collect()
    }
}

/// Total order for sorting: nulls first, then same-kind comparison.
fn sort_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}
