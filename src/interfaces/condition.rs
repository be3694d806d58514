//! Precondition expressions for conditional writes.
//!
//! A `Condition` is evaluated against the current state of a single item
//! (or its absence). A `Precondition` pairs ordered conditions with stable
//! `ConflictReason` tags so callers can tell denials apart without
//! matching on message text.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::kv_store::Item;

/// Boolean expression over one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    ItemExists,
    ItemNotExists,
    FieldExists { path: String },
    FieldNotExists { path: String },
    FieldEquals { path: String, value: Value },
    FieldGreaterThan { path: String, value: Value },
    FieldLessThan { path: String, value: Value },
    And(Vec<Condition>),
}

pub fn item_exists() -> Condition {
    Condition::ItemExists
}

pub fn item_not_exists() -> Condition {
    Condition::ItemNotExists
}

pub fn field_exists(path: impl Into<String>) -> Condition {
    Condition::FieldExists { path: path.into() }
}

pub fn field_not_exists(path: impl Into<String>) -> Condition {
    Condition::FieldNotExists { path: path.into() }
}

pub fn field_equals(path: impl Into<String>, value: impl Into<Value>) -> Condition {
    Condition::FieldEquals {
        path: path.into(),
        value: value.into(),
    }
}

pub fn field_greater_than(path: impl Into<String>, value: impl Into<Value>) -> Condition {
    Condition::FieldGreaterThan {
        path: path.into(),
        value: value.into(),
    }
}

pub fn field_less_than(path: impl Into<String>, value: impl Into<Value>) -> Condition {
    Condition::FieldLessThan {
        path: path.into(),
        value: value.into(),
    }
}

pub fn and(left: Condition, right: Condition) -> Condition {
    left.and(right)
}

impl Condition {
    /// Conjunction, flattening nested `And`s.
    pub fn and(self, other: Condition) -> Condition {
        Self::all([self, other])
    }

    pub fn all(conditions: impl IntoIterator<Item = Condition>) -> Condition {
        let mut flat = Vec::new();
        for condition in conditions {
            match condition {
                Condition::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        Condition::And(flat)
    }

    /// Evaluate against the current item, `None` when it does not exist.
    ///
    /// Field comparisons on an absent item or field are false.
    pub fn evaluate(&self, item: Option<&Item>) -> bool {
        match self {
            Condition::ItemExists => item.is_some(),
            Condition::ItemNotExists => item.is_none(),
            Condition::FieldExists { path } => item.and_then(|i| i.get(path)).is_some(),
            Condition::FieldNotExists { path } => item.and_then(|i| i.get(path)).is_none(),
            Condition::FieldEquals { path, value } => {
                compare(item, path, value) == Some(Ordering::Equal)
            }
            Condition::FieldGreaterThan { path, value } => {
                compare(item, path, value) == Some(Ordering::Greater)
            }
            Condition::FieldLessThan { path, value } => {
                compare(item, path, value) == Some(Ordering::Less)
            }
            Condition::And(conditions) => conditions.iter().all(|c| c.evaluate(item)),
        }
    }
}

/// Order the stored field against `expected`. Mismatched types are unordered.
fn compare(item: Option<&Item>, path: &str, expected: &Value) -> Option<Ordering> {
    let actual = item?.get(path)?;
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (a, b) if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

/// Stable tag naming why a conditional write was denied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictReason(Cow<'static, str>);

impl ConflictReason {
    pub const DUPLICATE_VOTE: ConflictReason = ConflictReason(Cow::Borrowed("duplicate_vote"));
    pub const EDIT_WINDOW_EXPIRED: ConflictReason =
        ConflictReason(Cow::Borrowed("edit_window_expired"));
    pub const NOT_AUTHOR: ConflictReason = ConflictReason(Cow::Borrowed("not_author"));
    pub const ALREADY_EXISTS: ConflictReason = ConflictReason(Cow::Borrowed("already_exists"));
    pub const STALE_VERSION: ConflictReason = ConflictReason(Cow::Borrowed("stale_version"));
    /// Used when a precondition is given without naming a reason.
    pub const PRECONDITION_FAILED: ConflictReason =
        ConflictReason(Cow::Borrowed("precondition_failed"));

    pub fn new(reason: impl Into<Cow<'static, str>>) -> Self {
        Self(reason.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered, tagged clauses that must all hold for a write to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Precondition {
    clauses: Vec<(Condition, ConflictReason)>,
}

impl Precondition {
    pub fn new(condition: Condition, reason: ConflictReason) -> Self {
        Self {
            clauses: vec![(condition, reason)],
        }
    }

    /// Append a clause, checked after the existing ones.
    pub fn and(mut self, condition: Condition, reason: ConflictReason) -> Self {
        self.clauses.push((condition, reason));
        self
    }

    pub fn clauses(&self) -> &[(Condition, ConflictReason)] {
        &self.clauses
    }

    /// Reason of the first clause that does not hold, if any.
    pub fn first_failure(&self, item: Option<&Item>) -> Option<&ConflictReason> {
        self.clauses
            .iter()
            .find(|(condition, _)| !condition.evaluate(item))
            .map(|(_, reason)| reason)
    }
}

impl From<Condition> for Precondition {
    fn from(condition: Condition) -> Self {
        Self::new(condition, ConflictReason::PRECONDITION_FAILED)
    }
}
