//! Shared evaluation helpers for storage backends.
//!
//! Path mutation, update application, precondition checks and continuation
//! tokens live here so every backend applies identical semantics.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::interfaces::{
    Attributes, IndexDefinition, Item, ItemKey, Precondition, QueryRequest, Result, StoreError,
    UpdateOp,
};

/// Reject empty key components.
pub fn validate_key(key: &ItemKey) -> Result<()> {
    if key.partition_key.is_empty() || key.sort_key.is_empty() {
        return Err(StoreError::invalid(format!(
            "key components must be non-empty: {}",
            key
        )));
    }
    Ok(())
}

fn segments(path: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = path.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(StoreError::invalid(format!("malformed field path '{}'", path)));
    }
    Ok(parts)
}

/// Walk to the map holding the final segment, creating maps on the way.
fn parent_map<'a>(
    attributes: &'a mut Attributes,
    parts: &[&str],
    path: &str,
) -> Result<&'a mut Map<String, Value>> {
    let mut current = attributes;
    for part in &parts[..parts.len() - 1] {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match entry {
            Value::Object(map) => map,
            _ => {
                return Err(StoreError::invalid(format!(
                    "'{}' traverses non-map value at '{}'",
                    path, part
                )))
            }
        };
    }
    Ok(current)
}

pub fn set_path(attributes: &mut Attributes, path: &str, value: Value) -> Result<()> {
    let parts = segments(path)?;
    let parent = parent_map(attributes, &parts, path)?;
    parent.insert(parts[parts.len() - 1].to_string(), value);
    Ok(())
}

pub fn remove_path(attributes: &mut Attributes, path: &str) -> Result<()> {
    let parts = segments(path)?;
    let mut current = attributes;
    for part in &parts[..parts.len() - 1] {
        match current.get_mut(*part) {
            Some(Value::Object(map)) => current = map,
            _ => return Ok(()),
        }
    }
    current.remove(parts[parts.len() - 1]);
    Ok(())
}

/// ADD semantics: absent is zero, integer plus integer stays integer.
pub fn add_at_path(attributes: &mut Attributes, path: &str, delta: &Number) -> Result<()> {
    let parts = segments(path)?;
    let parent = parent_map(attributes, &parts, path)?;
    let field = parts[parts.len() - 1];
    let current = match parent.get(field) {
        None | Some(Value::Null) => Number::from(0),
        Some(Value::Number(n)) => n.clone(),
        Some(other) => {
            return Err(StoreError::invalid(format!(
                "ADD on non-numeric value at '{}': {}",
                path, other
            )))
        }
    };
    let sum = add_numbers(&current, delta)
        .ok_or_else(|| StoreError::invalid(format!("numeric overflow at '{}'", path)))?;
    parent.insert(field.to_string(), Value::Number(sum));
    Ok(())
}

fn add_numbers(a: &Number, b: &Number) -> Option<Number> {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x.checked_add(y).map(Number::from),
        _ => Number::from_f64(a.as_f64()? + b.as_f64()?),
    }
}

/// Apply all ops to a copy so a failing op leaves the item untouched.
pub fn apply_updates(attributes: &Attributes, ops: &[UpdateOp]) -> Result<Attributes> {
    let mut updated = attributes.clone();
    for op in ops {
        match op {
            UpdateOp::Set { path, value } => set_path(&mut updated, path, value.clone())?,
            UpdateOp::Add { path, delta } => add_at_path(&mut updated, path, delta)?,
            UpdateOp::Remove { path } => remove_path(&mut updated, path)?,
        }
    }
    Ok(updated)
}

/// Evaluate an optional precondition against the current item.
pub fn check_precondition(
    key: &ItemKey,
    current: Option<&Item>,
    precondition: Option<&Precondition>,
) -> Result<()> {
    if let Some(reason) = precondition.and_then(|p| p.first_failure(current)) {
        return Err(StoreError::PreconditionFailed {
            key: key.clone(),
            reason: reason.clone(),
        });
    }
    Ok(())
}

/// Ordering position of an item within a query.
///
/// Base-table queries order by sort key; index queries order by the index
/// sort value with the base key as tie-breaker.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "s")]
    pub sort: String,
    #[serde(rename = "p")]
    pub partition_key: String,
    #[serde(rename = "k")]
    pub sort_key: String,
}

impl Position {
    pub fn for_base(key: &ItemKey) -> Self {
        Self {
            sort: key.sort_key.clone(),
            partition_key: key.partition_key.clone(),
            sort_key: key.sort_key.clone(),
        }
    }

    pub fn for_index(index_sort: &str, key: &ItemKey) -> Self {
        Self {
            sort: index_sort.to_string(),
            partition_key: key.partition_key.clone(),
            sort_key: key.sort_key.clone(),
        }
    }
}

pub fn encode_token(position: &Position) -> Result<String> {
    let json = serde_json::to_vec(position)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

pub fn decode_token(token: &str) -> Result<Position> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|e| StoreError::invalid(format!("malformed continuation token: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| StoreError::invalid(format!("malformed continuation token: {}", e)))
}

/// Resolve the index a query targets, if any.
pub fn resolve_index<'a>(
    indexes: &'a [IndexDefinition],
    request: &QueryRequest,
) -> Result<Option<&'a IndexDefinition>> {
    match &request.index_name {
        None => Ok(None),
        Some(name) => indexes
            .iter()
            .find(|i| &i.name == name)
            .map(Some)
            .ok_or_else(|| StoreError::invalid(format!("unknown index '{}'", name))),
    }
}

pub fn validate_query(request: &QueryRequest) -> Result<()> {
    if request.partition_key.is_empty() {
        return Err(StoreError::invalid("query partition key must be non-empty"));
    }
    if request.limit == 0 {
        return Err(StoreError::invalid("query limit must be positive"));
    }
    Ok(())
}

/// Order positioned items, resume after the token, and cut one page.
pub fn paginate(
    mut candidates: Vec<(Position, Item)>,
    request: &QueryRequest,
) -> Result<(Vec<Item>, Option<String>)> {
    candidates.sort_by(|a, b| a.0.cmp(&b.0));
    if !request.scan_forward {
        candidates.reverse();
    }

    if let Some(token) = &request.continuation_token {
        let after = decode_token(token)?;
        candidates.retain(|(position, _)| {
            if request.scan_forward {
                *position > after
            } else {
                *position < after
            }
        });
    }

    let has_more = candidates.len() > request.limit;
    candidates.truncate(request.limit);

    let next = match (has_more, candidates.last()) {
        (true, Some((position, _))) => Some(encode_token(position)?),
        _ => None,
    };

    Ok((candidates.into_iter().map(|(_, item)| item).collect(), next))
}
