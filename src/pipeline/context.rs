//! Per-execution state threaded through pipeline steps.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::error::PipelineError;

/// Authenticated caller supplied by the request layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub subject_id: String,
    pub groups: Vec<String>,
}

impl Identity {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            groups: Vec::new(),
        }
    }

    pub fn with_groups(mut self, groups: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// Typed name for a stash slot.
///
/// ```
/// use stashflow::pipeline::StashKey;
///
/// const PARENT_AUTHOR: StashKey<String> = StashKey::new("parentAuthor");
/// assert_eq!(PARENT_AUTHOR.name(), "parentAuthor");
/// ```
pub struct StashKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StashKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for StashKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StashKey<T> {}

/// Key-value bag plus the result of the last executed operation.
///
/// Steps receive it by reference and hand back a new one from `reduce`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StashContext {
    values: BTreeMap<String, Value>,
    previous_result: Option<Value>,
}

impl StashContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn previous_result(&self) -> Option<&Value> {
        self.previous_result.as_ref()
    }

    pub fn set_previous_result(&mut self, value: Value) {
        self.previous_result = Some(value);
    }

    /// Decode a typed slot. Absent slots are `Ok(None)`.
    pub fn get_typed<T: DeserializeOwned>(
        &self,
        key: &StashKey<T>,
    ) -> Result<Option<T>, PipelineError> {
        self.values
            .get(key.name())
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| PipelineError::Stash {
                    key: key.name().to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    /// Like `get_typed`, but an absent slot is an error.
    pub fn require<T: DeserializeOwned>(&self, key: &StashKey<T>) -> Result<T, PipelineError> {
        self.get_typed(key)?.ok_or_else(|| PipelineError::Stash {
            key: key.name().to_string(),
            message: "missing".to_string(),
        })
    }

    pub fn set_typed<T: Serialize>(
        &mut self,
        key: &StashKey<T>,
        value: &T,
    ) -> Result<(), PipelineError> {
        let value = serde_json::to_value(value).map_err(|e| PipelineError::Stash {
            key: key.name().to_string(),
            message: e.to_string(),
        })?;
        self.values.insert(key.name().to_string(), value);
        Ok(())
    }
}

/// Everything a step can see while planning and reducing.
///
/// Created fresh for each execution and never persisted.
#[derive(Debug, Clone)]
pub struct PipelineExecutionContext {
    pub execution_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub identity: Identity,
    pub arguments: Value,
    pub stash: StashContext,
}

impl PipelineExecutionContext {
    pub fn new(identity: Identity, arguments: Value) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            started_at: Utc::now(),
            identity,
            arguments,
            stash: StashContext::new(),
        }
    }

    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }

    pub fn argument_str(&self, name: &str) -> Option<&str> {
        self.argument(name).and_then(Value::as_str)
    }

    /// String argument a step cannot plan without.
    pub fn require_str(&self, name: &str) -> Result<&str, PipelineError> {
        self.argument_str(name)
            .ok_or_else(|| PipelineError::invalid(format!("missing argument '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const DEPTH: StashKey<u32> = StashKey::new("depth");

    #[test]
    fn test_typed_slots() {
        let mut stash = StashContext::new();
        assert_eq!(stash.get_typed(&DEPTH).unwrap(), None);
        assert!(matches!(stash.require(&DEPTH), Err(PipelineError::Stash { .. })));

        stash.set_typed(&DEPTH, &3).unwrap();
        assert_eq!(stash.require(&DEPTH).unwrap(), 3);

        stash.set("depth", "deep");
        assert!(matches!(stash.get_typed(&DEPTH), Err(PipelineError::Stash { .. })));
    }

    #[test]
    fn test_fresh_context_has_empty_stash() {
        let identity = Identity::new("u1").with_groups(["editors"]);
        let ctx = PipelineExecutionContext::new(identity, json!({"storyId": "s1"}));

        assert!(ctx.identity.in_group("editors"));
        assert!(!ctx.identity.in_group("admins"));
        assert_eq!(ctx.require_str("storyId").unwrap(), "s1");
        assert!(ctx.require_str("chapterId").is_err());
        assert!(ctx.stash.previous_result().is_none());
        assert!(!ctx.stash.contains("storyId"));
    }
}
