//! Key-value store interface.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use super::condition::{ConflictReason, Precondition};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Open attribute map carried by every item.
pub type Attributes = Map<String, Value>;

/// Page size used when a query does not ask for one.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Item not found: {key}")]
    NotFound { key: ItemKey },

    #[error("Precondition failed on {key}: {reason}")]
    PreconditionFailed { key: ItemKey, reason: ConflictReason },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    /// Infrastructure faults a caller may retry as a whole operation.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            #[cfg(feature = "sqlite")]
            Self::Database(_) => true,
            _ => false,
        }
    }
}

/// Composite primary key of an item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub partition_key: String,
    pub sort_key: String,
}

impl ItemKey {
    pub fn new(partition_key: impl Into<String>, sort_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key: sort_key.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition_key, self.sort_key)
    }
}

/// A stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub key: ItemKey,
    pub attributes: Attributes,
}

impl Item {
    pub fn new(key: ItemKey, attributes: Attributes) -> Self {
        Self { key, attributes }
    }

    /// Look up a dot-separated field path (`stats.replyCount`).
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.attributes, path)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(Value::as_i64)
    }

    /// JSON view of the item with its key under `PK` / `SK`.
    pub fn to_value(&self) -> Value {
        let mut object = self.attributes.clone();
        object.insert(
            "PK".to_string(),
            Value::String(self.key.partition_key.clone()),
        );
        object.insert("SK".to_string(), Value::String(self.key.sort_key.clone()));
        Value::Object(object)
    }
}

/// Walk a dot-separated path through nested maps.
pub(crate) fn lookup<'a>(attributes: &'a Attributes, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = attributes.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// One mutation inside an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "UPPERCASE")]
pub enum UpdateOp {
    /// Overwrite the value at `path`, creating intermediate maps.
    Set { path: String, value: Value },
    /// Add `delta` to the number at `path`; an absent value counts as zero.
    Add { path: String, delta: Number },
    /// Remove the value at `path` if present.
    Remove { path: String },
}

impl UpdateOp {
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Set {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn add(path: impl Into<String>, delta: impl Into<Number>) -> Self {
        Self::Add {
            path: path.into(),
            delta: delta.into(),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self::Remove { path: path.into() }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Set { path, .. } | Self::Add { path, .. } | Self::Remove { path } => path,
        }
    }
}

/// Secondary index declaration.
///
/// An item is projected into the index when it carries both attributes as
/// strings. Backends keep projections consistent on every write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub partition_attribute: String,
    pub sort_attribute: String,
}

impl IndexDefinition {
    pub fn new(
        name: impl Into<String>,
        partition_attribute: impl Into<String>,
        sort_attribute: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            partition_attribute: partition_attribute.into(),
            sort_attribute: sort_attribute.into(),
        }
    }

    /// Index key of an item, if it participates in this index.
    pub fn project(&self, attributes: &Attributes) -> Option<(String, String)> {
        let partition = attributes.get(&self.partition_attribute)?.as_str()?;
        let sort = attributes.get(&self.sort_attribute)?.as_str()?;
        Some((partition.to_string(), sort.to_string()))
    }
}

/// Range query over one partition, on the base table or an index.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub partition_key: String,
    pub sort_key_prefix: String,
    pub index_name: Option<String>,
    pub scan_forward: bool,
    pub limit: usize,
    pub continuation_token: Option<String>,
}

impl QueryRequest {
    pub fn partition(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key_prefix: String::new(),
            index_name: None,
            scan_forward: true,
            limit: DEFAULT_QUERY_LIMIT,
            continuation_token: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sort_key_prefix = prefix.into();
        self
    }

    pub fn on_index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    pub fn descending(mut self) -> Self {
        self.scan_forward = false;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn after(mut self, token: Option<String>) -> Self {
        self.continuation_token = token;
        self
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    pub items: Vec<Item>,
    pub next_continuation_token: Option<String>,
}

/// Interface for single-table item persistence.
///
/// Implementations:
/// - `InMemoryStore`: process-local store with fault injection
/// - `SqliteItemStore`: embedded SQLite storage
///
/// Every write is atomic per item: the precondition is evaluated and the
/// mutation applied without another writer observing the item in between.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch an item. Missing items are `StoreError::NotFound`.
    async fn get(&self, key: &ItemKey) -> Result<Item>;

    /// Create or replace an item.
    ///
    /// The precondition is evaluated against the current item; an absent
    /// item satisfies only existence-negative clauses.
    async fn put(
        &self,
        key: &ItemKey,
        attributes: Attributes,
        precondition: Option<&Precondition>,
    ) -> Result<Item>;

    /// Apply update operations to an existing item and return the result.
    ///
    /// A missing item is `NotFound` regardless of the precondition.
    async fn update(
        &self,
        key: &ItemKey,
        ops: &[UpdateOp],
        precondition: Option<&Precondition>,
    ) -> Result<Item>;

    /// Delete an item, returning what was removed.
    async fn delete(
        &self,
        key: &ItemKey,
        precondition: Option<&Precondition>,
    ) -> Result<Option<Item>>;

    /// Query one partition by sort-key prefix. No matches is an empty page.
    async fn query(&self, request: &QueryRequest) -> Result<QueryPage>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}
