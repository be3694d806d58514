//! Conditional writer.
//!
//! Executes a planned `StoreOperation` against the injected store and maps
//! backend errors onto the operation-level taxonomy the pipeline reasons
//! about: conflicts carry their reason tag, missing items and transient
//! faults are kept apart so step policies can decide.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::interfaces::{
    Attributes, ConflictReason, Item, ItemKey, KeyValueStore, Precondition, QueryPage,
    QueryRequest, StoreError, UpdateOp,
};

/// A single store operation planned by a pipeline step.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOperation {
    Get {
        key: ItemKey,
    },
    Put {
        key: ItemKey,
        attributes: Attributes,
        precondition: Option<Precondition>,
    },
    Update {
        key: ItemKey,
        ops: Vec<UpdateOp>,
        precondition: Option<Precondition>,
    },
    Delete {
        key: ItemKey,
        precondition: Option<Precondition>,
    },
    Query(QueryRequest),
}

impl StoreOperation {
    pub fn get(key: ItemKey) -> Self {
        Self::Get { key }
    }

    pub fn put(key: ItemKey, attributes: Attributes) -> Self {
        Self::Put {
            key,
            attributes,
            precondition: None,
        }
    }

    pub fn update(key: ItemKey, ops: Vec<UpdateOp>) -> Self {
        Self::Update {
            key,
            ops,
            precondition: None,
        }
    }

    pub fn delete(key: ItemKey) -> Self {
        Self::Delete {
            key,
            precondition: None,
        }
    }

    /// Attach a precondition. Reads ignore it.
    pub fn when(mut self, condition: Precondition) -> Self {
        match &mut self {
            Self::Put { precondition, .. }
            | Self::Update { precondition, .. }
            | Self::Delete { precondition, .. } => *precondition = Some(condition),
            Self::Get { .. } | Self::Query(_) => {}
        }
        self
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::Put { .. } => "put",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Query(_) => "query",
        }
    }

    /// Reads can be re-issued without changing the store.
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Get { .. } | Self::Query(_))
    }
}

/// Successful result of a `StoreOperation`.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutput {
    Item(Item),
    Deleted(Option<Item>),
    Page(QueryPage),
}

impl StoreOutput {
    pub fn item(&self) -> Option<&Item> {
        match self {
            Self::Item(item) => Some(item),
            Self::Deleted(item) => item.as_ref(),
            Self::Page(_) => None,
        }
    }

    pub fn into_item(self) -> Option<Item> {
        match self {
            Self::Item(item) => Some(item),
            Self::Deleted(item) => item,
            Self::Page(_) => None,
        }
    }

    /// JSON rendering used as a step's previous result.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Item(item) => item.to_value(),
            Self::Deleted(item) => item.as_ref().map(Item::to_value).unwrap_or(Value::Null),
            Self::Page(page) => {
                let items = page.items.iter().map(Item::to_value).collect();
                serde_json::json!({
                    "items": Value::Array(items),
                    "nextContinuationToken": page.next_continuation_token,
                })
            }
        }
    }
}

/// A conditional write was denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("Conflict on {key}: {reason}")]
pub struct ConflictError {
    pub reason: ConflictReason,
    pub key: ItemKey,
}

/// Failure of a single store operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OperationError {
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("Not found: {0}")]
    NotFound(ItemKey),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid operation: {0}")]
    Invalid(String),
}

impl OperationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub fn conflict_reason(&self) -> Option<&ConflictReason> {
        match self {
            Self::Conflict(conflict) => Some(&conflict.reason),
            _ => None,
        }
    }
}

impl From<StoreError> for OperationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { key } => Self::NotFound(key),
            StoreError::PreconditionFailed { key, reason } => {
                Self::Conflict(ConflictError { reason, key })
            }
            StoreError::InvalidOperation(message) => Self::Invalid(message),
            StoreError::Serialization(e) => Self::Invalid(e.to_string()),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// Executes store operations with their preconditions.
#[derive(Clone)]
pub struct ConditionalWriter {
    store: Arc<dyn KeyValueStore>,
}

impl ConditionalWriter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Run one operation to completion.
    pub async fn execute(&self, operation: &StoreOperation) -> Result<StoreOutput, OperationError> {
        let result = match operation {
            StoreOperation::Get { key } => self.store.get(key).await.map(StoreOutput::Item),
            StoreOperation::Put {
                key,
                attributes,
                precondition,
            } => self
                .store
                .put(key, attributes.clone(), precondition.as_ref())
                .await
                .map(StoreOutput::Item),
            StoreOperation::Update {
                key,
                ops,
                precondition,
            } => self
                .store
                .update(key, ops, precondition.as_ref())
                .await
                .map(StoreOutput::Item),
            StoreOperation::Delete { key, precondition } => self
                .store
                .delete(key, precondition.as_ref())
                .await
                .map(StoreOutput::Deleted),
            StoreOperation::Query(request) => self.store.query(request).await.map(StoreOutput::Page),
        };

        if let Err(ref e) = result {
            debug!(
                store = self.store.name(),
                operation = operation.kind(),
                error = %e,
                "Store operation failed"
            );
        }

        result.map_err(OperationError::from)
    }

    pub async fn get(&self, key: &ItemKey) -> Result<Item, OperationError> {
        Ok(self.store.get(key).await?)
    }

    pub async fn put(
        &self,
        key: &ItemKey,
        attributes: Attributes,
        precondition: Option<&Precondition>,
    ) -> Result<Item, OperationError> {
        Ok(self.store.put(key, attributes, precondition).await?)
    }

    pub async fn update(
        &self,
        key: &ItemKey,
        ops: &[UpdateOp],
        precondition: Option<&Precondition>,
    ) -> Result<Item, OperationError> {
        Ok(self.store.update(key, ops, precondition).await?)
    }

    pub async fn query(&self, request: &QueryRequest) -> Result<QueryPage, OperationError> {
        Ok(self.store.query(request).await?)
    }
}

#[cfg(test)]
mod tests;
