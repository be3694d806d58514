//! Abstract interfaces for stashflow components.
//!
//! These traits and types define the contracts for:
//! - Item storage (single-table key-value store with sorted keys)
//! - Precondition expressions evaluated by storage backends

pub mod condition;
pub mod kv_store;

pub use condition::{
    and, field_equals, field_exists, field_greater_than, field_less_than, field_not_exists,
    item_exists, item_not_exists, Condition, ConflictReason, Precondition,
};
pub use kv_store::{
    Attributes, IndexDefinition, Item, ItemKey, KeyValueStore, QueryPage, QueryRequest, Result,
    StoreError, UpdateOp, DEFAULT_QUERY_LIMIT,
};
