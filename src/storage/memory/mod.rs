//! In-memory item store.
//!
//! Holds items in a sorted map behind a `tokio::sync::RwLock`. Every write
//! evaluates its precondition and applies its mutation under the write lock,
//! so same-key races are decided purely by preconditions.
//!
//! Fault injection (`set_fail_on_write`, `fail_writes_to`, ...) lets tests
//! simulate transient infrastructure faults.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::interfaces::{
    Attributes, IndexDefinition, Item, ItemKey, KeyValueStore, Precondition, QueryPage,
    QueryRequest, Result, StoreError, UpdateOp,
};
use crate::storage::eval::{self, Position};

/// Injected failures, checked before any state is touched.
#[derive(Debug, Default)]
struct Faults {
    fail_reads: bool,
    fail_writes: bool,
    failing_keys: HashSet<ItemKey>,
    failing_next_writes: u32,
    failing_next_reads: u32,
}

/// In-memory implementation of KeyValueStore.
#[derive(Default)]
pub struct InMemoryStore {
    items: RwLock<BTreeMap<ItemKey, Attributes>>,
    indexes: Vec<IndexDefinition>,
    faults: RwLock<Faults>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_indexes(indexes: Vec<IndexDefinition>) -> Self {
        Self {
            indexes,
            ..Self::default()
        }
    }

    pub async fn set_fail_on_read(&self, fail: bool) {
        self.faults.write().await.fail_reads = fail;
    }

    pub async fn set_fail_on_write(&self, fail: bool) {
        self.faults.write().await.fail_writes = fail;
    }

    /// Make every write to `key` fail as unavailable until cleared.
    pub async fn fail_writes_to(&self, key: ItemKey) {
        self.faults.write().await.failing_keys.insert(key);
    }

    /// Fail the next `count` writes, whatever their key.
    pub async fn fail_next_writes(&self, count: u32) {
        self.faults.write().await.failing_next_writes = count;
    }

    /// Fail the next `count` reads (gets and queries).
    pub async fn fail_next_reads(&self, count: u32) {
        self.faults.write().await.failing_next_reads = count;
    }

    pub async fn clear_faults(&self) {
        *self.faults.write().await = Faults::default();
    }

    pub async fn item_count(&self) -> usize {
        self.items.read().await.len()
    }

    /// Read an item without fault injection, for assertions.
    pub async fn peek(&self, key: &ItemKey) -> Option<Item> {
        self.items
            .read()
            .await
            .get(key)
            .map(|attributes| Item::new(key.clone(), attributes.clone()))
    }

    async fn check_read(&self) -> Result<()> {
        let mut faults = self.faults.write().await;
        if faults.failing_next_reads > 0 {
            faults.failing_next_reads -= 1;
            return Err(StoreError::Unavailable(
                "injected transient read fault".to_string(),
            ));
        }
        if faults.fail_reads {
            return Err(StoreError::Unavailable("injected read fault".to_string()));
        }
        Ok(())
    }

    async fn check_write(&self, key: &ItemKey) -> Result<()> {
        let mut faults = self.faults.write().await;
        if faults.failing_next_writes > 0 {
            faults.failing_next_writes -= 1;
            return Err(StoreError::Unavailable(format!(
                "injected transient write fault on {}",
                key
            )));
        }
        if faults.fail_writes || faults.failing_keys.contains(key) {
            return Err(StoreError::Unavailable(format!(
                "injected write fault on {}",
                key
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &ItemKey) -> Result<Item> {
        self.check_read().await?;
        let items = self.items.read().await;
        items
            .get(key)
            .map(|attributes| Item::new(key.clone(), attributes.clone()))
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })
    }

    async fn put(
        &self,
        key: &ItemKey,
        attributes: Attributes,
        precondition: Option<&Precondition>,
    ) -> Result<Item> {
        eval::validate_key(key)?;
        self.check_write(key).await?;

        let mut items = self.items.write().await;
        let current = items.get(key).map(|a| Item::new(key.clone(), a.clone()));
        eval::check_precondition(key, current.as_ref(), precondition)?;

        items.insert(key.clone(), attributes.clone());
        debug!(%key, "put item");
        Ok(Item::new(key.clone(), attributes))
    }

    async fn update(
        &self,
        key: &ItemKey,
        ops: &[UpdateOp],
        precondition: Option<&Precondition>,
    ) -> Result<Item> {
        eval::validate_key(key)?;
        self.check_write(key).await?;

        let mut items = self.items.write().await;
        let Some(attributes) = items.get(key) else {
            return Err(StoreError::NotFound { key: key.clone() });
        };
        let current = Item::new(key.clone(), attributes.clone());
        eval::check_precondition(key, Some(&current), precondition)?;

        let updated = eval::apply_updates(&current.attributes, ops)?;
        items.insert(key.clone(), updated.clone());
        debug!(%key, ops = ops.len(), "updated item");
        Ok(Item::new(key.clone(), updated))
    }

    async fn delete(
        &self,
        key: &ItemKey,
        precondition: Option<&Precondition>,
    ) -> Result<Option<Item>> {
        eval::validate_key(key)?;
        self.check_write(key).await?;

        let mut items = self.items.write().await;
        let current = items.get(key).map(|a| Item::new(key.clone(), a.clone()));
        eval::check_precondition(key, current.as_ref(), precondition)?;

        items.remove(key);
        Ok(current)
    }

    async fn query(&self, request: &QueryRequest) -> Result<QueryPage> {
        eval::validate_query(request)?;
        let index = eval::resolve_index(&self.indexes, request)?;
        self.check_read().await?;

        let items = self.items.read().await;
        let candidates: Vec<(Position, Item)> = match index {
            None => {
                let start = ItemKey::new(
                    request.partition_key.clone(),
                    request.sort_key_prefix.clone(),
                );
                items
                    .range(start..)
                    .take_while(|(key, _)| {
                        key.partition_key == request.partition_key
                            && key.sort_key.starts_with(&request.sort_key_prefix)
                    })
                    .map(|(key, attributes)| {
                        (
                            Position::for_base(key),
                            Item::new(key.clone(), attributes.clone()),
                        )
                    })
                    .collect()
            }
            Some(index) => items
                .iter()
                .filter_map(|(key, attributes)| {
                    let (partition, sort) = index.project(attributes)?;
                    (partition == request.partition_key
                        && sort.starts_with(&request.sort_key_prefix))
                    .then(|| {
                        (
                            Position::for_index(&sort, key),
                            Item::new(key.clone(), attributes.clone()),
                        )
                    })
                })
                .collect(),
        };
        drop(items);

        let (items, next_continuation_token) = eval::paginate(candidates, request)?;
        Ok(QueryPage {
            items,
            next_continuation_token,
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests;
