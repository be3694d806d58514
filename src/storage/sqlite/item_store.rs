//! SQLite KeyValueStore implementation.
//!
//! Attributes are stored as JSON text. Writes run inside `BEGIN IMMEDIATE`
//! transactions: the current row is read, the precondition evaluated and the
//! new row plus its index projections written before `COMMIT`, so concurrent
//! writers to one key are serialized by SQLite's write lock.

use async_trait::async_trait;
use sea_query::{Expr, OnConflict, Order, Query, SelectStatement, SqliteQueryBuilder, Value};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::interfaces::{
    Attributes, IndexDefinition, Item, ItemKey, KeyValueStore, Precondition, QueryPage,
    QueryRequest, Result, StoreError, UpdateOp,
};
use crate::storage::eval::{self, Position};
use crate::storage::schema::{IndexEntries, Items, CREATE_ITEMS_TABLES};

/// SQLite implementation of KeyValueStore.
pub struct SqliteItemStore {
    pool: SqlitePool,
    indexes: Vec<IndexDefinition>,
}

impl SqliteItemStore {
    /// Create a new SQLite item store.
    pub fn new(pool: SqlitePool, indexes: Vec<IndexDefinition>) -> Self {
        Self { pool, indexes }
    }

    /// Create tables if they do not exist.
    pub async fn init(&self) -> Result<()> {
        sqlx::raw_sql(CREATE_ITEMS_TABLES).execute(&self.pool).await?;
        Ok(())
    }

    async fn load(conn: &mut SqliteConnection, key: &ItemKey) -> Result<Option<Item>> {
        let query = Query::select()
            .column(Items::Attributes)
            .from(Items::Table)
            .and_where(Expr::col(Items::Pk).eq(key.partition_key.as_str()))
            .and_where(Expr::col(Items::Sk).eq(key.sort_key.as_str()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
        match row {
            Some(row) => {
                let json: String = row.try_get(0)?;
                let attributes: Attributes = serde_json::from_str(&json)?;
                Ok(Some(Item::new(key.clone(), attributes)))
            }
            None => Ok(None),
        }
    }

    /// Upsert the base row and rewrite its index projections.
    async fn store(&self, conn: &mut SqliteConnection, item: &Item) -> Result<()> {
        let json = serde_json::to_string(&item.attributes)?;
        let updated_at = chrono::Utc::now().to_rfc3339();

        let upsert = Query::insert()
            .into_table(Items::Table)
            .columns([Items::Pk, Items::Sk, Items::Attributes, Items::UpdatedAt])
            .values_panic([
                item.key.partition_key.as_str().into(),
                item.key.sort_key.as_str().into(),
                json.into(),
                updated_at.into(),
            ])
            .on_conflict(
                OnConflict::columns([Items::Pk, Items::Sk])
                    .update_columns([Items::Attributes, Items::UpdatedAt])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);
        sqlx::query(&upsert).execute(&mut *conn).await?;

        Self::remove_projections(conn, &item.key).await?;
        for index in &self.indexes {
            let Some((ipk, isk)) = index.project(&item.attributes) else {
                continue;
            };
            let insert = Query::insert()
                .into_table(IndexEntries::Table)
                .columns([
                    IndexEntries::IndexName,
                    IndexEntries::Ipk,
                    IndexEntries::Isk,
                    IndexEntries::Pk,
                    IndexEntries::Sk,
                ])
                .values_panic([
                    index.name.as_str().into(),
                    ipk.into(),
                    isk.into(),
                    item.key.partition_key.as_str().into(),
                    item.key.sort_key.as_str().into(),
                ])
                .to_string(SqliteQueryBuilder);
            sqlx::query(&insert).execute(&mut *conn).await?;
        }
        Ok(())
    }

    async fn remove_projections(conn: &mut SqliteConnection, key: &ItemKey) -> Result<()> {
        let delete = Query::delete()
            .from_table(IndexEntries::Table)
            .and_where(Expr::col(IndexEntries::Pk).eq(key.partition_key.as_str()))
            .and_where(Expr::col(IndexEntries::Sk).eq(key.sort_key.as_str()))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&delete).execute(&mut *conn).await?;
        Ok(())
    }

    async fn put_in_tx(
        &self,
        conn: &mut SqliteConnection,
        key: &ItemKey,
        attributes: Attributes,
        precondition: Option<&Precondition>,
    ) -> Result<Item> {
        let current = Self::load(conn, key).await?;
        eval::check_precondition(key, current.as_ref(), precondition)?;

        let item = Item::new(key.clone(), attributes);
        self.store(conn, &item).await?;
        Ok(item)
    }

    async fn update_in_tx(
        &self,
        conn: &mut SqliteConnection,
        key: &ItemKey,
        ops: &[UpdateOp],
        precondition: Option<&Precondition>,
    ) -> Result<Item> {
        let current = Self::load(conn, key)
            .await?
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;
        eval::check_precondition(key, Some(&current), precondition)?;

        let item = Item::new(key.clone(), eval::apply_updates(&current.attributes, ops)?);
        self.store(conn, &item).await?;
        Ok(item)
    }

    async fn delete_in_tx(
        conn: &mut SqliteConnection,
        key: &ItemKey,
        precondition: Option<&Precondition>,
    ) -> Result<Option<Item>> {
        let current = Self::load(conn, key).await?;
        eval::check_precondition(key, current.as_ref(), precondition)?;

        let delete = Query::delete()
            .from_table(Items::Table)
            .and_where(Expr::col(Items::Pk).eq(key.partition_key.as_str()))
            .and_where(Expr::col(Items::Sk).eq(key.sort_key.as_str()))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&delete).execute(&mut *conn).await?;
        Self::remove_projections(conn, key).await?;
        Ok(current)
    }

    /// Commit on success, roll back on any error.
    async fn finish<T>(conn: &mut SqliteConnection, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => match sqlx::query("COMMIT").execute(&mut *conn).await {
                Ok(_) => Ok(value),
                Err(e) => {
                    // A failed COMMIT leaves the transaction open on a pooled connection.
                    let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                    Err(e.into())
                }
            },
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    /// Restrict `select` to rows after the continuation position.
    fn resume_after(
        select: &mut SelectStatement,
        request: &QueryRequest,
        after: &Position,
        indexed: bool,
    ) {
        let op = if request.scan_forward { ">" } else { "<" };
        if indexed {
            select.and_where(Expr::cust_with_values(
                format!("(index_entries.isk, index_entries.pk, index_entries.sk) {op} (?, ?, ?)"),
                [
                    Value::from(after.sort.clone()),
                    Value::from(after.partition_key.clone()),
                    Value::from(after.sort_key.clone()),
                ],
            ));
        } else {
            select.and_where(Expr::cust_with_values(
                format!("items.sk {op} ?"),
                [Value::from(after.sort.clone())],
            ));
        }
    }

    fn prefix_filter(column: &str, prefix: &str) -> sea_query::SimpleExpr {
        Expr::cust_with_values(
            format!("substr({column}, 1, ?) = ?"),
            [
                Value::from(prefix.chars().count() as i64),
                Value::from(prefix.to_string()),
            ],
        )
    }
}

#[async_trait]
impl KeyValueStore for SqliteItemStore {
    async fn get(&self, key: &ItemKey) -> Result<Item> {
        let mut conn = self.pool.acquire().await?;
        Self::load(&mut conn, key)
            .await?
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })
    }

    async fn put(
        &self,
        key: &ItemKey,
        attributes: Attributes,
        precondition: Option<&Precondition>,
    ) -> Result<Item> {
        eval::validate_key(key)?;

        // BEGIN IMMEDIATE acquires the write lock upfront so the precondition
        // check and the write cannot interleave with another writer.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        let result = self.put_in_tx(&mut conn, key, attributes, precondition).await;
        let item = Self::finish(&mut conn, result).await?;
        debug!(%key, "put item");
        Ok(item)
    }

    async fn update(
        &self,
        key: &ItemKey,
        ops: &[UpdateOp],
        precondition: Option<&Precondition>,
    ) -> Result<Item> {
        eval::validate_key(key)?;

        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        let result = self.update_in_tx(&mut conn, key, ops, precondition).await;
        let item = Self::finish(&mut conn, result).await?;
        debug!(%key, ops = ops.len(), "updated item");
        Ok(item)
    }

    async fn delete(
        &self,
        key: &ItemKey,
        precondition: Option<&Precondition>,
    ) -> Result<Option<Item>> {
        eval::validate_key(key)?;

        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        let result = Self::delete_in_tx(&mut conn, key, precondition).await;
        Self::finish(&mut conn, result).await
    }

    async fn query(&self, request: &QueryRequest) -> Result<QueryPage> {
        eval::validate_query(request)?;
        let index = eval::resolve_index(&self.indexes, request)?;
        let after = request
            .continuation_token
            .as_deref()
            .map(eval::decode_token)
            .transpose()?;
        let order = if request.scan_forward {
            Order::Asc
        } else {
            Order::Desc
        };

        // SelectStatement is not Send; render it before the first await.
        let sql = {
            let mut select = Query::select();
            match index {
                None => {
                    select
                        .column((Items::Table, Items::Pk))
                        .column((Items::Table, Items::Sk))
                        .column((Items::Table, Items::Attributes))
                        .from(Items::Table)
                        .and_where(
                            Expr::col((Items::Table, Items::Pk)).eq(request.partition_key.as_str()),
                        )
                        .and_where(Self::prefix_filter("items.sk", &request.sort_key_prefix))
                        .order_by((Items::Table, Items::Sk), order);
                }
                Some(index) => {
                    select
                        .column((Items::Table, Items::Pk))
                        .column((Items::Table, Items::Sk))
                        .column((Items::Table, Items::Attributes))
                        .column((IndexEntries::Table, IndexEntries::Isk))
                        .from(IndexEntries::Table)
                        .inner_join(
                            Items::Table,
                            Expr::col((Items::Table, Items::Pk))
                                .equals((IndexEntries::Table, IndexEntries::Pk))
                                .and(
                                    Expr::col((Items::Table, Items::Sk))
                                        .equals((IndexEntries::Table, IndexEntries::Sk)),
                                ),
                        )
                        .and_where(
                            Expr::col((IndexEntries::Table, IndexEntries::IndexName))
                                .eq(index.name.as_str()),
                        )
                        .and_where(
                            Expr::col((IndexEntries::Table, IndexEntries::Ipk))
                                .eq(request.partition_key.as_str()),
                        )
                        .and_where(Self::prefix_filter(
                            "index_entries.isk",
                            &request.sort_key_prefix,
                        ))
                        .order_by((IndexEntries::Table, IndexEntries::Isk), order.clone())
                        .order_by((IndexEntries::Table, IndexEntries::Pk), order.clone())
                        .order_by((IndexEntries::Table, IndexEntries::Sk), order);
                }
            }
            if let Some(after) = &after {
                Self::resume_after(&mut select, request, after, index.is_some());
            }
            // One extra row tells whether another page exists. SQLite limits are i64.
            let limit = (request.limit as u64).saturating_add(1).min(i64::MAX as u64);
            select.limit(limit);
            select.to_string(SqliteQueryBuilder)
        };
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let has_more = rows.len() > request.limit;
        let mut items = Vec::with_capacity(rows.len().min(request.limit));
        let mut last = None;
        for row in rows.into_iter().take(request.limit) {
            let key = ItemKey::new(row.try_get::<String, _>(0)?, row.try_get::<String, _>(1)?);
            let json: String = row.try_get(2)?;
            let position = match index {
                Some(_) => Position::for_index(&row.try_get::<String, _>(3)?, &key),
                None => Position::for_base(&key),
            };
            items.push(Item::new(key, serde_json::from_str(&json)?));
            last = Some(position);
        }

        let next_continuation_token = match (has_more, last) {
            (true, Some(position)) => Some(eval::encode_token(&position)?),
            _ => None,
        };
        Ok(QueryPage {
            items,
            next_continuation_token,
        })
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::interfaces::{field_equals, ConflictReason};

    async fn store_in(dir: &TempDir) -> SqliteItemStore {
        let path = dir.path().join("items.db");
        let options = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await.unwrap();
        let store = SqliteItemStore::new(
            pool,
            vec![IndexDefinition::new("GSI1", "GSI1PK", "GSI1SK")],
        );
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_failed_precondition_rolls_back() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        let key = ItemKey::new("STORY#s1", "COMMENT#c1");
        let attributes: Attributes =
            serde_json::from_value(json!({"authorId": "u1", "content": "v1"})).unwrap();
        store.put(&key, attributes, None).await.unwrap();

        let precondition = Precondition::new(
            field_equals("authorId", "u2"),
            ConflictReason::NOT_AUTHOR,
        );
        let err = store
            .update(&key, &[UpdateOp::set("content", "v2")], Some(&precondition))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed { .. }));

        // The connection must be usable again after the rollback.
        let item = store.get(&key).await.unwrap();
        assert_eq!(item.get_str("content"), Some("v1"));
        store
            .update(&key, &[UpdateOp::set("content", "v3")], None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_commit_rolls_back() {
        let dir = TempDir::new().unwrap();
        let options = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(dir.path().join("items.db"))
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        let store = SqliteItemStore::new(pool, Vec::new());
        store.init().await.unwrap();

        let mut conn = store.pool.acquire().await.unwrap();
        sqlx::raw_sql(
            "CREATE TABLE parents (id INTEGER PRIMARY KEY);
             CREATE TABLE children (
                 parent_id INTEGER REFERENCES parents(id) DEFERRABLE INITIALLY DEFERRED
             );",
        )
        .execute(&mut *conn)
        .await
        .unwrap();

        // A deferred foreign key violation only surfaces at COMMIT.
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await.unwrap();
        sqlx::query("INSERT INTO children (parent_id) VALUES (1)")
            .execute(&mut *conn)
            .await
            .unwrap();
        let err = SqliteItemStore::finish(&mut conn, Ok(())).await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));

        let orphans: i64 = sqlx::query("SELECT COUNT(*) FROM children")
            .fetch_one(&mut *conn)
            .await
            .unwrap()
            .try_get(0)
            .unwrap();
        assert_eq!(orphans, 0);
        drop(conn);

        // The single pooled connection is usable for new write transactions.
        let key = ItemKey::new("STORY#s1", "STORY#s1");
        store.put(&key, Attributes::new(), None).await.unwrap();
        assert!(store.get(&key).await.is_ok());
    }

    #[tokio::test]
    async fn test_prefix_with_like_wildcards_is_literal() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        for sk in ["COMMENT#a_1", "COMMENT#ab1", "COMMENT#a%1"] {
            store
                .put(&ItemKey::new("STORY#s1", sk), Attributes::new(), None)
                .await
                .unwrap();
        }

        let page = store
            .query(&QueryRequest::partition("STORY#s1").with_prefix("COMMENT#a_"))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].key.sort_key, "COMMENT#a_1");
    }

    #[tokio::test]
    async fn test_delete_removes_index_projection() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        let key = ItemKey::new("STORY#s1", "STORY#s1");
        let attributes: Attributes =
            serde_json::from_value(json!({"GSI1PK": "STORIES", "GSI1SK": "2026#s1"})).unwrap();
        store.put(&key, attributes, None).await.unwrap();

        let listing = QueryRequest::partition("STORIES").on_index("GSI1");
        assert_eq!(store.query(&listing).await.unwrap().items.len(), 1);

        let removed = store.delete(&key, None).await.unwrap();
        assert!(removed.is_some());
        assert!(store.query(&listing).await.unwrap().items.is_empty());
    }
}
