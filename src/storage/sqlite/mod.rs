//! SQLite implementations of storage interfaces.

mod item_store;

pub use item_store::SqliteItemStore;
