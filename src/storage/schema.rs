//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Items table schema: one row per base item.
#[derive(Iden)]
pub enum Items {
    Table,
    #[iden = "pk"]
    Pk,
    #[iden = "sk"]
    Sk,
    #[iden = "attributes"]
    Attributes,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Secondary index projections, rewritten with every item write.
#[derive(Iden)]
pub enum IndexEntries {
    Table,
    #[iden = "index_name"]
    IndexName,
    #[iden = "ipk"]
    Ipk,
    #[iden = "isk"]
    Isk,
    #[iden = "pk"]
    Pk,
    #[iden = "sk"]
    Sk,
}

/// SQL for creating the items and index tables.
pub const CREATE_ITEMS_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    pk TEXT NOT NULL,
    sk TEXT NOT NULL,
    attributes TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (pk, sk)
);

CREATE TABLE IF NOT EXISTS index_entries (
    index_name TEXT NOT NULL,
    ipk TEXT NOT NULL,
    isk TEXT NOT NULL,
    pk TEXT NOT NULL,
    sk TEXT NOT NULL,
    PRIMARY KEY (index_name, pk, sk)
);

CREATE INDEX IF NOT EXISTS idx_index_entries_lookup
    ON index_entries(index_name, ipk, isk, pk, sk);
"#;
