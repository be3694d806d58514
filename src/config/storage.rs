//! Storage configuration types.

use serde::Deserialize;

use super::ConfigError;
use crate::interfaces::IndexDefinition;

/// Storage type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Memory,
    Sqlite,
}

/// Storage configuration (discriminated union).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type discriminator.
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// SQLite-specific configuration.
    pub sqlite: SqliteConfig,
    /// Secondary indexes every backend maintains.
    pub indexes: Vec<IndexDefinition>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Memory,
            sqlite: SqliteConfig::default(),
            indexes: vec![crate::keys::listing_index()],
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names: Vec<&str> = self.indexes.iter().map(|i| i.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(ConfigError::Invalid("duplicate index name".to_string()));
        }
        if self.indexes.iter().any(|i| {
            i.name.is_empty() || i.partition_attribute.is_empty() || i.sort_attribute.is_empty()
        }) {
            return Err(ConfigError::Invalid(
                "index name and attributes must be non-empty".to_string(),
            ));
        }
        if self.storage_type == StorageType::Sqlite && self.sqlite.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "sqlite.max_connections must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// SQLite-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database file path, or `:memory:`.
    pub path: String,
    /// Pool size. In-memory databases always use a single connection.
    pub max_connections: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: "./data/stashflow.db".to_string(),
            max_connections: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_index_names_rejected() {
        let config = StorageConfig {
            indexes: vec![
                IndexDefinition::new("GSI1", "a", "b"),
                IndexDefinition::new("GSI1", "c", "d"),
            ],
            ..StorageConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_is_valid() {
        StorageConfig::default().validate().unwrap();
    }
}
