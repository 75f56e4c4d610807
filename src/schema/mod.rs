//! Schema metadata model
//!
//! Normalized table/column/relationship metadata for one database schema,
//! plus the disk cache and the store that keeps it fresh.

pub mod cache;
pub mod store;

use crate::error::{Result, SageError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    /// AI-generated description, filled in by the metadata store.
    #[serde(default)]
    pub description: Option<String>,
    /// Sampled distinct values, bounded by the store's sampling limit.
    #[serde(default)]
    pub sample_values: Option<Vec<String>>,
}

fn default_nullable() -> bool {
    true
}

/// Directional foreign-key style relationship (source table -> target table).
/// Incoming relationships are derived, not stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    /// Source columns in the owning table.
    pub columns: Vec<String>,
    pub target_table: String,
    pub target_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    /// AI-generated description, filled in by the metadata store.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sample_queries: Option<Vec<String>>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Complete metadata for one configured database schema.
///
/// Built once at startup (or loaded from the disk cache), refreshed only by
/// an explicit re-extraction. Immutable during a request and read-shared
/// across concurrent requests behind an `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaMetadata {
    pub schema_name: String,
    pub tables: Vec<Table>,
}

impl SchemaMetadata {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Declaration index of a table, used for deterministic tie-breaking.
    pub fn table_position(&self, name: &str) -> Option<usize> {
        self.tables.iter().position(|t| t.name == name)
    }

    /// Derive incoming relationships for `target` by scanning all tables.
    pub fn incoming_relationships(&self, target: &str) -> Vec<(&str, &Relationship)> {
        let mut incoming = Vec::new();
        for table in &self.tables {
            for rel in &table.relationships {
                if rel.target_table == target {
                    incoming.push((table.name.as_str(), rel));
                }
            }
        }
        incoming
    }

    /// Check structural invariants: column names are unique within each
    /// table, and every column a relationship references exists in the
    /// owning table.
    pub fn validate(&self) -> Result<()> {
        for table in &self.tables {
            let mut seen: HashSet<&str> = HashSet::new();
            for column in &table.columns {
                if !seen.insert(column.name.as_str()) {
                    return Err(SageError::Metadata(format!(
                        "duplicate column '{}' in table '{}'",
                        column.name, table.name
                    )));
                }
            }
            for rel in &table.relationships {
                for col in &rel.columns {
                    if table.column(col).is_none() {
                        return Err(SageError::Metadata(format!(
                            "relationship in table '{}' references unknown column '{}'",
                            table.name, col
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
