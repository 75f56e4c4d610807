//! Database collaborator boundary
//!
//! The core never talks to a driver directly; it consumes introspection
//! results and read-query execution through this trait. Connection pooling
//! and dialect specifics live on the other side.

use crate::error::{Result, SageError};
use crate::schema::SchemaMetadata;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Row-capped result of executing a read query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl ResultSet {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[async_trait]
pub trait DatabaseExecutor: Send + Sync {
    /// Introspect the live database: tables, columns, foreign keys.
    async fn introspect(&self) -> Result<SchemaMetadata>;

    /// Execute a read query, returning at most `row_limit` rows.
    async fn execute(&self, sql: &str, row_limit: usize) -> Result<ResultSet>;
}

/// Executor over a pre-extracted schema with no live database behind it.
///
/// Useful for offline runs where the schema comes from a JSON file:
/// introspection returns the parsed metadata and execution reports a
/// structured error instead of rows.
pub struct StaticExecutor {
    metadata: SchemaMetadata,
}

impl StaticExecutor {
    pub fn new(metadata: SchemaMetadata) -> Self {
        Self { metadata }
    }
}

#[async_trait]
impl DatabaseExecutor for StaticExecutor {
    async fn introspect(&self) -> Result<SchemaMetadata> {
        Ok(self.metadata.clone())
    }

    async fn execute(&self, _sql: &str, _row_limit: usize) -> Result<ResultSet> {
        Err(SageError::Execution(
            "no live database configured; query was not executed".to_string(),
        ))
    }
}
