//! Index builder
//!
//! Turns schema metadata and accumulated feedback into embedding records.
//! Record ids carry the zero-padded declaration ordinal so id order equals
//! declaration order (the tie-break the searches rely on).

use crate::error::Result;
use crate::feedback::FeedbackEntry;
use crate::llm::ChatModel;
use crate::schema::{Column, SchemaMetadata, Table};
use crate::vector::{EmbeddingRecord, EntityKind, VectorStore};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub fn table_id(position: usize, name: &str) -> String {
    format!("table:{:04}:{}", position, name)
}

pub fn column_id(table: &str, position: usize, name: &str) -> String {
    format!("column:{}:{:04}:{}", table, position, name)
}

pub fn query_id(feedback_id: i64) -> String {
    format!("query:{:08}", feedback_id)
}

fn table_text(table: &Table) -> String {
    match &table.description {
        Some(desc) => format!("Table {}: {}", table.name, desc),
        None => format!("Table {}", table.name),
    }
}

fn column_text(table: &Table, column: &Column) -> String {
    match &column.description {
        Some(desc) => format!("Column {}.{} ({}): {}", table.name, column.name, column.data_type, desc),
        None => format!("Column {}.{} ({})", table.name, column.name, column.data_type),
    }
}

/// Build the embedding record for one confirmed feedback entry. Shared with
/// the feedback service so the id and payload layout stay in one place.
pub fn feedback_record(entry: &FeedbackEntry, vector: Vec<f32>) -> EmbeddingRecord {
    let mut payload = HashMap::new();
    payload.insert("question".to_string(), entry.question.clone());
    payload.insert("sql".to_string(), entry.sql_query.clone());
    payload.insert("explanation".to_string(), entry.explanation.clone());
    EmbeddingRecord {
        id: query_id(entry.id),
        kind: EntityKind::Query,
        vector,
        payload,
    }
}

pub struct SchemaIndexer {
    store: Arc<dyn VectorStore>,
    llm: Arc<dyn ChatModel>,
    collection: String,
}

impl SchemaIndexer {
    pub fn new(store: Arc<dyn VectorStore>, llm: Arc<dyn ChatModel>, collection: impl Into<String>) -> Self {
        Self {
            store,
            llm,
            collection: collection.into(),
        }
    }

    /// Embed and upsert every table and column of the schema. Returns the
    /// number of records written.
    pub async fn index_schema(&self, metadata: &SchemaMetadata) -> Result<usize> {
        let mut records = Vec::new();

        for (table_pos, table) in metadata.tables.iter().enumerate() {
            let vector = self.llm.embed(&table_text(table)).await?;
            let mut payload = HashMap::new();
            payload.insert("name".to_string(), table.name.clone());
            if let Some(desc) = &table.description {
                payload.insert("description".to_string(), desc.clone());
            }
            records.push(EmbeddingRecord {
                id: table_id(table_pos, &table.name),
                kind: EntityKind::Table,
                vector,
                payload,
            });

            for (col_pos, column) in table.columns.iter().enumerate() {
                let vector = self.llm.embed(&column_text(table, column)).await?;
                let mut payload = HashMap::new();
                payload.insert("table".to_string(), table.name.clone());
                payload.insert("name".to_string(), column.name.clone());
                records.push(EmbeddingRecord {
                    id: column_id(&table.name, col_pos, &column.name),
                    kind: EntityKind::Column,
                    vector,
                    payload,
                });
            }
        }

        let count = records.len();
        self.store.upsert(&self.collection, records).await?;
        info!(
            "Indexed {} schema records into '{}'",
            count, self.collection
        );
        Ok(count)
    }

    /// Embed and upsert previously confirmed feedback entries into the
    /// query partition.
    pub async fn index_feedback(&self, entries: &[FeedbackEntry]) -> Result<usize> {
        let mut records = Vec::new();
        for entry in entries {
            let vector = self.llm.embed(&entry.question).await?;
            records.push(feedback_record(entry, vector));
        }
        let count = records.len();
        self.store.upsert(&self.collection, records).await?;
        info!(
            "Indexed {} feedback records into '{}'",
            count, self.collection
        );
        Ok(count)
    }
}
