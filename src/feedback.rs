//! Feedback store and learning loop
//!
//! Persists user-confirmed (question, SQL, explanation) triples and mirrors
//! each one into the query partition of the embedding index, so future
//! near-identical questions can skip the LLM entirely.

use crate::error::{Result, SageError};
use crate::llm::ChatModel;
use crate::vector::{indexer, VectorStore};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub id: i64,
    pub question: String,
    pub sql_query: String,
    pub explanation: String,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed store of confirmed feedback. Entries are immutable once
/// written; the store only appends and reads.
pub struct FeedbackStore {
    conn: Mutex<Connection>,
}

impl FeedbackStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                question TEXT NOT NULL,
                sql_query TEXT NOT NULL,
                explanation TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    pub fn insert(&self, question: &str, sql_query: &str, explanation: &str) -> Result<FeedbackEntry> {
        let created_at = Utc::now();
        let conn = self
            .conn
            .lock()
            .map_err(|_| SageError::Feedback("store lock poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO feedback (question, sql_query, explanation, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![question, sql_query, explanation, created_at.to_rfc3339()],
        )?;
        let id = conn.last_insert_rowid();
        Ok(FeedbackEntry {
            id,
            question: question.to_string(),
            sql_query: sql_query.to_string(),
            explanation: explanation.to_string(),
            created_at,
        })
    }

    pub fn list(&self) -> Result<Vec<FeedbackEntry>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SageError::Feedback("store lock poisoned".to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT id, question, sql_query, explanation, created_at FROM feedback ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            let created_at: String = row.get(4)?;
            // Entries are immutable; a timestamp that no longer parses
            // means the store is corrupt, not something to paper over.
            let created_at = created_at.parse::<DateTime<Utc>>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
            })?;
            Ok(FeedbackEntry {
                id: row.get(0)?,
                question: row.get(1)?,
                sql_query: row.get(2)?,
                explanation: row.get(3)?,
                created_at,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

/// Submission boundary for the feedback learning loop.
///
/// Validates the triple, persists it, then embeds the question and upserts
/// it into the query partition of the embedding index. Submissions are
/// rejected outright when no vector store is configured, because feedback
/// that cannot be indexed can never short-circuit anything.
pub struct FeedbackService {
    store: Arc<FeedbackStore>,
    index: Option<Arc<dyn VectorStore>>,
    llm: Arc<dyn ChatModel>,
    collection: String,
}

impl FeedbackService {
    pub fn new(
        store: Arc<FeedbackStore>,
        index: Option<Arc<dyn VectorStore>>,
        llm: Arc<dyn ChatModel>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            index,
            llm,
            collection: collection.into(),
        }
    }

    pub async fn submit(
        &self,
        question: &str,
        sql_query: &str,
        explanation: &str,
    ) -> Result<FeedbackEntry> {
        if question.trim().is_empty() {
            return Err(SageError::Feedback("question must not be empty".to_string()));
        }
        if sql_query.trim().is_empty() {
            return Err(SageError::Feedback("sql_query must not be empty".to_string()));
        }
        if explanation.trim().is_empty() {
            return Err(SageError::Feedback("explanation must not be empty".to_string()));
        }

        let Some(index) = &self.index else {
            return Err(SageError::VectorStoreDisabled);
        };

        let entry = self.store.insert(question, sql_query, explanation)?;
        let vector = self.llm.embed(&entry.question).await?;
        index
            .upsert(&self.collection, vec![indexer::feedback_record(&entry, vector)])
            .await?;

        info!("Stored feedback #{} for question: {}", entry.id, entry.question);
        Ok(entry)
    }
}
