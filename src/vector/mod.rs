//! Embedding index
//!
//! Vector similarity store for table/column/query embeddings, addressed by
//! collection name (one collection per schema). Both the locally persisted
//! store and the remote-service store sit behind [`VectorStore`]; callers
//! never know which one they talk to.

pub mod indexer;
pub mod local;
pub mod remote;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type Embedding = Vec<f32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Table,
    Column,
    Query,
}

/// A stored vector plus the identity of the entity it embeds.
///
/// Records are never mutated in place; an upsert with the same id replaces
/// the previous record wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Entity identifier. Ids embed the declaration ordinal (zero-padded)
    /// so that ascending-id order equals schema declaration order, which is
    /// what tie-breaking on equal scores relies on.
    pub id: String,
    pub kind: EntityKind,
    pub vector: Embedding,
    pub payload: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub payload: HashMap<String, String>,
}

/// Filter applied during search. `kind` restricts the entity-type partition;
/// `payload_eq` restricts to records whose payload field equals a value
/// (used for per-table column search).
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub kind: Option<EntityKind>,
    pub payload_eq: Option<(String, String)>,
}

impl SearchFilter {
    pub fn kind(kind: EntityKind) -> Self {
        Self {
            kind: Some(kind),
            payload_eq: None,
        }
    }

    pub fn with_payload(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload_eq = Some((field.into(), value.into()));
        self
    }

    pub fn matches(&self, record_kind: EntityKind, payload: &HashMap<String, String>) -> bool {
        if let Some(kind) = self.kind {
            if kind != record_kind {
                return false;
            }
        }
        if let Some((field, value)) = &self.payload_eq {
            if payload.get(field) != Some(value) {
                return false;
            }
        }
        true
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, collection: &str, records: Vec<EmbeddingRecord>) -> Result<()>;

    /// Ranked similarity search. Results are ordered by cosine similarity
    /// descending; equal scores are broken by id ascending so repeated
    /// searches over an unchanged index are deterministic.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>>;
}

/// Cosine similarity between two vectors; 0.0 for mismatched or zero-norm
/// inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Order hits by score descending, ties by id ascending.
pub(crate) fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let a = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &a), 1.0);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn cosine_of_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn ties_break_by_id_ascending() {
        let mut hits = vec![
            SearchHit {
                id: "table:0002:b".to_string(),
                score: 0.5,
                payload: HashMap::new(),
            },
            SearchHit {
                id: "table:0001:a".to_string(),
                score: 0.5,
                payload: HashMap::new(),
            },
            SearchHit {
                id: "table:0003:c".to_string(),
                score: 0.9,
                payload: HashMap::new(),
            },
        ];
        sort_hits(&mut hits);
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["table:0003:c", "table:0001:a", "table:0002:b"]
        );
    }
}
