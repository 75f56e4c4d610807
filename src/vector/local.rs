//! Locally persisted vector store
//!
//! Linear-scan cosine search over in-memory collections, optionally
//! persisted to a JSON file after every upsert. Collections iterate in id
//! order so equal-score results come back in a stable order.

use crate::error::{Result, SageError};
use crate::vector::{
    cosine_similarity, sort_hits, EmbeddingRecord, SearchFilter, SearchHit, VectorStore,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

type Collections = HashMap<String, BTreeMap<String, EmbeddingRecord>>;

pub struct LocalVectorStore {
    collections: RwLock<Collections>,
    /// When set, the full store is rewritten here after each upsert.
    persist_path: Option<PathBuf>,
}

impl LocalVectorStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            persist_path: None,
        }
    }

    pub fn persistent(path: impl AsRef<Path>) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            persist_path: Some(path.as_ref().to_path_buf()),
        }
    }

    /// Load a previously persisted store from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let collections: Collections = serde_json::from_str(&content)
            .map_err(|e| SageError::VectorStore(format!("Failed to parse {}: {}", path.display(), e)))?;
        debug!(
            "Loaded vector store from {} ({} collections)",
            path.display(),
            collections.len()
        );
        Ok(Self {
            collections: RwLock::new(collections),
            persist_path: Some(path.to_path_buf()),
        })
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .map(|collections| collections.get(collection).map(|c| c.len()).unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    fn persist(&self, collections: &Collections) -> Result<()> {
        if let Some(path) = &self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_string(collections)?)?;
        }
        Ok(())
    }
}

impl Default for LocalVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    async fn upsert(&self, collection: &str, records: Vec<EmbeddingRecord>) -> Result<()> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| SageError::VectorStore("lock poisoned".to_string()))?;
        let entries = collections.entry(collection.to_string()).or_default();
        for record in records {
            entries.insert(record.id.clone(), record);
        }
        self.persist(&collections)
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let collections = self
            .collections
            .read()
            .map_err(|_| SageError::VectorStore("lock poisoned".to_string()))?;

        let Some(entries) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<SearchHit> = entries
            .values()
            .filter(|r| filter.matches(r.kind, &r.payload))
            .map(|r| SearchHit {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.vector),
                payload: r.payload.clone(),
            })
            .collect();

        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::EntityKind;

    fn record(id: &str, kind: EntityKind, vector: Vec<f32>, name: &str) -> EmbeddingRecord {
        let mut payload = HashMap::new();
        payload.insert("name".to_string(), name.to_string());
        EmbeddingRecord {
            id: id.to_string(),
            kind,
            vector,
            payload,
        }
    }

    #[tokio::test]
    async fn search_ranks_by_similarity() {
        let store = LocalVectorStore::new();
        store
            .upsert(
                "shop",
                vec![
                    record("table:0000:orders", EntityKind::Table, vec![1.0, 0.0], "orders"),
                    record("table:0001:users", EntityKind::Table, vec![0.0, 1.0], "users"),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search("shop", &[1.0, 0.1], &SearchFilter::kind(EntityKind::Table), 10)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload["name"], "orders");
    }

    #[tokio::test]
    async fn kind_filter_partitions_results() {
        let store = LocalVectorStore::new();
        store
            .upsert(
                "shop",
                vec![
                    record("table:0000:orders", EntityKind::Table, vec![1.0, 0.0], "orders"),
                    record("column:orders:0000:id", EntityKind::Column, vec![1.0, 0.0], "id"),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search("shop", &[1.0, 0.0], &SearchFilter::kind(EntityKind::Column), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload["name"], "id");
    }

    #[tokio::test]
    async fn payload_filter_restricts_to_one_table() {
        let store = LocalVectorStore::new();
        let mut a = record("column:orders:0000:id", EntityKind::Column, vec![1.0, 0.0], "id");
        a.payload.insert("table".to_string(), "orders".to_string());
        let mut b = record("column:users:0000:id", EntityKind::Column, vec![1.0, 0.0], "id");
        b.payload.insert("table".to_string(), "users".to_string());
        store.upsert("shop", vec![a, b]).await.unwrap();

        let filter = SearchFilter::kind(EntityKind::Column).with_payload("table", "orders");
        let hits = store.search("shop", &[1.0, 0.0], &filter, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "column:orders:0000:id");
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = LocalVectorStore::new();
        store
            .upsert(
                "shop",
                vec![record("table:0000:orders", EntityKind::Table, vec![1.0, 0.0], "orders")],
            )
            .await
            .unwrap();
        store
            .upsert(
                "shop",
                vec![record("table:0000:orders", EntityKind::Table, vec![0.0, 1.0], "orders")],
            )
            .await
            .unwrap();

        assert_eq!(store.len("shop"), 1);
        let hits = store
            .search("shop", &[0.0, 1.0], &SearchFilter::default(), 1)
            .await
            .unwrap();
        assert!(hits[0].score > 0.99);
    }

    #[test]
    fn len_treats_poisoned_lock_as_empty() {
        let store = std::sync::Arc::new(LocalVectorStore::new());
        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.collections.write().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert_eq!(store.len("shop"), 0);
        assert!(store.is_empty("shop"));
    }

    #[tokio::test]
    async fn persisted_store_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let store = LocalVectorStore::persistent(&path);
        store
            .upsert(
                "shop",
                vec![record("table:0000:orders", EntityKind::Table, vec![1.0, 0.0], "orders")],
            )
            .await
            .unwrap();

        let reloaded = LocalVectorStore::load(&path).unwrap();
        assert_eq!(reloaded.len("shop"), 1);
        let hits = reloaded
            .search("shop", &[1.0, 0.0], &SearchFilter::kind(EntityKind::Table), 1)
            .await
            .unwrap();
        assert_eq!(hits[0].payload["name"], "orders");
    }
}
