//! Remote vector store client
//!
//! Talks to a Qdrant-style HTTP service. Point upsert and search map onto
//! the same [`VectorStore`] contract as the local store; equal-score
//! ordering is re-applied client side because remote services make no
//! tie-break guarantee.

use crate::error::{Result, SageError};
use crate::vector::{sort_hits, EmbeddingRecord, SearchFilter, SearchHit, VectorStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Qdrant accepts only unsigned-integer or UUID point ids, so entity ids
/// map to deterministic UUIDs and travel in the payload instead. The same
/// entity id always yields the same point id, keeping upserts idempotent.
fn point_id(entity_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, entity_id.as_bytes()).to_string()
}

#[derive(Debug, Clone)]
pub struct RemoteVectorStoreConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

pub struct RemoteVectorStore {
    config: RemoteVectorStoreConfig,
    client: reqwest::Client,
}

impl RemoteVectorStore {
    pub fn new(config: RemoteVectorStoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SageError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.config.base_url, path));
        if let Some(key) = &self.config.api_key {
            builder = builder.header("api-key", key.clone());
        }
        builder
    }
}

#[async_trait]
impl VectorStore for RemoteVectorStore {
    async fn upsert(&self, collection: &str, records: Vec<EmbeddingRecord>) -> Result<()> {
        let points: Vec<serde_json::Value> = records
            .iter()
            .map(|r| {
                let mut payload = serde_json::Map::new();
                payload.insert("id".to_string(), serde_json::Value::String(r.id.clone()));
                payload.insert(
                    "kind".to_string(),
                    serde_json::to_value(r.kind).unwrap_or_default(),
                );
                for (k, v) in &r.payload {
                    payload.insert(k.clone(), serde_json::Value::String(v.clone()));
                }
                serde_json::json!({
                    "id": point_id(&r.id),
                    "vector": r.vector,
                    "payload": payload,
                })
            })
            .collect();

        debug!("Upserting {} points into '{}'", points.len(), collection);
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}/points", collection),
            )
            .json(&serde_json::json!({ "points": points }))
            .send()
            .await
            .map_err(|e| SageError::VectorStore(format!("upsert request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(SageError::VectorStore(format!(
                "upsert returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let mut must = Vec::new();
        if let Some(kind) = filter.kind {
            must.push(serde_json::json!({
                "key": "kind",
                "match": { "value": serde_json::to_value(kind).unwrap_or_default() }
            }));
        }
        if let Some((field, value)) = &filter.payload_eq {
            must.push(serde_json::json!({
                "key": field,
                "match": { "value": value }
            }));
        }

        let body = serde_json::json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
            "filter": { "must": must },
        });

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/search", collection),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| SageError::VectorStore(format!("search request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(SageError::VectorStore(format!(
                "search returned HTTP {}",
                response.status()
            )));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SageError::VectorStore(format!("invalid search response: {}", e)))?;

        let results = parsed["result"]
            .as_array()
            .ok_or_else(|| SageError::VectorStore("missing 'result' in search response".to_string()))?;

        let mut hits: Vec<SearchHit> = results
            .iter()
            .filter_map(|r| {
                let score = r["score"].as_f64()? as f32;
                let mut payload = HashMap::new();
                if let Some(obj) = r["payload"].as_object() {
                    for (k, v) in obj {
                        if let Some(s) = v.as_str() {
                            payload.insert(k.clone(), s.to_string());
                        }
                    }
                }
                // The entity id rides in the payload; the point id is an
                // opaque UUID the rest of the crate never sees.
                let id = payload.remove("id")?;
                Some(SearchHit { id, score, payload })
            })
            .collect();

        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }
}
