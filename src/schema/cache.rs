//! Disk cache for extracted schema metadata
//!
//! One JSON file per schema, wrapped in an envelope carrying the extraction
//! timestamp. Expiry is an explicit check against that timestamp on read,
//! not an mtime comparison.

use crate::error::Result;
use crate::schema::SchemaMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Serialize, Deserialize)]
struct CacheEnvelope {
    cached_at: DateTime<Utc>,
    metadata: SchemaMetadata,
}

pub struct MetadataCache {
    dir: PathBuf,
    ttl: chrono::Duration,
}

impl MetadataCache {
    pub fn new(dir: impl AsRef<Path>, ttl_secs: i64) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            ttl: chrono::Duration::seconds(ttl_secs),
        }
    }

    fn path_for(&self, schema_name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", schema_name))
    }

    /// Load cached metadata for a schema, returning `None` when missing,
    /// expired, or unreadable. A corrupt cache file is logged and treated
    /// as a miss so the caller falls back to re-extraction.
    pub fn load(&self, schema_name: &str) -> Option<SchemaMetadata> {
        let path = self.path_for(schema_name);
        let content = std::fs::read_to_string(&path).ok()?;
        let envelope: CacheEnvelope = match serde_json::from_str(&content) {
            Ok(e) => e,
            Err(e) => {
                warn!("Ignoring corrupt metadata cache {}: {}", path.display(), e);
                return None;
            }
        };
        let age = Utc::now() - envelope.cached_at;
        if age > self.ttl {
            debug!(
                "Metadata cache for '{}' expired ({}s old)",
                schema_name,
                age.num_seconds()
            );
            return None;
        }
        Some(envelope.metadata)
    }

    pub fn store(&self, metadata: &SchemaMetadata) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let envelope = CacheEnvelope {
            cached_at: Utc::now(),
            metadata: metadata.clone(),
        };
        let path = self.path_for(&metadata.schema_name);
        std::fs::write(&path, serde_json::to_string_pretty(&envelope)?)?;
        debug!("Cached metadata for '{}' at {}", metadata.schema_name, path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Table;

    fn sample_metadata() -> SchemaMetadata {
        SchemaMetadata {
            schema_name: "shop".to_string(),
            tables: vec![Table {
                name: "orders".to_string(),
                columns: vec![],
                relationships: vec![],
                description: None,
                sample_queries: None,
            }],
        }
    }

    #[test]
    fn roundtrip_within_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetadataCache::new(dir.path(), 3600);
        cache.store(&sample_metadata()).unwrap();

        let loaded = cache.load("shop").expect("cache hit expected");
        assert_eq!(loaded.tables.len(), 1);
        assert_eq!(loaded.tables[0].name, "orders");
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetadataCache::new(dir.path(), -1);
        cache.store(&sample_metadata()).unwrap();
        assert!(cache.load("shop").is_none());
    }

    #[test]
    fn missing_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetadataCache::new(dir.path(), 3600);
        assert!(cache.load("nope").is_none());
    }
}
