//! Schema metadata store
//!
//! Owns the current `SchemaMetadata` for one configured schema. Refresh
//! introspects the live database, optionally augments tables with
//! AI-generated descriptions and sampled distinct values, and writes the
//! result through the disk cache. Introspection failure is fatal; a failed
//! description for a single table is not.

use crate::error::{Result, SageError};
use crate::executor::DatabaseExecutor;
use crate::llm::ChatModel;
use crate::schema::cache::MetadataCache;
use crate::schema::{SchemaMetadata, Table};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SchemaStoreConfig {
    pub schema_name: String,
    /// When set, metadata is cached here with `cache_ttl_secs`.
    pub cache_dir: Option<std::path::PathBuf>,
    pub cache_ttl_secs: i64,
    /// Generate a natural-language description per table via the LLM.
    pub describe_tables: bool,
    /// Distinct values sampled per column; 0 disables sampling.
    pub sample_values_per_column: usize,
}

impl Default for SchemaStoreConfig {
    fn default() -> Self {
        Self {
            schema_name: "public".to_string(),
            cache_dir: None,
            cache_ttl_secs: 24 * 3600,
            describe_tables: false,
            sample_values_per_column: 0,
        }
    }
}

pub struct SchemaMetadataStore {
    executor: Arc<dyn DatabaseExecutor>,
    llm: Option<Arc<dyn ChatModel>>,
    cache: Option<MetadataCache>,
    config: SchemaStoreConfig,
    current: RwLock<Option<Arc<SchemaMetadata>>>,
}

impl SchemaMetadataStore {
    pub fn new(
        executor: Arc<dyn DatabaseExecutor>,
        llm: Option<Arc<dyn ChatModel>>,
        config: SchemaStoreConfig,
    ) -> Self {
        let cache = config
            .cache_dir
            .as_ref()
            .map(|dir| MetadataCache::new(dir, config.cache_ttl_secs));
        Self {
            executor,
            llm,
            cache,
            config,
            current: RwLock::new(None),
        }
    }

    /// Current metadata, loading from the disk cache or extracting on first
    /// use. Shared read-only across requests.
    pub async fn metadata(&self) -> Result<Arc<SchemaMetadata>> {
        if let Some(current) = self
            .current
            .read()
            .map_err(|_| SageError::Metadata("store lock poisoned".to_string()))?
            .clone()
        {
            return Ok(current);
        }

        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.load(&self.config.schema_name) {
                info!("Loaded schema '{}' from disk cache", self.config.schema_name);
                let arc = Arc::new(cached);
                *self
                    .current
                    .write()
                    .map_err(|_| SageError::Metadata("store lock poisoned".to_string()))? =
                    Some(arc.clone());
                return Ok(arc);
            }
        }

        self.refresh().await
    }

    /// Re-extract metadata from the live database, bypassing the cache.
    pub async fn refresh(&self) -> Result<Arc<SchemaMetadata>> {
        // No metadata means no pipeline can run, so this error propagates.
        let mut metadata = self.executor.introspect().await?;
        metadata.schema_name = self.config.schema_name.clone();
        metadata.validate()?;
        info!(
            "Introspected schema '{}' ({} tables)",
            metadata.schema_name,
            metadata.tables.len()
        );

        if self.config.sample_values_per_column > 0 {
            self.sample_values(&mut metadata).await;
        }
        if self.config.describe_tables {
            self.describe_tables(&mut metadata).await;
        }

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(&metadata) {
                warn!("Failed to write metadata cache: {}", e);
            }
        }

        let arc = Arc::new(metadata);
        *self
            .current
            .write()
            .map_err(|_| SageError::Metadata("store lock poisoned".to_string()))? =
            Some(arc.clone());
        Ok(arc)
    }

    async fn sample_values(&self, metadata: &mut SchemaMetadata) {
        let limit = self.config.sample_values_per_column;
        for table in &mut metadata.tables {
            for column in &mut table.columns {
                let sql = format!(
                    "SELECT DISTINCT \"{}\" FROM \"{}\" LIMIT {}",
                    column.name, table.name, limit
                );
                match self.executor.execute(&sql, limit).await {
                    Ok(result) => {
                        let values: Vec<String> = result
                            .rows
                            .iter()
                            .filter_map(|row| row.first())
                            .map(value_to_string)
                            .collect();
                        if !values.is_empty() {
                            column.sample_values = Some(values);
                        }
                    }
                    Err(e) => {
                        warn!(
                            "Sampling {}.{} failed, skipping: {}",
                            table.name, column.name, e
                        );
                    }
                }
            }
        }
    }

    async fn describe_tables(&self, metadata: &mut SchemaMetadata) {
        let Some(llm) = &self.llm else {
            warn!("Table descriptions requested but no LLM configured");
            return;
        };

        for table in &mut metadata.tables {
            match self.describe_one(llm.as_ref(), table).await {
                Ok(description) => table.description = Some(description),
                Err(e) => {
                    // Per-table fallback: keep the raw name as description.
                    warn!("Description for table '{}' failed: {}", table.name, e);
                    table.description = Some(table.name.clone());
                }
            }
        }
    }

    async fn describe_one(&self, llm: &dyn ChatModel, table: &Table) -> Result<String> {
        let columns: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("{} ({})", c.name, c.data_type))
            .collect();
        let prompt = format!(
            "Describe the purpose of the database table '{}' in one sentence.\n\
             Columns: {}\n\
             Respond with the sentence only.",
            table.name,
            columns.join(", ")
        );
        let description = llm
            .chat("You are a database documentation assistant.", &prompt, 0.2, 120)
            .await?;
        Ok(description.trim().to_string())
    }
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ResultSet, StaticExecutor};
    use crate::schema::Column;

    fn sample_schema() -> SchemaMetadata {
        SchemaMetadata {
            schema_name: "shop".to_string(),
            tables: vec![Table {
                name: "orders".to_string(),
                columns: vec![Column {
                    name: "id".to_string(),
                    data_type: "INTEGER".to_string(),
                    nullable: false,
                    primary_key: true,
                    description: None,
                    sample_values: None,
                }],
                relationships: vec![],
                description: None,
                sample_queries: None,
            }],
        }
    }

    #[tokio::test]
    async fn metadata_comes_from_introspection() {
        let store = SchemaMetadataStore::new(
            Arc::new(StaticExecutor::new(sample_schema())),
            None,
            SchemaStoreConfig {
                schema_name: "shop".to_string(),
                ..Default::default()
            },
        );

        let metadata = store.metadata().await.unwrap();
        assert_eq!(metadata.tables.len(), 1);
        assert_eq!(metadata.schema_name, "shop");
    }

    #[tokio::test]
    async fn cache_hit_bypasses_introspection() {
        let dir = tempfile::tempdir().unwrap();
        let config = SchemaStoreConfig {
            schema_name: "shop".to_string(),
            cache_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let store = SchemaMetadataStore::new(
            Arc::new(StaticExecutor::new(sample_schema())),
            None,
            config.clone(),
        );
        store.metadata().await.unwrap();

        // A second store backed by an executor that fails introspection
        // still serves metadata from the cache.
        struct FailingExecutor;

        #[async_trait::async_trait]
        impl DatabaseExecutor for FailingExecutor {
            async fn introspect(&self) -> Result<SchemaMetadata> {
                Err(SageError::Metadata("introspection should not run".to_string()))
            }

            async fn execute(&self, _: &str, _: usize) -> Result<ResultSet> {
                Err(SageError::Execution("unused".to_string()))
            }
        }

        let cached_store = SchemaMetadataStore::new(Arc::new(FailingExecutor), None, config);
        let metadata = cached_store.metadata().await.unwrap();
        assert_eq!(metadata.tables[0].name, "orders");
    }
}
