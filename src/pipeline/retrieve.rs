//! Retrieval strategies
//!
//! Cosine-similarity retrieval against the embedding index, with a
//! feedback short-circuit in front and a degraded all-tables fallback
//! behind it for when the index is disabled or unreachable.

use crate::error::{Result, SageError};
use crate::llm::ChatModel;
use crate::pipeline::scheduler::ColumnSearchScheduler;
use crate::pipeline::{
    PipelineContext, QueryOutcome, RankedQuery, RankedTable, Retrieval, Retrieved,
};
use crate::schema::SchemaMetadata;
use crate::vector::{EntityKind, SearchFilter, VectorStore};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CosineParams {
    pub tables_limit: usize,
    pub columns_per_table_limit: usize,
    pub queries_limit: usize,
    /// Union vector-ranked tables with exact lexical matches of question
    /// terms against table/column names.
    pub use_exact_match: bool,
    pub max_column_search_workers: usize,
    /// Similarity above which a stored feedback entry answers the question
    /// outright. Operator-tunable; see recipe documentation.
    pub feedback_threshold: f32,
    /// Degrade to all tables unranked when the index is unavailable. With
    /// this off, index failures abort the request.
    pub fallback_all_tables: bool,
}

impl Default for CosineParams {
    fn default() -> Self {
        Self {
            tables_limit: 5,
            columns_per_table_limit: 8,
            queries_limit: 3,
            use_exact_match: false,
            max_column_search_workers: 8,
            feedback_threshold: 0.95,
            fallback_all_tables: true,
        }
    }
}

/// Every table in declaration order, unranked. Used both as a configured
/// strategy and as the degraded path of [`CosineRetrieval`].
fn all_tables_unranked(schema: &SchemaMetadata) -> Retrieved {
    Retrieved {
        tables: schema
            .tables
            .iter()
            .map(|t| RankedTable {
                name: t.name.clone(),
                score: 0.0,
            })
            .collect(),
        ..Default::default()
    }
}

pub struct AllTablesRetrieval;

#[async_trait]
impl Retrieval for AllTablesRetrieval {
    async fn retrieve(&self, ctx: &mut PipelineContext, schema: &SchemaMetadata) -> Result<()> {
        ctx.retrieved = Some(all_tables_unranked(schema));
        Ok(())
    }
}

enum RetrievalOutcome {
    /// A stored feedback entry matched above the threshold.
    Cached { sql: String, explanation: String },
    Ranked(Retrieved),
}

pub struct CosineRetrieval {
    store: Option<Arc<dyn VectorStore>>,
    llm: Arc<dyn ChatModel>,
    collection: String,
    params: CosineParams,
}

impl CosineRetrieval {
    pub fn new(
        store: Option<Arc<dyn VectorStore>>,
        llm: Arc<dyn ChatModel>,
        collection: impl Into<String>,
        params: CosineParams,
    ) -> Self {
        Self {
            store,
            llm,
            collection: collection.into(),
            params,
        }
    }

    async fn ranked_retrieve(
        &self,
        store: &Arc<dyn VectorStore>,
        ctx: &mut PipelineContext,
        schema: &SchemaMetadata,
    ) -> Result<RetrievalOutcome> {
        let vector = self.llm.embed(ctx.effective_question()).await?;
        ctx.question_embedding = Some(vector.clone());

        // Feedback short-circuit: a verified answer above the threshold
        // skips the rest of the pipeline.
        let feedback_hits = store
            .search(
                &self.collection,
                &vector,
                &SearchFilter::kind(EntityKind::Query),
                1,
            )
            .await?;
        if let Some(hit) = feedback_hits.first() {
            if hit.score >= self.params.feedback_threshold {
                if let Some(sql) = hit.payload.get("sql") {
                    info!(
                        "Feedback match (score {:.3}) short-circuits pipeline",
                        hit.score
                    );
                    return Ok(RetrievalOutcome::Cached {
                        sql: sql.clone(),
                        explanation: hit
                            .payload
                            .get("explanation")
                            .cloned()
                            .unwrap_or_default(),
                    });
                }
            }
        }

        // Ranked tables from the table partition.
        let table_hits = store
            .search(
                &self.collection,
                &vector,
                &SearchFilter::kind(EntityKind::Table),
                self.params.tables_limit,
            )
            .await?;
        let mut tables: Vec<RankedTable> = table_hits
            .iter()
            .filter_map(|hit| {
                hit.payload.get("name").map(|name| RankedTable {
                    name: name.clone(),
                    score: hit.score,
                })
            })
            .collect();

        if self.params.use_exact_match {
            self.union_exact_matches(ctx.effective_question(), schema, &mut tables);
        }

        // Per-table column search, fanned out across bounded workers.
        let table_names: Vec<String> = tables.iter().map(|t| t.name.clone()).collect();
        let scheduler = ColumnSearchScheduler::new(self.params.max_column_search_workers);
        let columns = scheduler
            .search_columns(
                store.clone(),
                &self.collection,
                &vector,
                &table_names,
                self.params.columns_per_table_limit,
            )
            .await;

        // Prior-query example shots.
        let query_hits = store
            .search(
                &self.collection,
                &vector,
                &SearchFilter::kind(EntityKind::Query),
                self.params.queries_limit,
            )
            .await?;
        let sample_queries: Vec<RankedQuery> = query_hits
            .iter()
            .filter_map(|hit| {
                hit.payload.get("sql").map(|sql| RankedQuery {
                    question: hit.payload.get("question").cloned(),
                    sql: sql.clone(),
                    score: hit.score,
                })
            })
            .collect();

        debug!(
            "Retrieved {} tables, {} example queries",
            tables.len(),
            sample_queries.len()
        );
        Ok(RetrievalOutcome::Ranked(Retrieved {
            tables,
            columns,
            sample_queries,
        }))
    }

    /// Append tables whose name (or any column name) contains a question
    /// term and that the vector search missed. Appended in declaration
    /// order with a zero score, keeping the result deterministic.
    fn union_exact_matches(
        &self,
        question: &str,
        schema: &SchemaMetadata,
        tables: &mut Vec<RankedTable>,
    ) {
        let terms: Vec<String> = question
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| t.len() > 2)
            .map(|t| t.to_string())
            .collect();

        for table in &schema.tables {
            if tables.iter().any(|t| t.name == table.name) {
                continue;
            }
            let name_lower = table.name.to_lowercase();
            let matched = terms.iter().any(|term| {
                name_lower.contains(term)
                    || table
                        .columns
                        .iter()
                        .any(|c| c.name.to_lowercase().contains(term))
            });
            if matched {
                debug!("Exact-match union added table '{}'", table.name);
                tables.push(RankedTable {
                    name: table.name.clone(),
                    score: 0.0,
                });
            }
        }
    }
}

#[async_trait]
impl Retrieval for CosineRetrieval {
    async fn retrieve(&self, ctx: &mut PipelineContext, schema: &SchemaMetadata) -> Result<()> {
        let Some(store) = &self.store else {
            if self.params.fallback_all_tables {
                debug!("Vector store disabled; returning all tables unranked");
                ctx.retrieved = Some(all_tables_unranked(schema));
                return Ok(());
            }
            return Err(SageError::VectorStoreDisabled);
        };

        match self.ranked_retrieve(store, ctx, schema).await {
            Ok(RetrievalOutcome::Cached { sql, explanation }) => {
                ctx.from_cache = true;
                ctx.outcome = Some(QueryOutcome {
                    query: sql,
                    explanation,
                    results: None,
                    error: None,
                });
                Ok(())
            }
            Ok(RetrievalOutcome::Ranked(retrieved)) => {
                ctx.retrieved = Some(retrieved);
                Ok(())
            }
            Err(e) if self.params.fallback_all_tables => {
                warn!("Retrieval degraded to all tables: {}", e);
                ctx.retrieved = Some(all_tables_unranked(schema));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, Table};
    use crate::vector::local::LocalVectorStore;
    use crate::vector::EmbeddingRecord;
    use std::collections::HashMap;

    /// Embeds deterministically; panics if chat is ever called, which is
    /// how the short-circuit tests prove the LLM stays idle.
    struct EmbedOnly {
        vector: Vec<f32>,
    }

    #[async_trait]
    impl ChatModel for EmbedOnly {
        async fn chat(&self, _: &str, _: &str, _: f64, _: u32) -> Result<String> {
            panic!("LLM must not be invoked during retrieval");
        }

        async fn embed(&self, _: &str) -> Result<Vec<f32>> {
            Ok(self.vector.clone())
        }
    }

    fn schema() -> SchemaMetadata {
        let col = |name: &str| Column {
            name: name.to_string(),
            data_type: "TEXT".to_string(),
            nullable: true,
            primary_key: false,
            description: None,
            sample_values: None,
        };
        SchemaMetadata {
            schema_name: "shop".to_string(),
            tables: vec![
                Table {
                    name: "games".to_string(),
                    columns: vec![col("id"), col("title"), col("genre")],
                    relationships: vec![],
                    description: None,
                    sample_queries: None,
                },
                Table {
                    name: "publishers".to_string(),
                    columns: vec![col("id"), col("name")],
                    relationships: vec![],
                    description: None,
                    sample_queries: None,
                },
            ],
        }
    }

    fn table_record(pos: usize, name: &str, vector: Vec<f32>) -> EmbeddingRecord {
        let mut payload = HashMap::new();
        payload.insert("name".to_string(), name.to_string());
        EmbeddingRecord {
            id: format!("table:{:04}:{}", pos, name),
            kind: EntityKind::Table,
            vector,
            payload,
        }
    }

    async fn seeded_store() -> Arc<LocalVectorStore> {
        let store = Arc::new(LocalVectorStore::new());
        store
            .upsert(
                "shop",
                vec![
                    table_record(0, "games", vec![1.0, 0.0]),
                    table_record(1, "publishers", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn retrieval_is_deterministic() {
        let store = seeded_store().await;
        let stage = CosineRetrieval::new(
            Some(store),
            Arc::new(EmbedOnly {
                vector: vec![0.7, 0.7],
            }),
            "shop",
            CosineParams::default(),
        );

        let mut first = PipelineContext::new("anything");
        stage.retrieve(&mut first, &schema()).await.unwrap();
        let mut second = PipelineContext::new("anything");
        stage.retrieve(&mut second, &schema()).await.unwrap();

        let names = |ctx: &PipelineContext| -> Vec<String> {
            ctx.retrieved
                .as_ref()
                .unwrap()
                .tables
                .iter()
                .map(|t| t.name.clone())
                .collect()
        };
        assert_eq!(names(&first), names(&second));
        // Equal similarity resolves by declaration order.
        assert_eq!(names(&first), vec!["games", "publishers"]);
    }

    #[tokio::test]
    async fn feedback_match_short_circuits_without_llm() {
        let store = seeded_store().await;
        let mut payload = HashMap::new();
        payload.insert("question".to_string(), "how many games".to_string());
        payload.insert("sql".to_string(), "SELECT COUNT(*) FROM games".to_string());
        payload.insert("explanation".to_string(), "counts games".to_string());
        store
            .upsert(
                "shop",
                vec![EmbeddingRecord {
                    id: "query:00000001".to_string(),
                    kind: EntityKind::Query,
                    vector: vec![1.0, 0.0],
                    payload,
                }],
            )
            .await
            .unwrap();

        let stage = CosineRetrieval::new(
            Some(store),
            Arc::new(EmbedOnly {
                vector: vec![1.0, 0.0],
            }),
            "shop",
            CosineParams::default(),
        );

        let mut ctx = PipelineContext::new("how many games");
        stage.retrieve(&mut ctx, &schema()).await.unwrap();

        assert!(ctx.from_cache);
        let outcome = ctx.outcome.unwrap();
        assert_eq!(outcome.query, "SELECT COUNT(*) FROM games");
        assert_eq!(outcome.explanation, "counts games");
    }

    #[tokio::test]
    async fn disabled_store_degrades_to_all_tables() {
        let stage = CosineRetrieval::new(
            None,
            Arc::new(EmbedOnly { vector: vec![1.0] }),
            "shop",
            CosineParams::default(),
        );

        let mut ctx = PipelineContext::new("anything");
        stage.retrieve(&mut ctx, &schema()).await.unwrap();

        let retrieved = ctx.retrieved.unwrap();
        assert_eq!(retrieved.tables.len(), 2);
        assert!(retrieved.tables.iter().all(|t| t.score == 0.0));
    }

    #[tokio::test]
    async fn disabled_store_without_fallback_errors() {
        let stage = CosineRetrieval::new(
            None,
            Arc::new(EmbedOnly { vector: vec![1.0] }),
            "shop",
            CosineParams {
                fallback_all_tables: false,
                ..Default::default()
            },
        );

        let mut ctx = PipelineContext::new("anything");
        let err = stage.retrieve(&mut ctx, &schema()).await.unwrap_err();
        assert!(matches!(err, SageError::VectorStoreDisabled));
    }

    #[tokio::test]
    async fn exact_match_unions_missed_tables() {
        let store = seeded_store().await;
        let stage = CosineRetrieval::new(
            Some(store),
            Arc::new(EmbedOnly {
                vector: vec![1.0, 0.0],
            }),
            "shop",
            CosineParams {
                tables_limit: 1,
                use_exact_match: true,
                ..Default::default()
            },
        );

        let mut ctx = PipelineContext::new("games by publisher name");
        stage.retrieve(&mut ctx, &schema()).await.unwrap();

        let retrieved = ctx.retrieved.unwrap();
        let names: Vec<_> = retrieved.tables.iter().map(|t| t.name.as_str()).collect();
        // Vector search keeps only 'games'; the lexical union restores
        // 'publishers' because the question names one of its columns.
        assert_eq!(names, vec!["games", "publishers"]);
    }
}
