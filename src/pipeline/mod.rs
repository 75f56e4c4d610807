//! RAG pipeline
//!
//! Six stages driven in order by the orchestrator, each reading and
//! extending a shared per-request [`PipelineContext`]. Stage behavior is
//! polymorphic: a recipe names one strategy implementation per stage and
//! the registry resolves those names into a runnable [`Pipeline`] at load
//! time.

pub mod context;
pub mod llm_stage;
pub mod orchestrator;
pub mod prompt;
pub mod registry;
pub mod respond;
pub mod retrieve;
pub mod scheduler;
pub mod understand;

use crate::error::Result;
use crate::executor::ResultSet;
use crate::schema::SchemaMetadata;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedTable {
    pub name: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedColumn {
    pub name: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedQuery {
    pub question: Option<String>,
    pub sql: String,
    pub score: f32,
}

/// Output of the retrieval stage: ranked tables, per-table ranked columns,
/// and prior-query example shots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Retrieved {
    pub tables: Vec<RankedTable>,
    pub columns: HashMap<String, Vec<RankedColumn>>,
    pub sample_queries: Vec<RankedQuery>,
}

/// Final result of a pipeline run. Execution failures land in `error`
/// alongside the attempted query; they never escape as exceptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub query: String,
    pub explanation: String,
    pub results: Option<ResultSet>,
    pub error: Option<String>,
}

/// Per-request mutable accumulator. Created at request start, discarded at
/// request end, never shared across requests or persisted.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    pub question: String,
    pub rewritten_question: Option<String>,
    pub question_embedding: Option<Vec<f32>>,
    pub retrieved: Option<Retrieved>,
    pub context_text: Option<String>,
    pub prompt: Option<String>,
    pub raw_llm_output: Option<String>,
    pub outcome: Option<QueryOutcome>,
    /// Set when a feedback match short-circuited the pipeline.
    pub from_cache: bool,
}

impl PipelineContext {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    /// The rewritten question when understanding produced one, otherwise
    /// the original.
    pub fn effective_question(&self) -> &str {
        self.rewritten_question.as_deref().unwrap_or(&self.question)
    }
}

#[async_trait]
pub trait QueryUnderstanding: Send + Sync {
    async fn understand(&self, ctx: &mut PipelineContext) -> Result<()>;
}

#[async_trait]
pub trait Retrieval: Send + Sync {
    async fn retrieve(&self, ctx: &mut PipelineContext, schema: &SchemaMetadata) -> Result<()>;
}

#[async_trait]
pub trait ContextProcessing: Send + Sync {
    async fn process(&self, ctx: &mut PipelineContext, schema: &SchemaMetadata) -> Result<()>;
}

#[async_trait]
pub trait PromptBuilding: Send + Sync {
    async fn build(&self, ctx: &mut PipelineContext) -> Result<()>;
}

#[async_trait]
pub trait LlmInteraction: Send + Sync {
    async fn invoke(&self, ctx: &mut PipelineContext) -> Result<()>;
}

#[async_trait]
pub trait ResponseProcessing: Send + Sync {
    async fn process(&self, ctx: &mut PipelineContext) -> Result<()>;
}

/// A resolved recipe: one strategy object per stage.
pub struct Pipeline {
    pub name: String,
    pub understanding: Arc<dyn QueryUnderstanding>,
    pub retrieval: Arc<dyn Retrieval>,
    pub context: Arc<dyn ContextProcessing>,
    pub prompt: Arc<dyn PromptBuilding>,
    pub llm: Arc<dyn LlmInteraction>,
    pub response: Arc<dyn ResponseProcessing>,
}
