//! Pipeline registry
//!
//! Resolves recipe stage identifiers into concrete strategy objects,
//! wiring in the shared services each strategy needs. All recipes are
//! resolved eagerly at startup, so an unknown strategy identifier or bad
//! parameter block is a configuration error at load time, never a runtime
//! surprise.

use crate::error::{Result, SageError};
use crate::executor::DatabaseExecutor;
use crate::llm::ChatModel;
use crate::pipeline::context::{StandardContext, StandardContextParams};
use crate::pipeline::llm_stage::{ChatCompletion, ChatCompletionParams};
use crate::pipeline::prompt::{TemplatePrompt, TemplatePromptParams};
use crate::pipeline::respond::{SqlExtract, SqlExtractParams};
use crate::pipeline::retrieve::{AllTablesRetrieval, CosineParams, CosineRetrieval};
use crate::pipeline::understand::{LlmRewrite, LlmRewriteParams, Passthrough};
use crate::pipeline::Pipeline;
use crate::recipe::{Recipe, RecipeSet, StageConfig};
use crate::vector::VectorStore;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Shared services injected into strategies at resolution time. Built once
/// at process start; no hidden globals.
#[derive(Clone)]
pub struct StageServices {
    pub llm: Arc<dyn ChatModel>,
    pub index: Option<Arc<dyn VectorStore>>,
    pub executor: Option<Arc<dyn DatabaseExecutor>>,
    /// Vector store collection, one per schema.
    pub collection: String,
}

fn parse_params<T: DeserializeOwned>(recipe: &str, stage: &StageConfig) -> Result<T> {
    serde_json::from_value(stage.params.clone()).map_err(|e| {
        SageError::Config(format!(
            "invalid params for strategy '{}' in recipe '{}': {}",
            stage.strategy, recipe, e
        ))
    })
}

fn unknown(recipe: &str, stage_name: &str, strategy: &str) -> SageError {
    SageError::Config(format!(
        "unknown {} strategy '{}' in recipe '{}'",
        stage_name, strategy, recipe
    ))
}

fn build_pipeline(recipe: &Recipe, services: &StageServices) -> Result<Pipeline> {
    let understanding: Arc<dyn crate::pipeline::QueryUnderstanding> =
        match recipe.understanding.strategy.as_str() {
            "passthrough" => Arc::new(Passthrough),
            "llm_rewrite" => {
                let params: LlmRewriteParams = parse_params(&recipe.name, &recipe.understanding)?;
                Arc::new(LlmRewrite::new(services.llm.clone(), params))
            }
            other => return Err(unknown(&recipe.name, "understanding", other)),
        };

    let retrieval: Arc<dyn crate::pipeline::Retrieval> = match recipe.retrieval.strategy.as_str() {
        "cosine" => {
            let params: CosineParams = parse_params(&recipe.name, &recipe.retrieval)?;
            Arc::new(CosineRetrieval::new(
                services.index.clone(),
                services.llm.clone(),
                services.collection.clone(),
                params,
            ))
        }
        "all_tables" => Arc::new(AllTablesRetrieval),
        other => return Err(unknown(&recipe.name, "retrieval", other)),
    };

    let context: Arc<dyn crate::pipeline::ContextProcessing> =
        match recipe.context.strategy.as_str() {
            "standard" => {
                let params: StandardContextParams = parse_params(&recipe.name, &recipe.context)?;
                Arc::new(StandardContext::new(params))
            }
            other => return Err(unknown(&recipe.name, "context", other)),
        };

    let prompt: Arc<dyn crate::pipeline::PromptBuilding> = match recipe.prompt.strategy.as_str() {
        "template" => {
            let params: TemplatePromptParams = parse_params(&recipe.name, &recipe.prompt)?;
            Arc::new(TemplatePrompt::new(params)?)
        }
        other => return Err(unknown(&recipe.name, "prompt", other)),
    };

    let llm: Arc<dyn crate::pipeline::LlmInteraction> = match recipe.llm.strategy.as_str() {
        "chat" => {
            let params: ChatCompletionParams = parse_params(&recipe.name, &recipe.llm)?;
            Arc::new(ChatCompletion::new(services.llm.clone(), params))
        }
        other => return Err(unknown(&recipe.name, "llm", other)),
    };

    let response: Arc<dyn crate::pipeline::ResponseProcessing> =
        match recipe.response.strategy.as_str() {
            "sql_extract" => {
                let params: SqlExtractParams = parse_params(&recipe.name, &recipe.response)?;
                Arc::new(SqlExtract::new(services.executor.clone(), params))
            }
            other => return Err(unknown(&recipe.name, "response", other)),
        };

    Ok(Pipeline {
        name: recipe.name.clone(),
        understanding,
        retrieval,
        context,
        prompt,
        llm,
        response,
    })
}

pub struct PipelineRegistry {
    pipelines: HashMap<String, Pipeline>,
    default_name: String,
}

impl std::fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRegistry")
            .field("pipelines", &self.pipelines.keys().collect::<Vec<_>>())
            .field("default_name", &self.default_name)
            .finish()
    }
}

impl PipelineRegistry {
    /// Resolve every recipe into a runnable pipeline.
    pub fn build(recipes: &RecipeSet, services: &StageServices) -> Result<Self> {
        let mut pipelines = HashMap::new();
        let mut default_name = None;

        for recipe in recipes.iter() {
            let pipeline = build_pipeline(recipe, services)?;
            if recipe.default {
                default_name = Some(recipe.name.clone());
            }
            pipelines.insert(recipe.name.clone(), pipeline);
        }

        let default_name =
            default_name.ok_or_else(|| SageError::Config("no default recipe".to_string()))?;
        info!(
            "Resolved {} pipeline(s), default '{}'",
            pipelines.len(),
            default_name
        );
        Ok(Self {
            pipelines,
            default_name,
        })
    }

    /// Pure lookup by name; `None` selects the default recipe.
    pub fn resolve(&self, name: Option<&str>) -> Result<&Pipeline> {
        let name = name.unwrap_or(&self.default_name);
        self.pipelines
            .get(name)
            .ok_or_else(|| SageError::Config(format!("unknown recipe '{}'", name)))
    }
}
