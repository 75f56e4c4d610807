//! Query understanding strategies

use crate::error::Result;
use crate::llm::ChatModel;
use crate::pipeline::{PipelineContext, QueryUnderstanding};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Passes the question through untouched; the embedding is computed
/// downstream by retrieval.
pub struct Passthrough;

#[async_trait]
impl QueryUnderstanding for Passthrough {
    async fn understand(&self, _ctx: &mut PipelineContext) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmRewriteParams {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for LlmRewriteParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 256,
        }
    }
}

const REWRITE_SYSTEM_PROMPT: &str = "You rewrite database questions so they are \
unambiguous and self-contained. If the question is already clear, return it \
unchanged. Respond with the question only, no commentary.";

/// Normalizes ambiguous phrasing with one LLM call before retrieval.
/// Idempotent on already-normalized input by instruction: the model is told
/// to return clear questions unchanged.
pub struct LlmRewrite {
    llm: Arc<dyn ChatModel>,
    params: LlmRewriteParams,
}

impl LlmRewrite {
    pub fn new(llm: Arc<dyn ChatModel>, params: LlmRewriteParams) -> Self {
        Self { llm, params }
    }
}

#[async_trait]
impl QueryUnderstanding for LlmRewrite {
    async fn understand(&self, ctx: &mut PipelineContext) -> Result<()> {
        let rewritten = self
            .llm
            .chat(
                REWRITE_SYSTEM_PROMPT,
                &ctx.question,
                self.params.temperature,
                self.params.max_tokens,
            )
            .await?;

        let rewritten = rewritten.trim().trim_matches('"').to_string();
        if !rewritten.is_empty() && rewritten != ctx.question {
            debug!("Rewrote question: {} -> {}", ctx.question, rewritten);
            ctx.rewritten_question = Some(rewritten);
        }
        Ok(())
    }
}
