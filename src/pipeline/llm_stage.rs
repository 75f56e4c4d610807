//! LLM interaction strategies

use crate::error::{Result, SageError};
use crate::llm::ChatModel;
use crate::pipeline::{LlmInteraction, PipelineContext};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const SQL_SYSTEM_PROMPT: &str = "You are a SQL generator. Respond with a single \
valid, executable SQL query for the user's request. Put the query in a \
```sql fenced block. You may add a short explanation after the block.";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatCompletionParams {
    pub temperature: f64,
    pub max_tokens: u32,
    /// Overrides the built-in SQL-only system prompt.
    pub system_prompt: Option<String>,
}

impl Default for ChatCompletionParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 1024,
            system_prompt: None,
        }
    }
}

/// Wraps one chat-completion call. Timeouts and transport failures come
/// back classified from the client; this stage adds no retry of its own.
pub struct ChatCompletion {
    llm: Arc<dyn ChatModel>,
    params: ChatCompletionParams,
}

impl ChatCompletion {
    pub fn new(llm: Arc<dyn ChatModel>, params: ChatCompletionParams) -> Self {
        Self { llm, params }
    }
}

#[async_trait]
impl LlmInteraction for ChatCompletion {
    async fn invoke(&self, ctx: &mut PipelineContext) -> Result<()> {
        let prompt = ctx
            .prompt
            .as_deref()
            .ok_or_else(|| SageError::Execution("llm stage ran before prompt".to_string()))?;

        let system = self
            .params
            .system_prompt
            .as_deref()
            .unwrap_or(SQL_SYSTEM_PROMPT);

        debug!("Invoking LLM (temperature {})", self.params.temperature);
        let output = self
            .llm
            .chat(system, prompt, self.params.temperature, self.params.max_tokens)
            .await?;

        ctx.raw_llm_output = Some(output);
        Ok(())
    }
}
