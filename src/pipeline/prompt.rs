//! Prompt building strategies
//!
//! Renders a template with the schema context and the question. Substituted
//! content is neutralized first, so a schema description that happens to
//! contain placeholder syntax cannot inject into the template.

use crate::error::{Result, SageError};
use crate::pipeline::{PipelineContext, PromptBuilding};
use async_trait::async_trait;
use serde::Deserialize;

pub const SCHEMA_PLACEHOLDER: &str = "{{schema_context}}";
pub const QUESTION_PLACEHOLDER: &str = "{{question}}";

const DEFAULT_TEMPLATE: &str = "\
You are given the following database schema context:

{{schema_context}}

Write a single SQL query that answers this question:

{{question}}
";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TemplatePromptParams {
    /// Operator-supplied template file; the built-in template when absent.
    pub template_file: Option<String>,
}

pub struct TemplatePrompt {
    template: String,
}

impl TemplatePrompt {
    /// Load and validate the template. A template missing either
    /// placeholder is a configuration error, caught at load time.
    pub fn new(params: TemplatePromptParams) -> Result<Self> {
        let template = match &params.template_file {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                SageError::Config(format!("Cannot read prompt template {}: {}", path, e))
            })?,
            None => DEFAULT_TEMPLATE.to_string(),
        };

        if !template.contains(SCHEMA_PLACEHOLDER) || !template.contains(QUESTION_PLACEHOLDER) {
            return Err(SageError::Config(format!(
                "prompt template must contain {} and {}",
                SCHEMA_PLACEHOLDER, QUESTION_PLACEHOLDER
            )));
        }

        Ok(Self { template })
    }

    /// Break up placeholder syntax in substituted content.
    fn neutralize(text: &str) -> String {
        text.replace("{{", "{ {").replace("}}", "} }")
    }
}

#[async_trait]
impl PromptBuilding for TemplatePrompt {
    async fn build(&self, ctx: &mut PipelineContext) -> Result<()> {
        let context_text = ctx
            .context_text
            .as_deref()
            .ok_or_else(|| SageError::Execution("prompt stage ran before context".to_string()))?;

        let prompt = self
            .template
            .replace(SCHEMA_PLACEHOLDER, &Self::neutralize(context_text))
            .replace(QUESTION_PLACEHOLDER, &Self::neutralize(ctx.effective_question()));

        ctx.prompt = Some(prompt);
        Ok(())
    }
}
