//! Pipeline orchestrator
//!
//! Drives a question through the six stages in order against the shared
//! per-request context. A feedback match during retrieval ends the run
//! early; an overall deadline is enforced at stage boundaries (stages are
//! not assumed interruptible mid-call).

use crate::error::{Result, SageError};
use crate::pipeline::registry::PipelineRegistry;
use crate::pipeline::PipelineContext;
use crate::schema::store::SchemaMetadataStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use uuid::Uuid;

pub struct Orchestrator {
    registry: PipelineRegistry,
    metadata_store: Arc<SchemaMetadataStore>,
    deadline: Option<Duration>,
}

impl Orchestrator {
    pub fn new(registry: PipelineRegistry, metadata_store: Arc<SchemaMetadataStore>) -> Self {
        Self {
            registry,
            metadata_store,
            deadline: None,
        }
    }

    /// Overall per-request deadline, checked before each stage starts.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn check_deadline(&self, started: Instant, stage: &str) -> Result<()> {
        if let Some(deadline) = self.deadline {
            if started.elapsed() >= deadline {
                return Err(SageError::DeadlineExceeded(stage.to_string()));
            }
        }
        Ok(())
    }

    /// Run one question through the named recipe (default recipe when
    /// `None`) and return the finished context.
    pub async fn ask(&self, question: &str, recipe: Option<&str>) -> Result<PipelineContext> {
        let pipeline = self.registry.resolve(recipe)?;
        let schema = self.metadata_store.metadata().await?;

        let request_id = Uuid::new_v4();
        info!(
            "[{}] Running pipeline '{}' for: {}",
            request_id, pipeline.name, question
        );
        let started = Instant::now();
        let mut ctx = PipelineContext::new(question);

        self.check_deadline(started, "understanding")?;
        pipeline.understanding.understand(&mut ctx).await?;

        self.check_deadline(started, "retrieval")?;
        pipeline.retrieval.retrieve(&mut ctx, &schema).await?;

        if ctx.from_cache && ctx.outcome.is_some() {
            info!("Answered from feedback cache, later stages skipped");
            return Ok(ctx);
        }

        self.check_deadline(started, "context")?;
        pipeline.context.process(&mut ctx, &schema).await?;

        self.check_deadline(started, "prompt")?;
        pipeline.prompt.build(&mut ctx).await?;

        self.check_deadline(started, "llm")?;
        if let Err(e) = pipeline.llm.invoke(&mut ctx).await {
            // Preserve the question and the attempted prompt for
            // diagnostics before surfacing the structured failure.
            error!(
                question = question,
                prompt = ctx.prompt.as_deref().unwrap_or(""),
                "LLM stage failed: {}",
                e
            );
            return Err(e);
        }

        self.check_deadline(started, "response")?;
        pipeline.response.process(&mut ctx).await?;

        Ok(ctx)
    }
}
