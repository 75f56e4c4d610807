use anyhow::{Context, Result};
use clap::Parser;
use itertools::Itertools;
use sageql::executor::StaticExecutor;
use sageql::feedback::{FeedbackService, FeedbackStore};
use sageql::llm::{LlmClient, LlmConfig};
use sageql::pipeline::orchestrator::Orchestrator;
use sageql::pipeline::registry::{PipelineRegistry, StageServices};
use sageql::recipe::RecipeSet;
use sageql::schema::store::{SchemaMetadataStore, SchemaStoreConfig};
use sageql::schema::SchemaMetadata;
use sageql::vector::indexer::SchemaIndexer;
use sageql::vector::local::LocalVectorStore;
use sageql::vector::VectorStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "sageql")]
#[command(about = "Ask a natural-language question against a database schema")]
struct Args {
    /// The question in natural language
    question: String,

    /// Directory of recipe JSON documents
    #[arg(long, default_value = "recipes")]
    recipes_dir: PathBuf,

    /// Recipe name (default recipe when omitted)
    #[arg(long)]
    recipe: Option<String>,

    /// Pre-extracted schema metadata JSON file
    #[arg(long)]
    schema_file: PathBuf,

    /// Path for the locally persisted vector index
    #[arg(long)]
    index_path: Option<PathBuf>,

    /// SQLite file for the feedback store
    #[arg(long)]
    feedback_db: Option<PathBuf>,

    /// Mark the previous answer for this question as correct
    #[arg(long, requires = "confirm_sql")]
    confirm: bool,

    /// Verified SQL to store with --confirm
    #[arg(long)]
    confirm_sql: Option<String>,

    /// Verified explanation to store with --confirm
    #[arg(long, default_value = "confirmed by user")]
    confirm_explanation: String,

    /// LLM API key (or set OPENAI_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// LLM API base URL
    #[arg(long, default_value = "https://api.openai.com/v1")]
    base_url: String,

    /// Chat model name
    #[arg(long, default_value = "gpt-4o-mini")]
    model: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let api_key = args
        .api_key
        .clone()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .context("no API key: pass --api-key or set OPENAI_API_KEY")?;

    let llm = Arc::new(LlmClient::new(LlmConfig {
        base_url: args.base_url.clone(),
        api_key,
        model: args.model.clone(),
        ..Default::default()
    })?);

    let schema_json = std::fs::read_to_string(&args.schema_file)
        .with_context(|| format!("cannot read {}", args.schema_file.display()))?;
    let schema: SchemaMetadata = serde_json::from_str(&schema_json)?;
    schema.validate()?;
    let collection = schema.schema_name.clone();

    let metadata_store = Arc::new(SchemaMetadataStore::new(
        Arc::new(StaticExecutor::new(schema)),
        Some(llm.clone()),
        SchemaStoreConfig {
            schema_name: collection.clone(),
            ..Default::default()
        },
    ));

    let index: Option<Arc<dyn VectorStore>> = match &args.index_path {
        Some(path) => {
            let store: Arc<LocalVectorStore> = if path.exists() {
                Arc::new(LocalVectorStore::load(path)?)
            } else {
                Arc::new(LocalVectorStore::persistent(path))
            };
            if store.is_empty(&collection) {
                let indexer = SchemaIndexer::new(store.clone(), llm.clone(), collection.clone());
                let metadata = metadata_store.metadata().await?;
                indexer.index_schema(&metadata).await?;
            }
            Some(store)
        }
        None => None,
    };

    if args.confirm {
        let feedback_db = args
            .feedback_db
            .as_ref()
            .context("--confirm requires --feedback-db")?;
        let store = Arc::new(FeedbackStore::open(feedback_db)?);
        let service = FeedbackService::new(store, index.clone(), llm.clone(), collection.clone());
        let entry = service
            .submit(
                &args.question,
                args.confirm_sql.as_deref().unwrap_or_default(),
                &args.confirm_explanation,
            )
            .await?;
        info!("Feedback #{} stored", entry.id);
        return Ok(());
    }

    let recipes = RecipeSet::load(&args.recipes_dir)?;
    let services = StageServices {
        llm: llm.clone(),
        index,
        executor: None,
        collection,
    };
    let registry = PipelineRegistry::build(&recipes, &services)?;
    let orchestrator = Orchestrator::new(registry, metadata_store);

    let ctx = orchestrator
        .ask(&args.question, args.recipe.as_deref())
        .await?;

    let Some(outcome) = ctx.outcome else {
        anyhow::bail!("pipeline produced no outcome");
    };

    if ctx.from_cache {
        println!("(answered from feedback cache)");
    }
    println!("Query:\n{}\n", outcome.query);
    if !outcome.explanation.is_empty() {
        println!("Explanation:\n{}\n", outcome.explanation);
    }
    if let Some(results) = &outcome.results {
        println!("{}", results.columns.iter().join(" | "));
        for row in &results.rows {
            println!("{}", row.iter().map(|v| v.to_string()).join(" | "));
        }
    }
    if let Some(error) = &outcome.error {
        println!("Error: {}", error);
    }

    Ok(())
}
