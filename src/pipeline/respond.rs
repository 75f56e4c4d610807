//! Response processing strategies
//!
//! Extracts the SQL statement from raw LLM output (tolerating prose and
//! markdown fences), syntax-checks it, and optionally executes it with a
//! row cap. Every path produces a well-formed [`QueryOutcome`]; execution
//! and parse failures are captured in it, never raised past this boundary.

use crate::error::{Result, SageError};
use crate::executor::DatabaseExecutor;
use crate::pipeline::{PipelineContext, QueryOutcome, ResponseProcessing};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::sync::Arc;
use tracing::{debug, warn};

lazy_static! {
    static ref SQL_FENCE: Regex = Regex::new(r"(?s)```(?:sql)?\s*(.*?)```").unwrap();
    static ref SQL_START: Regex = Regex::new(r"(?is)\b(SELECT|WITH)\b").unwrap();
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqlExtractParams {
    pub execute_query: bool,
    pub max_preview_rows: usize,
}

impl Default for SqlExtractParams {
    fn default() -> Self {
        Self {
            execute_query: false,
            max_preview_rows: 50,
        }
    }
}

/// Split raw LLM output into the SQL statement and the surrounding prose.
fn extract_sql(raw: &str) -> (Option<String>, String) {
    if let Some(captures) = SQL_FENCE.captures(raw) {
        let sql = captures.get(1).map(|m| m.as_str().trim().to_string());
        let fence = captures.get(0).unwrap();
        let explanation = format!("{}{}", &raw[..fence.start()], &raw[fence.end()..])
            .trim()
            .to_string();
        return (sql.filter(|s| !s.is_empty()), explanation);
    }

    // No fence: the query runs from the first SELECT/WITH keyword to the
    // terminating semicolon (or end of output). Text on either side is
    // explanation.
    if let Some(m) = SQL_START.find(raw) {
        let tail = &raw[m.start()..];
        let (sql, trailing) = match tail.find(';') {
            Some(pos) => (&tail[..pos], &tail[pos + 1..]),
            None => (tail, ""),
        };
        let explanation = format!("{} {}", raw[..m.start()].trim(), trailing.trim())
            .trim()
            .to_string();
        return (Some(sql.trim().to_string()), explanation);
    }

    (None, raw.trim().to_string())
}

pub struct SqlExtract {
    executor: Option<Arc<dyn DatabaseExecutor>>,
    params: SqlExtractParams,
}

impl SqlExtract {
    pub fn new(executor: Option<Arc<dyn DatabaseExecutor>>, params: SqlExtractParams) -> Self {
        Self { executor, params }
    }

    async fn execute(&self, sql: &str) -> (Option<crate::executor::ResultSet>, Option<String>) {
        let Some(executor) = &self.executor else {
            return (
                None,
                Some("query execution enabled but no database configured".to_string()),
            );
        };
        match executor.execute(sql, self.params.max_preview_rows).await {
            Ok(mut result) => {
                result.rows.truncate(self.params.max_preview_rows);
                (Some(result), None)
            }
            Err(e) => {
                warn!("Query execution failed: {}", e);
                (None, Some(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl ResponseProcessing for SqlExtract {
    async fn process(&self, ctx: &mut PipelineContext) -> Result<()> {
        let raw = ctx
            .raw_llm_output
            .as_deref()
            .ok_or_else(|| SageError::Execution("response stage ran before llm".to_string()))?;

        let (sql, explanation) = extract_sql(raw);

        let Some(sql) = sql else {
            ctx.outcome = Some(QueryOutcome {
                query: String::new(),
                explanation,
                results: None,
                error: Some("no SQL statement found in model output".to_string()),
            });
            return Ok(());
        };

        // Syntax check before touching the database. The attempted query is
        // always part of the outcome, failed or not.
        if let Err(e) = Parser::parse_sql(&GenericDialect {}, &sql) {
            ctx.outcome = Some(QueryOutcome {
                query: sql,
                explanation,
                results: None,
                error: Some(format!("SQL syntax error: {}", e)),
            });
            return Ok(());
        }

        let (results, error) = if self.params.execute_query {
            self.execute(&sql).await
        } else {
            (None, None)
        };

        debug!("Processed response (executed: {})", self.params.execute_query);
        ctx.outcome = Some(QueryOutcome {
            query: sql,
            explanation,
            results,
            error,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ResultSet;

    struct RowsExecutor {
        rows: usize,
    }

    #[async_trait]
    impl DatabaseExecutor for RowsExecutor {
        async fn introspect(&self) -> Result<crate::schema::SchemaMetadata> {
            unreachable!()
        }

        async fn execute(&self, _: &str, row_limit: usize) -> Result<ResultSet> {
            Ok(ResultSet {
                columns: vec!["id".to_string()],
                rows: (0..self.rows.min(row_limit))
                    .map(|i| vec![serde_json::json!(i)])
                    .collect(),
            })
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl DatabaseExecutor for FailingExecutor {
        async fn introspect(&self) -> Result<crate::schema::SchemaMetadata> {
            unreachable!()
        }

        async fn execute(&self, _: &str, _: usize) -> Result<ResultSet> {
            Err(SageError::Execution("relation does not exist".to_string()))
        }
    }

    async fn process_raw(stage: &SqlExtract, raw: &str) -> QueryOutcome {
        let mut ctx = PipelineContext::new("q");
        ctx.raw_llm_output = Some(raw.to_string());
        stage.process(&mut ctx).await.unwrap();
        ctx.outcome.unwrap()
    }

    #[tokio::test]
    async fn fenced_sql_and_trailing_prose_are_separated() {
        let stage = SqlExtract::new(None, SqlExtractParams::default());
        let raw = "```sql\nSELECT id FROM games LIMIT 5\n```\nThis lists the first five games.";
        let outcome = process_raw(&stage, raw).await;

        assert_eq!(outcome.query, "SELECT id FROM games LIMIT 5");
        assert_eq!(outcome.explanation, "This lists the first five games.");
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn unfenced_sql_is_extracted() {
        let stage = SqlExtract::new(None, SqlExtractParams::default());
        let raw = "Here is your query: SELECT 1;";
        let outcome = process_raw(&stage, raw).await;

        assert_eq!(outcome.query, "SELECT 1");
        assert_eq!(outcome.explanation, "Here is your query:");
    }

    #[tokio::test]
    async fn unfenced_trailing_prose_stays_out_of_the_query() {
        let stage = SqlExtract::new(None, SqlExtractParams::default());
        let raw = "Sure. SELECT 1; This lists a single row.";
        let outcome = process_raw(&stage, raw).await;

        assert_eq!(outcome.query, "SELECT 1");
        assert_eq!(outcome.explanation, "Sure. This lists a single row.");
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn invalid_sql_is_contained_as_error() {
        let stage = SqlExtract::new(
            Some(Arc::new(RowsExecutor { rows: 3 })),
            SqlExtractParams {
                execute_query: true,
                ..Default::default()
            },
        );
        let raw = "```sql\nSELECT FROM WHERE\n```";
        let outcome = process_raw(&stage, raw).await;

        assert_eq!(outcome.query, "SELECT FROM WHERE");
        assert!(outcome.error.is_some());
        assert!(outcome.results.is_none());
    }

    #[tokio::test]
    async fn missing_sql_yields_structured_error() {
        let stage = SqlExtract::new(None, SqlExtractParams::default());
        let outcome = process_raw(&stage, "I cannot answer that.").await;

        assert!(outcome.query.is_empty());
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn execution_is_row_capped() {
        let stage = SqlExtract::new(
            Some(Arc::new(RowsExecutor { rows: 100 })),
            SqlExtractParams {
                execute_query: true,
                max_preview_rows: 5,
            },
        );
        let outcome = process_raw(&stage, "```sql\nSELECT id FROM games\n```").await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.results.unwrap().row_count(), 5);
    }

    #[tokio::test]
    async fn execution_failure_is_captured_not_raised() {
        let stage = SqlExtract::new(
            Some(Arc::new(FailingExecutor)),
            SqlExtractParams {
                execute_query: true,
                ..Default::default()
            },
        );
        let outcome = process_raw(&stage, "```sql\nSELECT id FROM missing\n```").await;

        assert_eq!(outcome.query, "SELECT id FROM missing");
        assert!(outcome.error.unwrap().contains("does not exist"));
    }

    #[tokio::test]
    async fn no_execution_when_disabled() {
        let stage = SqlExtract::new(
            Some(Arc::new(RowsExecutor { rows: 3 })),
            SqlExtractParams::default(),
        );
        let outcome = process_raw(&stage, "```sql\nSELECT 1\n```").await;
        assert!(outcome.results.is_none());
        assert!(outcome.error.is_none());
    }
}
