//! Context processing strategies
//!
//! Shapes retrieved tables/columns/sample queries into the bounded textual
//! block handed to the prompt builder. Truncation is deterministic and
//! always keeps the highest-ranked items. Sample data is privacy-sensitive
//! and only ever rendered when `include_sample_data` is set.

use crate::error::{Result, SageError};
use crate::pipeline::{ContextProcessing, PipelineContext};
use crate::schema::{SchemaMetadata, Table};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt::Write;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StandardContextParams {
    pub max_tables: usize,
    pub max_columns: usize,
    pub max_queries: usize,
    pub include_descriptions: bool,
    pub include_sample_data: bool,
}

impl Default for StandardContextParams {
    fn default() -> Self {
        Self {
            max_tables: 5,
            max_columns: 10,
            max_queries: 3,
            include_descriptions: true,
            include_sample_data: false,
        }
    }
}

pub struct StandardContext {
    params: StandardContextParams,
}

impl StandardContext {
    pub fn new(params: StandardContextParams) -> Self {
        Self { params }
    }

    fn render_table(
        &self,
        out: &mut String,
        table: &Table,
        ranked_columns: Option<&Vec<crate::pipeline::RankedColumn>>,
    ) {
        let _ = writeln!(out, "Table: {}", table.name);
        if self.params.include_descriptions {
            if let Some(desc) = &table.description {
                let _ = writeln!(out, "Description: {}", desc);
            }
        }

        // Ranked column order when retrieval scored them, declaration
        // order otherwise; truncated either way.
        let column_names: Vec<&str> = match ranked_columns {
            Some(ranked) if !ranked.is_empty() => ranked
                .iter()
                .take(self.params.max_columns)
                .map(|c| c.name.as_str())
                .collect(),
            _ => table
                .columns
                .iter()
                .take(self.params.max_columns)
                .map(|c| c.name.as_str())
                .collect(),
        };

        let _ = writeln!(out, "Columns:");
        for name in column_names {
            let Some(column) = table.column(name) else {
                continue;
            };
            let mut line = format!("  - {} ({}", column.name, column.data_type);
            if column.primary_key {
                line.push_str(", primary key");
            }
            if !column.nullable {
                line.push_str(", not null");
            }
            line.push(')');
            if self.params.include_descriptions {
                if let Some(desc) = &column.description {
                    line.push_str(": ");
                    line.push_str(desc);
                }
            }
            if self.params.include_sample_data {
                if let Some(values) = &column.sample_values {
                    if !values.is_empty() {
                        line.push_str(&format!(" [examples: {}]", values.join(", ")));
                    }
                }
            }
            let _ = writeln!(out, "{}", line);
        }

        if !table.relationships.is_empty() {
            let _ = writeln!(out, "Relationships:");
            for rel in &table.relationships {
                let _ = writeln!(
                    out,
                    "  - {}.{} -> {}({})",
                    table.name,
                    rel.columns.join(", "),
                    rel.target_table,
                    rel.target_columns.join(", ")
                );
            }
        }
    }
}

#[async_trait]
impl ContextProcessing for StandardContext {
    async fn process(&self, ctx: &mut PipelineContext, schema: &SchemaMetadata) -> Result<()> {
        let retrieved = ctx
            .retrieved
            .as_ref()
            .ok_or_else(|| SageError::Execution("context stage ran before retrieval".to_string()))?;

        let mut out = String::new();

        // Tables arrive ranked best-first; taking the prefix keeps the top
        // `max_tables` by score.
        for ranked in retrieved.tables.iter().take(self.params.max_tables) {
            let Some(table) = schema.table(&ranked.name) else {
                continue;
            };
            self.render_table(&mut out, table, retrieved.columns.get(&ranked.name));
            let _ = writeln!(out);
        }

        let shots: Vec<&crate::pipeline::RankedQuery> = retrieved
            .sample_queries
            .iter()
            .take(self.params.max_queries)
            .collect();
        if !shots.is_empty() {
            let _ = writeln!(out, "Example queries:");
            for shot in shots {
                if let Some(question) = &shot.question {
                    let _ = writeln!(out, "  -- {}", question);
                }
                let _ = writeln!(out, "  {}", shot.sql);
            }
        }

        ctx.context_text = Some(out.trim_end().to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{RankedQuery, RankedTable, Retrieved};
    use crate::schema::Column;

    fn schema() -> SchemaMetadata {
        let col = |name: &str, samples: Option<Vec<&str>>| Column {
            name: name.to_string(),
            data_type: "TEXT".to_string(),
            nullable: true,
            primary_key: false,
            description: None,
            sample_values: samples.map(|v| v.iter().map(|s| s.to_string()).collect()),
        };
        let table = |name: &str| Table {
            name: name.to_string(),
            columns: vec![
                col("id", None),
                col("email", Some(vec!["alice@example.com", "bob@example.com"])),
            ],
            relationships: vec![],
            description: Some(format!("{} records", name)),
            sample_queries: None,
        };
        SchemaMetadata {
            schema_name: "shop".to_string(),
            tables: vec![table("users"), table("orders"), table("refunds")],
        }
    }

    fn ranked(names: &[(&str, f32)]) -> Retrieved {
        Retrieved {
            tables: names
                .iter()
                .map(|(name, score)| RankedTable {
                    name: name.to_string(),
                    score: *score,
                })
                .collect(),
            ..Default::default()
        }
    }

    async fn render(params: StandardContextParams, retrieved: Retrieved) -> String {
        let mut ctx = PipelineContext::new("q");
        ctx.retrieved = Some(retrieved);
        StandardContext::new(params)
            .process(&mut ctx, &schema())
            .await
            .unwrap();
        ctx.context_text.unwrap()
    }

    #[tokio::test]
    async fn truncation_keeps_highest_ranked_tables() {
        let text = render(
            StandardContextParams {
                max_tables: 2,
                ..Default::default()
            },
            ranked(&[("orders", 0.9), ("users", 0.8), ("refunds", 0.7)]),
        )
        .await;

        assert!(text.contains("Table: orders"));
        assert!(text.contains("Table: users"));
        assert!(!text.contains("Table: refunds"));
    }

    #[tokio::test]
    async fn sample_data_is_excluded_by_default() {
        let text = render(
            StandardContextParams::default(),
            ranked(&[("users", 0.9)]),
        )
        .await;

        // The metadata holds sampled emails, but they must not leak into
        // the context unless explicitly enabled.
        assert!(!text.contains("alice@example.com"));

        let text = render(
            StandardContextParams {
                include_sample_data: true,
                ..Default::default()
            },
            ranked(&[("users", 0.9)]),
        )
        .await;
        assert!(text.contains("alice@example.com"));
    }

    #[tokio::test]
    async fn sample_queries_are_bounded() {
        let mut retrieved = ranked(&[("users", 0.9)]);
        retrieved.sample_queries = vec![
            RankedQuery {
                question: Some("first".to_string()),
                sql: "SELECT 1".to_string(),
                score: 0.9,
            },
            RankedQuery {
                question: Some("second".to_string()),
                sql: "SELECT 2".to_string(),
                score: 0.8,
            },
        ];

        let text = render(
            StandardContextParams {
                max_queries: 1,
                ..Default::default()
            },
            retrieved,
        )
        .await;

        assert!(text.contains("SELECT 1"));
        assert!(!text.contains("SELECT 2"));
    }
}
