//! Column search scheduler
//!
//! Fans the per-table column similarity search out across a bounded set of
//! concurrent tasks. One slow or failing table must not block or fail the
//! others: a failed search is logged and contributes an empty column list
//! for that table only.

use crate::pipeline::RankedColumn;
use crate::vector::{EntityKind, SearchFilter, VectorStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

pub struct ColumnSearchScheduler {
    max_workers: usize,
}

impl ColumnSearchScheduler {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    /// Search the column partition for each table, at most `max_workers`
    /// searches in flight at once. Returns a map keyed by table name, so
    /// task completion order does not affect the result.
    pub async fn search_columns(
        &self,
        store: Arc<dyn VectorStore>,
        collection: &str,
        vector: &[f32],
        tables: &[String],
        per_table_limit: usize,
    ) -> HashMap<String, Vec<RankedColumn>> {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();

        for table in tables {
            let store = store.clone();
            let semaphore = semaphore.clone();
            let collection = collection.to_string();
            let vector = vector.to_vec();
            let table = table.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire().await;
                let filter =
                    SearchFilter::kind(EntityKind::Column).with_payload("table", table.clone());
                let result = store
                    .search(&collection, &vector, &filter, per_table_limit)
                    .await;
                (table, result)
            });
        }

        let mut columns: HashMap<String, Vec<RankedColumn>> = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((table, Ok(hits))) => {
                    let ranked = hits
                        .into_iter()
                        .filter_map(|hit| {
                            hit.payload.get("name").map(|name| RankedColumn {
                                name: name.clone(),
                                score: hit.score,
                            })
                        })
                        .collect();
                    columns.insert(table, ranked);
                }
                Ok((table, Err(e))) => {
                    warn!("Column search for table '{}' failed: {}", table, e);
                    columns.insert(table, Vec::new());
                }
                Err(e) => {
                    warn!("Column search task panicked: {}", e);
                }
            }
        }
        columns
    }
}
