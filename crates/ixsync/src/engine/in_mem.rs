//! 🧪 A search engine in a HashMap, with failure knobs for tests and demos.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use crate::common::Document;
use crate::engine::{BulkIndexResult, FailedItem, SearchEngine};
use crate::error::EngineError;

/// 📦 A search engine that never forgets. Unlike my dad, who forgot my soccer game in 1998.
///
/// `InMemoryEngine` keeps every index as an id-sorted map of JSON bodies, wrapped in a Mutex
/// wrapped in an Arc. It's types all the way down. Clone-able because tests hand one clone to
/// the orchestrator and keep another to peek inside afterwards.
///
/// It can also misbehave on request, which is the whole point of it:
/// - `fail_mapping_for(index)` makes `put_mapping` reject that index.
/// - `reject_id(id, reason)` makes the bulk endpoint refuse one document, every time.
/// - `fail_next_bulk_requests(n)` makes the next `n` bulk requests die in transit.
/// - `answer_next_bulk_requests_with(status, n)` makes them come back with that status.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEngine {
    state: Arc<tokio::sync::Mutex<EngineState>>,
    // -- 🔢 counters stay outside the lock so sync test code can read them
    transient_failures: Arc<AtomicU32>,
    // -- 0 means "connection reset", anything else is the HTTP status to answer with
    transient_status: Arc<AtomicU32>,
    bulk_attempts: Arc<AtomicU32>,
    mapping_attempts: Arc<AtomicU32>,
}

#[derive(Debug, Default)]
struct EngineState {
    indices: HashMap<String, BTreeMap<String, Value>>,
    mappings: HashMap<String, Value>,
    failing_mappings: HashSet<String>,
    rejected_ids: HashMap<String, String>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_mapping_for(&self, index: impl Into<String>) {
        self.state.lock().await.failing_mappings.insert(index.into());
    }

    pub async fn reject_id(&self, id: impl Into<String>, reason: impl Into<String>) {
        self.state.lock().await.rejected_ids.insert(id.into(), reason.into());
    }

    pub fn fail_next_bulk_requests(&self, count: u32) {
        self.transient_status.store(0, Ordering::SeqCst);
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub fn answer_next_bulk_requests_with(&self, status: u16, count: u32) {
        self.transient_status.store(u32::from(status), Ordering::SeqCst);
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub fn bulk_attempts(&self) -> u32 {
        self.bulk_attempts.load(Ordering::SeqCst)
    }

    pub fn mapping_attempts(&self) -> u32 {
        self.mapping_attempts.load(Ordering::SeqCst)
    }

    pub async fn document_count(&self, index: &str) -> usize {
        self.state.lock().await.indices.get(index).map_or(0, BTreeMap::len)
    }

    pub async fn document(&self, index: &str, id: &str) -> Option<Value> {
        self.state.lock().await.indices.get(index)?.get(id).cloned()
    }

    pub async fn mapping(&self, index: &str) -> Option<Value> {
        self.state.lock().await.mappings.get(index).cloned()
    }

    /// 🏷️ Every index that exists, sorted.
    pub async fn index_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state.indices.keys().cloned().collect();
        names.sort();
        names
    }

    /// 🎲 Take one simulated transport failure, if any are queued.
    fn take_transient_failure(&self) -> bool {
        self.transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SearchEngine for InMemoryEngine {
    /// 🗺️ Delete-and-recreate, like the real thing: the index comes back empty.
    async fn put_mapping(&self, index: &str, mapping: &Value) -> Result<(), EngineError> {
        self.mapping_attempts.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        if state.failing_mappings.contains(index) {
            return Err(EngineError::Status {
                status: 400,
                body: format!("mapper_parsing_exception: simulated rejection for '{index}'"),
            });
        }
        state.mappings.insert(index.to_string(), mapping.clone());
        state.indices.insert(index.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn send_bulk(&self, index: &str, documents: &[Document]) -> Result<BulkIndexResult, EngineError> {
        self.bulk_attempts.fetch_add(1, Ordering::SeqCst);
        if self.take_transient_failure() {
            return Err(match self.transient_status.load(Ordering::SeqCst) {
                0 => EngineError::Transport("simulated connection reset by peer".to_string()),
                status => EngineError::Status {
                    status: u16::try_from(status).unwrap_or(500),
                    body: "simulated bulk rejection".to_string(),
                },
            });
        }

        let mut state = self.state.lock().await;
        let mut result = BulkIndexResult::default();
        for document in documents {
            if let Some(reason) = state.rejected_ids.get(&document.id) {
                result.failed.push(FailedItem {
                    id: document.id.clone(),
                    reason: reason.clone(),
                });
                continue;
            }
            match serde_json::from_str::<Value>(&document.source_buf) {
                Ok(body) => {
                    state
                        .indices
                        .entry(index.to_string())
                        .or_default()
                        .insert(document.id.clone(), body);
                    result.succeeded_ids.push(document.id.clone());
                }
                Err(e) => result.failed.push(FailedItem {
                    id: document.id.clone(),
                    reason: format!("mapper_parsing_exception: {e}"),
                }),
            }
        }
        trace!(
            index,
            succeeded = result.succeeded_ids.len(),
            failed = result.failed.len(),
            "📦 in-memory bulk absorbed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn the_one_where_a_new_mapping_wipes_the_slate() -> Result<(), EngineError> {
        let engine = InMemoryEngine::new();
        let doc = Document {
            id: "1".into(),
            source_buf: r#"{"title":"hi"}"#.into(),
        };
        engine.send_bulk("wp-post-1", &[doc]).await?;
        assert_eq!(engine.document_count("wp-post-1").await, 1);

        engine.put_mapping("wp-post-1", &json!({"mappings": {}})).await?;
        assert_eq!(engine.document_count("wp-post-1").await, 0);
        assert_eq!(engine.mapping("wp-post-1").await, Some(json!({"mappings": {}})));
        assert_eq!(engine.index_names().await, vec!["wp-post-1".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_garbage_json_is_a_per_item_failure() -> Result<(), EngineError> {
        let engine = InMemoryEngine::new();
        let good = Document {
            id: "1".into(),
            source_buf: "{}".into(),
        };
        let bad = Document {
            id: "2".into(),
            source_buf: "{not json".into(),
        };
        let result = engine.send_bulk("wp-post-1", &[good, bad]).await?;
        assert_eq!(result.succeeded_ids, vec!["1".to_string()]);
        assert_eq!(result.failed[0].id, "2");
        assert!(engine.document("wp-post-1", "2").await.is_none());
        Ok(())
    }

    #[test]
    fn the_one_where_queued_failures_run_dry() {
        let engine = InMemoryEngine::new();
        engine.fail_next_bulk_requests(2);
        assert!(engine.take_transient_failure());
        assert!(engine.take_transient_failure());
        assert!(!engine.take_transient_failure());
    }
}
