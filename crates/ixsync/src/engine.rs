//! 🔌 Engine: where documents leave our process and enter the search engine's warm embrace.
//! Or cold rejection. Depends on the status code.
//!
//! 🧠 Knowledge graph:
//! - `SearchEngine` trait: one attempt, pure I/O. `put_mapping` + `send_bulk`.
//! - Concrete engines: `ElasticsearchEngine` (reqwest) and `InMemoryEngine` (tests, demos).
//! - `EngineBackend` enum dispatches, so the orchestrator never knows which one it got.
//! - `BulkIndexClient` wraps an engine with bounded exponential backoff. Retries live here,
//!   not in the engine, so every backend gets the same retry story.
//! - Wire format (NDJSON rendering, response parsing) lives in `bulk`.
//!
//! Ancient proverb: "He who retries inside the sink, retries twice." 🦆

use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::common::Document;
use crate::error::{EngineError, SyncError};

pub mod bulk;
pub mod elasticsearch;
pub mod in_mem;

pub use elasticsearch::{ElasticsearchEngine, ElasticsearchEngineConfig};
pub use in_mem::InMemoryEngine;

/// ❌ One document the engine refused, and its stated reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub id: String,
    pub reason: String,
}

/// 📋 Per-batch verdict. Partial success is still success, with a list of casualties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkIndexResult {
    pub succeeded_ids: Vec<String>,
    pub failed: Vec<FailedItem>,
}

impl BulkIndexResult {
    pub fn succeeded(&self) -> u64 {
        self.succeeded_ids.len() as u64
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.len() as u64
    }
}

/// 📡 A search engine that can (re)create an index and take bulk writes.
///
/// # Contract 📜
/// - One call = one attempt. No retries in here.
/// - `send_bulk` returns `Ok` whenever the engine answered 2xx, even if some items failed.
/// - `put_mapping` leaves a fresh, empty index with the given mapping.
#[async_trait]
pub trait SearchEngine: std::fmt::Debug + Send + Sync {
    async fn put_mapping(&self, index: &str, mapping: &Value) -> Result<(), EngineError>;
    async fn send_bulk(&self, index: &str, documents: &[Document]) -> Result<BulkIndexResult, EngineError>;
}

/// 🎭 The many faces of a search engine.
#[derive(Debug, Clone)]
pub enum EngineBackend {
    InMemory(InMemoryEngine),
    Elasticsearch(ElasticsearchEngine),
}

#[async_trait]
impl SearchEngine for EngineBackend {
    async fn put_mapping(&self, index: &str, mapping: &Value) -> Result<(), EngineError> {
        match self {
            EngineBackend::InMemory(engine) => engine.put_mapping(index, mapping).await,
            EngineBackend::Elasticsearch(engine) => engine.put_mapping(index, mapping).await,
        }
    }

    async fn send_bulk(&self, index: &str, documents: &[Document]) -> Result<BulkIndexResult, EngineError> {
        match self {
            EngineBackend::InMemory(engine) => engine.send_bulk(index, documents).await,
            EngineBackend::Elasticsearch(engine) => engine.send_bulk(index, documents).await,
        }
    }
}

/// 🔁 How hard we try before declaring the cluster gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// 🚚 The bulk index client: engine + retry policy.
#[derive(Debug, Clone)]
pub struct BulkIndexClient {
    engine: EngineBackend,
    retry: RetryPolicy,
}

impl BulkIndexClient {
    pub fn new(engine: EngineBackend, retry: RetryPolicy) -> Self {
        Self { engine, retry }
    }

    pub fn engine(&self) -> &EngineBackend {
        &self.engine
    }

    /// 🗺️ Create the mapping. Single attempt on purpose: a wrong schema is not a hiccup.
    pub async fn put_mapping(&self, index: &str, mapping: &Value) -> Result<(), SyncError> {
        self.engine
            .put_mapping(index, mapping)
            .await
            .map_err(|e| SyncError::Mapping {
                index: index.to_string(),
                reason: e.to_string(),
            })
    }

    /// 📡 Send one batch, retrying whole-request failures with exponential backoff.
    ///
    /// Per-item rejections come back inside `Ok`. Only transport errors, 429 and 5xx are
    /// retried. Anything else, or running out of attempts, becomes `SyncError::Transport`.
    pub async fn bulk_index(&self, index: &str, documents: &[Document]) -> Result<BulkIndexResult, SyncError> {
        if documents.is_empty() {
            // -- 🪶 no empty bulk requests. Elasticsearch doesn't want them and neither do we.
            return Ok(BulkIndexResult::default());
        }

        let max_attempts = self.retry.max_attempts.max(1);
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry.initial_backoff)
            .with_max_interval(self.retry.max_backoff)
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!(attempt, index, docs = documents.len(), "📡 sending bulk request");
            match self.engine.send_bulk(index, documents).await {
                Ok(result) => return Ok(result),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let wait = backoff.next_backoff().unwrap_or(self.retry.max_backoff);
                    warn!(
                        error = %err,
                        attempt,
                        retry_in_ms = wait.as_millis() as u64,
                        "🔁 bulk request failed, backing off before the next try"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(err) => {
                    error!(error = %err, attempts = attempt, retryable = err.is_retryable(), "💀 bulk request gave up");
                    return Err(SyncError::Transport {
                        index: index.to_string(),
                        attempts: attempt,
                        reason: err.to_string(),
                    });
                }
            }
        }
    }
}
