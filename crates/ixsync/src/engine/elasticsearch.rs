//! 📡 Elasticsearch over reqwest: DELETE + PUT for mappings, `POST /_bulk` for documents.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::common::Document;
use crate::engine::bulk::{parse_bulk_response, render_bulk_body};
use crate::engine::{BulkIndexResult, SearchEngine};
use crate::error::EngineError;

// -- 📡 ElasticsearchEngineConfig: where the cluster lives and how to get past the bouncer.
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchEngineConfig {
    /// 📡 Where to send the documents.
    pub url: String,
    /// 🔒 Username. The bouncer at the club. Except the club is a database.
    #[serde(default)]
    pub username: Option<String>,
    /// 🔒 Password. "password123" is not a password. It is a confession.
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 API key: the velvet rope variant of authentication. Wins over basic auth.
    #[serde(default)]
    pub api_key: Option<String>,
    /// 🏷️ Every index name starts with this. `wp-post-1`, `wp-user`...
    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,
}

pub fn default_index_prefix() -> String {
    "wp".to_string()
}

impl ElasticsearchEngineConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            api_key: None,
            index_prefix: default_index_prefix(),
        }
    }
}

/// 📡 The Elasticsearch side of the engine: pure I/O, one attempt per call.
///
/// Holds a `reqwest::Client` (reused across requests, the connection pool thanks you) and
/// the config. Retries live in `BulkIndexClient`. This type only knows how to ask once.
///
/// Knock knock. Who's there? HTTP POST. HTTP POST who? HTTP POST your NDJSON
/// and hope the cluster's in a good mood.
#[derive(Debug, Clone)]
pub struct ElasticsearchEngine {
    client: reqwest::Client,
    config: ElasticsearchEngineConfig,
}

impl ElasticsearchEngine {
    /// 🚀 Build the client and ping the cluster root.
    ///
    /// 10s connect timeout because if ES can't handshake in 10 seconds, it's not having a
    /// good time and neither are we. 30s overall because bulk requests can be meaty.
    /// The ping fails loudly here, rather than quietly 50,000 docs later.
    pub async fn connect(config: ElasticsearchEngineConfig) -> Result<Self> {
        let engine = Self::new(config)?;
        let response = engine
            .authorize(engine.client.get(&engine.config.url))
            .send()
            .await
            .context(format!(
                "💀 Could not reach Elasticsearch at '{}'. We said hello and the network said nothing. \
                 Check the URL, check the firewall, check that the cluster is actually up.",
                engine.config.url
            ))?;
        if !response.status().is_success() {
            anyhow::bail!(
                "💀 Elasticsearch at '{}' answered the ping with {}. Check your credentials; the bouncer is not impressed.",
                engine.config.url,
                response.status()
            );
        }
        debug!("✅ Elasticsearch at '{}' is home and answering the door", engine.config.url);
        Ok(engine)
    }

    /// 🔧 Build without pinging. For when you already know the cluster is there.
    pub fn new(config: ElasticsearchEngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("💀 The HTTP client refused to be born. The TLS stack wept. Probably a missing TLS cert or a cursed system OpenSSL. Either way: tragic.")?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ElasticsearchEngineConfig {
        &self.config
    }

    fn index_url(&self, index: &str) -> String {
        // -- One slash of difference. Infinite suffering of difference.
        format!("{}/{}", self.config.url.trim_end_matches('/'), index)
    }

    /// 🔒 Auth priority: API key wins over basic auth. This is not a democracy.
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("ApiKey {api_key}"))
        } else if let Some(ref username) = self.config.username {
            request.basic_auth(username, self.config.password.as_ref())
        } else {
            request
        }
    }
}

async fn fail_with_body(response: reqwest::Response) -> EngineError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    EngineError::Status { status, body }
}

#[async_trait]
impl SearchEngine for ElasticsearchEngine {
    /// 🗺️ DELETE the index (404 is fine, it was never there), then PUT it back with the mapping.
    async fn put_mapping(&self, index: &str, mapping: &Value) -> Result<(), EngineError> {
        let url = self.index_url(index);

        let deleted = self
            .authorize(self.client.delete(&url))
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        if !deleted.status().is_success() && deleted.status().as_u16() != 404 {
            return Err(fail_with_body(deleted).await);
        }
        trace!("🗑️ index '{index}' cleared for a fresh mapping");

        let body = serde_json::to_string(mapping).map_err(|e| EngineError::Transport(e.to_string()))?;
        let created = self
            .authorize(self.client.put(&url))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        if !created.status().is_success() {
            return Err(fail_with_body(created).await);
        }
        debug!("🗺️ mapping for '{index}' is in place");
        Ok(())
    }

    /// 📡 POST the NDJSON body to `/_bulk` and read the per-item verdicts.
    async fn send_bulk(&self, index: &str, documents: &[Document]) -> Result<BulkIndexResult, EngineError> {
        let payload = render_bulk_body(index, documents);
        debug!(
            "📡 Sending {} bytes to /_bulk, the payload has left the building, Elvis-style",
            payload.len()
        );
        let bulk_url = format!("{}/_bulk", self.config.url.trim_end_matches('/'));
        let response = self
            .authorize(self.client.post(&bulk_url))
            // ⚠️ application/x-ndjson, not application/json. The x- prefix means
            // "we made this up but we're committing to it."
            .header("Content-Type", "application/x-ndjson")
            .body(payload)
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(fail_with_body(response).await);
        }
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        parse_bulk_response(&body, documents)
    }
}
