//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." -- every developer at 3am 🦆
//!
//! 🧠 Knowledge graph:
//! - `load_config` layers `IXSYNC_*` env vars under an optional TOML file. TOML wins.
//!   Nested keys use `__` in env vars: `IXSYNC_SYNC__BATCH_SIZE=500`.
//! - `AppConfig` knows how to turn itself into the live objects: the indexable registry,
//!   the progress store, the bulk client, a `SyncOrchestrator`, and for `ixsync serve` the
//!   `ProgressEndpoint` in front of it.
//! - Enum configs are externally tagged, same as always: `[engine.Elasticsearch]`,
//!   `[store.File]`, `source = "InMemory"`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::engine::{BulkIndexClient, ElasticsearchEngine, ElasticsearchEngineConfig, EngineBackend, InMemoryEngine, RetryPolicy};
use crate::indexables::{ContentSourceBackend, FileSource, FileSourceConfig, InMemorySource, Indexable, IndexableDescriptor, IndexableRegistry};
use crate::orchestrator::{ExecutionBudget, OrchestratorSettings, SyncOrchestrator};
use crate::protocol::{EndpointMode, ProgressEndpoint, TokenIssuer};
use crate::serializer::DocumentSerializer;
use crate::store::{FileStore, InMemoryStore, Scope, StoreBackend};

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 🏘️ Which site (or the whole network) this process syncs.
    #[serde(default)]
    pub scope: Scope,
    /// 🌐 Site ids walked by a network-scoped sync for per-site indexables.
    #[serde(default)]
    pub network_sites: Vec<u64>,
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub serve: ServeConfig,
    #[serde(default)]
    pub indexables: Vec<IndexableConfig>,
}

/// 🛰️ How `ixsync serve` exposes the progress endpoint.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServeConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// 🚗 Nothing runs between requests; dashboards push the sync with `continue`.
    #[serde(default)]
    pub stateless: bool,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8787))
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            stateless: false,
        }
    }
}

/// 📡 Where documents go.
#[derive(Debug, Deserialize, Clone)]
pub enum EngineConfig {
    Elasticsearch(ElasticsearchEngineConfig),
    /// 🧪 Keeps everything in memory. Tests, demos, dry runs.
    InMemory,
}

/// 💾 Where checkpoints, interrupt flags and last-sync reports live.
#[derive(Debug, Deserialize, Clone)]
pub enum StoreConfig {
    File { dir: PathBuf },
    InMemory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::File {
            dir: PathBuf::from(".ixsync"),
        }
    }
}

/// 🎛️ Run-time knobs.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_bulk_max_attempts")]
    pub bulk_max_attempts: u32,
    #[serde(default = "default_bulk_initial_backoff_ms")]
    pub bulk_initial_backoff_ms: u64,
    #[serde(default = "default_bulk_max_backoff_ms")]
    pub bulk_max_backoff_ms: u64,
    /// ⏱️ Per-invocation budget for hosts that cannot run in the background.
    #[serde(default)]
    pub max_batches_per_invocation: Option<u32>,
    #[serde(default = "default_max_seconds_per_invocation")]
    pub max_seconds_per_invocation: Option<u64>,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    /// 🛑 Ctrl-C keeps the checkpoint by default so the next `sync` resumes.
    #[serde(default)]
    pub clear_checkpoint_on_sigint: bool,
}

fn default_batch_size() -> usize {
    350
}

fn default_bulk_max_attempts() -> u32 {
    3
}

fn default_bulk_initial_backoff_ms() -> u64 {
    250
}

fn default_bulk_max_backoff_ms() -> u64 {
    5_000
}

fn default_max_seconds_per_invocation() -> Option<u64> {
    Some(20)
}

fn default_token_ttl_secs() -> u64 {
    600
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            bulk_max_attempts: default_bulk_max_attempts(),
            bulk_initial_backoff_ms: default_bulk_initial_backoff_ms(),
            bulk_max_backoff_ms: default_bulk_max_backoff_ms(),
            max_batches_per_invocation: None,
            max_seconds_per_invocation: default_max_seconds_per_invocation(),
            token_ttl_secs: default_token_ttl_secs(),
            clear_checkpoint_on_sigint: false,
        }
    }
}

impl SyncConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.bulk_max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.bulk_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.bulk_max_backoff_ms),
        }
    }

    /// ⏱️ The slice budget for one stateless invocation.
    pub fn invocation_budget(&self) -> ExecutionBudget {
        let budget = ExecutionBudget {
            max_batches: self.max_batches_per_invocation,
            max_duration: None,
        };
        match self.max_seconds_per_invocation {
            Some(secs) => budget.with_duration(Duration::from_secs(secs)),
            None => budget,
        }
    }

    pub fn token_issuer(&self) -> TokenIssuer {
        TokenIssuer::new(Duration::from_secs(self.token_ttl_secs))
    }
}

/// 🗂️ One content type, as declared in config.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexableConfig {
    pub slug: String,
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub supports_range_pagination: bool,
    pub source: IndexableSourceConfig,
    /// 🗺️ JSON file with the index settings + mappings. Absent means dynamic mapping.
    #[serde(default)]
    pub mapping_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub enum IndexableSourceConfig {
    File(FileSourceConfig),
    InMemory,
}

impl IndexableConfig {
    fn descriptor(&self) -> IndexableDescriptor {
        let mut descriptor = IndexableDescriptor::new(&self.slug);
        descriptor.is_global = self.is_global;
        descriptor.supports_range_pagination = self.supports_range_pagination;
        descriptor
    }

    async fn build(&self) -> Result<Indexable> {
        let source = match self.source {
            IndexableSourceConfig::File(ref config) => ContentSourceBackend::File(
                FileSource::open(config.clone())
                    .await
                    .with_context(|| format!("💀 Indexable '{}' could not open its content file.", self.slug))?,
            ),
            IndexableSourceConfig::InMemory => ContentSourceBackend::InMemory(InMemorySource::from_objects(Vec::new())),
        };
        let mut indexable = Indexable::new(self.descriptor(), source);
        if let Some(ref mapping_file) = self.mapping_file {
            indexable = indexable.with_mapping(read_mapping(mapping_file).await?);
        }
        Ok(indexable)
    }
}

async fn read_mapping(path: &Path) -> Result<Value> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("💀 Mapping file '{}' could not be read. It exists in our hearts, but apparently not on disk.", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("💀 Mapping file '{}' is not valid JSON. The cluster would have rejected it anyway.", path.display()))
}

impl AppConfig {
    pub fn index_prefix(&self) -> String {
        match self.engine {
            EngineConfig::Elasticsearch(ref config) => config.index_prefix.clone(),
            EngineConfig::InMemory => crate::engine::elasticsearch::default_index_prefix(),
        }
    }

    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            index_prefix: self.index_prefix(),
            batch_size: self.sync.batch_size.max(1),
            network_sites: self.network_sites.clone(),
        }
    }

    /// 📚 Registry in declaration order. Duplicate slugs are a config error.
    pub async fn build_registry(&self) -> Result<IndexableRegistry> {
        let mut registry = IndexableRegistry::new();
        for indexable in &self.indexables {
            registry
                .register(indexable.build().await?)
                .with_context(|| format!("💀 Indexable '{}' could not be registered.", indexable.slug))?;
        }
        debug!("📚 registered indexables: {:?}", registry.slugs());
        Ok(registry)
    }

    pub async fn build_store(&self) -> Result<StoreBackend> {
        match self.store {
            StoreConfig::File { ref dir } => {
                let store = FileStore::open(dir.clone()).await.with_context(|| {
                    format!(
                        "💀 Progress store directory '{}' is not usable. Check that it exists and that we may write there.",
                        dir.display()
                    )
                })?;
                Ok(StoreBackend::File(store))
            }
            StoreConfig::InMemory => Ok(StoreBackend::InMemory(InMemoryStore::new())),
        }
    }

    /// 🚚 Bulk client over the configured engine. `ping` checks the cluster answers first.
    pub async fn build_bulk_client(&self, ping: bool) -> Result<BulkIndexClient> {
        let engine = match self.engine {
            EngineConfig::Elasticsearch(ref config) if ping => EngineBackend::Elasticsearch(ElasticsearchEngine::connect(config.clone()).await?),
            EngineConfig::Elasticsearch(ref config) => EngineBackend::Elasticsearch(ElasticsearchEngine::new(config.clone())?),
            EngineConfig::InMemory => EngineBackend::InMemory(InMemoryEngine::new()),
        };
        Ok(BulkIndexClient::new(engine, self.sync.retry_policy()))
    }

    /// 🛰️ The progress endpoint over a fully wired orchestrator. Both modes slice work by
    /// the invocation budget; tokens live for `token_ttl_secs`.
    pub async fn build_endpoint(&self, ping: bool) -> Result<ProgressEndpoint> {
        Ok(self.endpoint_for(self.build_orchestrator(ping).await?))
    }

    /// 🛰️ Put the endpoint in front of an orchestrator that already exists.
    pub fn endpoint_for(&self, orchestrator: SyncOrchestrator) -> ProgressEndpoint {
        let budget = self.sync.invocation_budget();
        let mode = if self.serve.stateless {
            EndpointMode::Stateless { budget }
        } else {
            EndpointMode::Background { budget }
        };
        ProgressEndpoint::new(orchestrator, self.sync.token_issuer(), mode)
    }

    /// 🎬 Everything wired together.
    pub async fn build_orchestrator(&self, ping: bool) -> Result<SyncOrchestrator> {
        let registry = self.build_registry().await?;
        let store = self.build_store().await?;
        let bulk = self.build_bulk_client(ping).await?;
        Ok(SyncOrchestrator::new(
            self.scope,
            Arc::new(registry),
            Arc::new(DocumentSerializer::with_default_stages()),
            bulk,
            store,
            self.settings(),
        ))
    }
}

/// 🚀 Load the config: from a file, from env vars, or from the sheer power of hoping.
///
/// - `config_file_name` None → env vars only.
/// - `config_file_name` Some → env vars + TOML file, merged. TOML wins on conflicts.
pub fn load_config(config_file_name: Option<&Path>) -> Result<AppConfig> {
    info!("🔧 Loading configuration: {:?}", config_file_name.unwrap_or(Path::new("")));

    let config = Figment::new().merge(Env::prefixed("IXSYNC_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (IXSYNC_*). \
             Check the enum tables: [engine.Elasticsearch], [store.File], source.File.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (IXSYNC_*). \
                 No file was provided; this one's all on the environment. Classic."
            .to_string(),
    };
    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("ixsync.toml");
        let mut file = std::fs::File::create(&path).expect("💀 temp config should be writable");
        file.write_all(contents.as_bytes())
            .expect("💀 Failed to write test config. The filesystem said 'new phone who dis'.");
        path
    }

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_test_config(&dir, r#"engine = "InMemory""#);
        let config = load_config(Some(path.as_path()))?;

        assert_eq!(config.scope, Scope::Site(1));
        assert_eq!(config.sync, SyncConfig::default());
        assert_eq!(config.sync.batch_size, 350);
        assert!(!config.sync.clear_checkpoint_on_sigint);
        assert!(matches!(config.store, StoreConfig::File { ref dir } if dir == Path::new(".ixsync")));
        assert_eq!(config.serve, ServeConfig::default());
        assert_eq!(config.serve.listen.to_string(), "127.0.0.1:8787");
        assert_eq!(config.index_prefix(), "wp");
        Ok(())
    }

    #[test]
    fn the_one_where_every_knob_gets_turned() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_test_config(
            &dir,
            r#"
            scope = { type = "network" }
            network_sites = [1, 2, 7]

            [engine.Elasticsearch]
            url = "http://localhost:9200"
            api_key = "sekrit"
            index_prefix = "blog"

            store = "InMemory"

            [sync]
            batch_size = 50
            bulk_max_attempts = 5
            max_batches_per_invocation = 4
            clear_checkpoint_on_sigint = true

            [[indexables]]
            slug = "post"
            supports_range_pagination = true
            source = "InMemory"

            [[indexables]]
            slug = "user"
            is_global = true
            source = { File = { file_name = "users.ndjson" } }
            "#,
        );
        let config = load_config(Some(path.as_path()))?;

        assert_eq!(config.scope, Scope::Network);
        assert_eq!(config.network_sites, vec![1, 2, 7]);
        assert_eq!(config.index_prefix(), "blog");
        assert!(matches!(config.store, StoreConfig::InMemory));
        assert_eq!(config.sync.retry_policy().max_attempts, 5);
        assert_eq!(
            config.sync.invocation_budget(),
            ExecutionBudget::batches(4).with_duration(Duration::from_secs(20))
        );
        assert!(config.sync.clear_checkpoint_on_sigint);
        assert_eq!(config.indexables.len(), 2);
        assert!(config.indexables[1].is_global);
        assert!(matches!(config.indexables[1].source, IndexableSourceConfig::File(ref f) if f.file_name == "users.ndjson"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_config_becomes_a_working_orchestrator() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let content = dir.path().join("posts.ndjson");
        std::fs::write(&content, "{\"id\":1,\"post_title\":\"hello\"}\n{\"id\":2,\"post_title\":\"world\"}\n")?;
        let mapping = dir.path().join("post.json");
        std::fs::write(&mapping, r#"{"mappings":{"properties":{"post_title":{"type":"text"}}}}"#)?;
        let store_dir = dir.path().join("store");

        let path = write_test_config(
            &dir,
            &format!(
                r#"
                engine = "InMemory"

                [store.File]
                dir = {store:?}

                [[indexables]]
                slug = "post"
                mapping_file = {mapping:?}
                source = {{ File = {{ file_name = {content:?} }} }}
                "#,
                store = store_dir.display().to_string(),
                mapping = mapping.display().to_string(),
                content = content.display().to_string(),
            ),
        );
        let config = load_config(Some(path.as_path()))?;
        let orchestrator = config.build_orchestrator(false).await?;

        assert_eq!(orchestrator.registry().slugs(), vec!["post".to_string()]);
        let post = orchestrator.registry().get("post").expect("💀 post should be registered");
        assert_eq!(post.mapping["mappings"]["properties"]["post_title"]["type"], "text");
        assert!(matches!(orchestrator.store(), StoreBackend::File(_)));

        orchestrator.start_sync(crate::checkpoint::SyncOptions::cli()).await?;
        let outcome = orchestrator.run_slice(ExecutionBudget::unlimited()).await?;
        assert_eq!(outcome, crate::orchestrator::RunOutcome::Completed);
        let report = orchestrator.last_sync().await?.expect("💀 a finished run leaves a report");
        assert_eq!(report.totals.synced, 2);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_serve_settings_shape_the_endpoint() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_test_config(
            &dir,
            r#"
            engine = "InMemory"
            store = "InMemory"

            [sync]
            max_batches_per_invocation = 2
            token_ttl_secs = 0

            [serve]
            listen = "0.0.0.0:9999"
            stateless = true

            [[indexables]]
            slug = "post"
            source = "InMemory"
            "#,
        );
        let config = load_config(Some(path.as_path()))?;
        assert_eq!(config.serve.listen.port(), 9999);

        let endpoint = config.build_endpoint(false).await?;
        assert_eq!(endpoint.tokens().ttl(), Duration::ZERO);
        assert_eq!(
            endpoint.mode(),
            EndpointMode::Stateless {
                budget: ExecutionBudget::batches(2).with_duration(Duration::from_secs(20))
            }
        );
        // -- ⏱️ zero TTL: the token is dead on arrival, and the endpoint says so
        let token = endpoint.tokens().issue().await;
        let response = endpoint
            .handle(crate::protocol::ProgressRequest::get(crate::protocol::SYNC_PATH).with_token(Some(token)))
            .await;
        assert_eq!(response.status, 403);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_missing_mapping_file_is_named_in_the_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_test_config(
            &dir,
            r#"
            engine = "InMemory"
            store = "InMemory"

            [[indexables]]
            slug = "post"
            source = "InMemory"
            mapping_file = "/definitely/not/here.json"
            "#,
        );
        let config = load_config(Some(path.as_path()))?;
        let err = config.build_registry().await.expect_err("💀 missing mapping file should fail");
        assert!(format!("{err:#}").contains("/definitely/not/here.json"));
        Ok(())
    }
}
