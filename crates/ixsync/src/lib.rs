//! 🚀 ixsync: resumable search-index sync.
//!
//! 🎬 Walk every registered content type, serialize objects into documents, ship them to
//! the search engine in bulk batches, and write down where we are after every batch so a
//! killed process picks up exactly where it left off. A dashboard can watch and steer the
//! whole thing through the progress protocol.
//!
//! 🧠 Knowledge graph:
//! - `orchestrator`: the state machine. Everything else serves it.
//! - `checkpoint` + `store`: the persisted run state, claimed atomically, owner-checked.
//! - `indexables` + `enumerator` + `serializer`: where objects come from and how they page.
//! - `engine`: bulk indexing with retry, Elasticsearch or in-memory.
//! - `protocol`: the progress endpoint, the client, the poller.
//! - `workers`: background driving of `run_slice`.
//! - `app_config` + `progress`: the outer shell a CLI needs.

pub mod app_config;
pub mod checkpoint;
pub mod common;
pub mod engine;
pub mod enumerator;
pub mod error;
pub mod indexables;
pub mod orchestrator;
pub mod progress;
pub mod protocol;
pub mod serializer;
pub mod store;
pub mod workers;

pub use app_config::{AppConfig, load_config};
pub use error::{EngineError, ProtocolError, SerializeError, StoreError, SyncError};
pub use orchestrator::{ExecutionBudget, RunOutcome, SyncOrchestrator};
