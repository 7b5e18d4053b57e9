//! 🗄️ Progress Store: where checkpoints sleep between invocations.
//!
//! 🧠 Knowledge graph:
//! - Three durable values per scope: the checkpoint, the interrupt flag, the last sync report.
//! - `claim_checkpoint` is an atomic create. Two starters race, one wins, one gets
//!   `AlreadyClaimed`. No read-then-write window.
//! - `save_checkpoint` is owner-checked: the stored `sync_id` must match. A stopped or
//!   restarted run finds out on its next save and backs off.
//! - Backends: `InMemoryStore` (shared map, tests) and `FileStore` (a directory per scope).
//!   Same trait + enum dispatch shape as the engine and the content sources.
//! - There is NO cache in front of the interrupt flag. Every `get_interrupt` asks the backend.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checkpoint::{LastSyncReport, SyncCheckpoint};
use crate::error::StoreError;

pub mod file;
pub mod in_mem;

pub use file::FileStore;
pub use in_mem::InMemoryStore;

/// 🏘️ Which slice of the world a sync covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Scope {
    Site(u64),
    Network,
}

impl Default for Scope {
    fn default() -> Self {
        Scope::Site(1)
    }
}

impl Scope {
    /// 🔑 Namespace key: `site-{id}` or `network`.
    pub fn key(&self) -> String {
        match self {
            Scope::Site(id) => format!("site-{id}"),
            Scope::Network => "network".to_string(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// 🚨 Out-of-band request from a controller to the running sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interrupt {
    #[default]
    None,
    Pause,
    Stop,
}

impl Interrupt {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interrupt::None => "none",
            Interrupt::Pause => "pause",
            Interrupt::Stop => "stop",
        }
    }

    /// 🔍 Parse the on-disk spelling. Anything unrecognized reads as no interrupt.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "pause" => Interrupt::Pause,
            "stop" => Interrupt::Stop,
            _ => Interrupt::None,
        }
    }
}

/// 🗄️ Durable per-scope progress state.
///
/// # Contract 📜
/// - `claim_checkpoint` fails with `AlreadyClaimed` if any checkpoint exists for the scope.
/// - `save_checkpoint` fails with `NotOwner` if the stored checkpoint is missing or has a
///   different `sync_id`.
/// - `release_checkpoint` deletes only if the stored `sync_id` matches; returns whether it did.
/// - `clear_interrupt_if` clears only if the stored flag is still `expected`, so a stop
///   written after a pause was read is never wiped by the pause's cleanup.
/// - Reads never come from a cache.
#[async_trait]
pub trait ProgressStore: std::fmt::Debug + Send + Sync {
    async fn get_checkpoint(&self, scope: &Scope) -> Result<Option<SyncCheckpoint>, StoreError>;
    async fn claim_checkpoint(&self, scope: &Scope, checkpoint: &SyncCheckpoint) -> Result<(), StoreError>;
    async fn save_checkpoint(&self, scope: &Scope, checkpoint: &SyncCheckpoint) -> Result<(), StoreError>;
    async fn release_checkpoint(&self, scope: &Scope, sync_id: Uuid) -> Result<bool, StoreError>;
    async fn clear_checkpoint(&self, scope: &Scope) -> Result<(), StoreError>;
    async fn get_interrupt(&self, scope: &Scope) -> Result<Interrupt, StoreError>;
    async fn set_interrupt(&self, scope: &Scope, interrupt: Interrupt) -> Result<(), StoreError>;
    async fn clear_interrupt(&self, scope: &Scope) -> Result<(), StoreError>;
    async fn clear_interrupt_if(&self, scope: &Scope, expected: Interrupt) -> Result<bool, StoreError>;
    async fn get_last_sync(&self, scope: &Scope) -> Result<Option<LastSyncReport>, StoreError>;
    async fn save_last_sync(&self, scope: &Scope, report: &LastSyncReport) -> Result<(), StoreError>;
}

pub(crate) fn not_owner(scope: &Scope, sync_id: Uuid) -> StoreError {
    StoreError::NotOwner {
        scope: scope.key(),
        sync_id: sync_id.to_string(),
    }
}

/// 🎭 The many faces of a progress store.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    InMemory(InMemoryStore),
    File(FileStore),
}

// -- 🔀 enum dispatch, one arm per backend, no vtables were harmed
macro_rules! dispatch {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            StoreBackend::InMemory($store) => $call,
            StoreBackend::File($store) => $call,
        }
    };
}

#[async_trait]
impl ProgressStore for StoreBackend {
    async fn get_checkpoint(&self, scope: &Scope) -> Result<Option<SyncCheckpoint>, StoreError> {
        dispatch!(self, store => store.get_checkpoint(scope).await)
    }

    async fn claim_checkpoint(&self, scope: &Scope, checkpoint: &SyncCheckpoint) -> Result<(), StoreError> {
        dispatch!(self, store => store.claim_checkpoint(scope, checkpoint).await)
    }

    async fn save_checkpoint(&self, scope: &Scope, checkpoint: &SyncCheckpoint) -> Result<(), StoreError> {
        dispatch!(self, store => store.save_checkpoint(scope, checkpoint).await)
    }

    async fn release_checkpoint(&self, scope: &Scope, sync_id: Uuid) -> Result<bool, StoreError> {
        dispatch!(self, store => store.release_checkpoint(scope, sync_id).await)
    }

    async fn clear_checkpoint(&self, scope: &Scope) -> Result<(), StoreError> {
        dispatch!(self, store => store.clear_checkpoint(scope).await)
    }

    async fn get_interrupt(&self, scope: &Scope) -> Result<Interrupt, StoreError> {
        dispatch!(self, store => store.get_interrupt(scope).await)
    }

    async fn set_interrupt(&self, scope: &Scope, interrupt: Interrupt) -> Result<(), StoreError> {
        dispatch!(self, store => store.set_interrupt(scope, interrupt).await)
    }

    async fn clear_interrupt(&self, scope: &Scope) -> Result<(), StoreError> {
        dispatch!(self, store => store.clear_interrupt(scope).await)
    }

    async fn clear_interrupt_if(&self, scope: &Scope, expected: Interrupt) -> Result<bool, StoreError> {
        dispatch!(self, store => store.clear_interrupt_if(scope, expected).await)
    }

    async fn get_last_sync(&self, scope: &Scope) -> Result<Option<LastSyncReport>, StoreError> {
        dispatch!(self, store => store.get_last_sync(scope).await)
    }

    async fn save_last_sync(&self, scope: &Scope, report: &LastSyncReport) -> Result<(), StoreError> {
        dispatch!(self, store => store.save_last_sync(scope, report).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_scopes_get_their_own_drawers() {
        assert_eq!(Scope::Site(7).key(), "site-7");
        assert_eq!(Scope::Network.key(), "network");
        assert_eq!(Scope::default().to_string(), "site-1");
    }

    #[test]
    fn the_one_where_the_flag_reads_back_what_was_written() {
        for flag in [Interrupt::None, Interrupt::Pause, Interrupt::Stop] {
            assert_eq!(Interrupt::parse(flag.as_str()), flag);
        }
        assert_eq!(Interrupt::parse("stop\n"), Interrupt::Stop);
        assert_eq!(Interrupt::parse("banana"), Interrupt::None);
    }

    #[test]
    fn the_one_where_a_scope_is_configurable_as_toml_ish_json() -> Result<(), serde_json::Error> {
        let site: Scope = serde_json::from_str(r#"{"type":"site","id":3}"#)?;
        let network: Scope = serde_json::from_str(r#"{"type":"network"}"#)?;
        assert_eq!(site, Scope::Site(3));
        assert_eq!(network, Scope::Network);
        Ok(())
    }
}
