use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::checkpoint::{LastSyncReport, SyncCheckpoint};
use crate::error::StoreError;
use crate::store::{Interrupt, ProgressStore, Scope, not_owner};

/// 🧠 A progress store that lives and dies with the process.
///
/// Clones share the same maps, so the orchestrator, the endpoint and the test all see one
/// truth. Claim and owner checks happen under one lock, which makes them atomic for free.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Scopes>>,
}

#[derive(Debug, Default)]
struct Scopes {
    checkpoints: HashMap<Scope, SyncCheckpoint>,
    interrupts: HashMap<Scope, Interrupt>,
    last_syncs: HashMap<Scope, LastSyncReport>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for InMemoryStore {
    async fn get_checkpoint(&self, scope: &Scope) -> Result<Option<SyncCheckpoint>, StoreError> {
        Ok(self.inner.lock().await.checkpoints.get(scope).cloned())
    }

    async fn claim_checkpoint(&self, scope: &Scope, checkpoint: &SyncCheckpoint) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.checkpoints.contains_key(scope) {
            return Err(StoreError::AlreadyClaimed(scope.key()));
        }
        inner.checkpoints.insert(*scope, checkpoint.clone());
        Ok(())
    }

    async fn save_checkpoint(&self, scope: &Scope, checkpoint: &SyncCheckpoint) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.checkpoints.get_mut(scope) {
            Some(stored) if stored.sync_id == checkpoint.sync_id => {
                *stored = checkpoint.clone();
                Ok(())
            }
            _ => Err(not_owner(scope, checkpoint.sync_id)),
        }
    }

    async fn release_checkpoint(&self, scope: &Scope, sync_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.checkpoints.get(scope).is_some_and(|c| c.sync_id == sync_id) {
            inner.checkpoints.remove(scope);
            return Ok(true);
        }
        Ok(false)
    }

    async fn clear_checkpoint(&self, scope: &Scope) -> Result<(), StoreError> {
        self.inner.lock().await.checkpoints.remove(scope);
        Ok(())
    }

    async fn get_interrupt(&self, scope: &Scope) -> Result<Interrupt, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .interrupts
            .get(scope)
            .copied()
            .unwrap_or_default())
    }

    async fn set_interrupt(&self, scope: &Scope, interrupt: Interrupt) -> Result<(), StoreError> {
        self.inner.lock().await.interrupts.insert(*scope, interrupt);
        Ok(())
    }

    async fn clear_interrupt(&self, scope: &Scope) -> Result<(), StoreError> {
        self.inner.lock().await.interrupts.remove(scope);
        Ok(())
    }

    async fn clear_interrupt_if(&self, scope: &Scope, expected: Interrupt) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let current = inner.interrupts.get(scope).copied().unwrap_or_default();
        if current != expected {
            return Ok(false);
        }
        inner.interrupts.remove(scope);
        Ok(true)
    }

    async fn get_last_sync(&self, scope: &Scope) -> Result<Option<LastSyncReport>, StoreError> {
        Ok(self.inner.lock().await.last_syncs.get(scope).cloned())
    }

    async fn save_last_sync(&self, scope: &Scope, report: &LastSyncReport) -> Result<(), StoreError> {
        self.inner.lock().await.last_syncs.insert(*scope, report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::SyncOptions;
    use std::collections::VecDeque;

    fn checkpoint() -> SyncCheckpoint {
        SyncCheckpoint::new(SyncOptions::cli(), VecDeque::new())
    }

    #[tokio::test]
    async fn the_one_where_two_starters_race_and_one_goes_home() -> Result<(), StoreError> {
        let store = InMemoryStore::new();
        let scope = Scope::Site(1);
        let (first, second) = (checkpoint(), checkpoint());

        let (a, b) = tokio::join!(store.claim_checkpoint(&scope, &first), store.claim_checkpoint(&scope, &second));
        assert!(a.is_ok() ^ b.is_ok(), "exactly one claim wins");
        assert!(store.get_checkpoint(&scope).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_stranger_cannot_save_over_the_owner() -> Result<(), StoreError> {
        let store = InMemoryStore::new();
        let scope = Scope::Network;
        let owner = checkpoint();
        store.claim_checkpoint(&scope, &owner).await?;

        let stranger = checkpoint();
        let err = store
            .save_checkpoint(&scope, &stranger)
            .await
            .expect_err("💀 a different sync_id must be refused");
        assert!(matches!(err, StoreError::NotOwner { .. }));

        assert!(!store.release_checkpoint(&scope, stranger.sync_id).await?);
        assert!(store.release_checkpoint(&scope, owner.sync_id).await?);
        assert!(store.save_checkpoint(&scope, &owner).await.is_err(), "a released checkpoint stays gone");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_flags_are_per_scope() -> Result<(), StoreError> {
        let store = InMemoryStore::new();
        store.set_interrupt(&Scope::Site(1), Interrupt::Pause).await?;
        assert_eq!(store.get_interrupt(&Scope::Site(1)).await?, Interrupt::Pause);
        assert_eq!(store.get_interrupt(&Scope::Site(2)).await?, Interrupt::None);
        store.clear_interrupt(&Scope::Site(1)).await?;
        assert_eq!(store.get_interrupt(&Scope::Site(1)).await?, Interrupt::None);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_late_stop_survives_the_pause_cleanup() -> Result<(), StoreError> {
        let store = InMemoryStore::new();
        let scope = Scope::Site(1);
        store.set_interrupt(&scope, Interrupt::Pause).await?;
        // -- 🛑 somebody hits stop after the runner read "pause"
        store.set_interrupt(&scope, Interrupt::Stop).await?;
        assert!(!store.clear_interrupt_if(&scope, Interrupt::Pause).await?);
        assert_eq!(store.get_interrupt(&scope).await?, Interrupt::Stop);

        assert!(store.clear_interrupt_if(&scope, Interrupt::Stop).await?);
        assert_eq!(store.get_interrupt(&scope).await?, Interrupt::None);
        Ok(())
    }
}
