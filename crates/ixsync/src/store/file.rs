use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::checkpoint::{LastSyncReport, SyncCheckpoint};
use crate::error::StoreError;
use crate::store::{Interrupt, ProgressStore, Scope, not_owner};

const CHECKPOINT_FILE: &str = "index_meta.json";
const INTERRUPT_FILE: &str = "interrupt";
const LAST_SYNC_FILE: &str = "last_sync.json";

/// 📂 A progress store on disk: one directory per scope.
///
/// ```text
/// {root}/site-1/index_meta.json   the checkpoint
/// {root}/site-1/interrupt         "pause" | "stop" (absent means none)
/// {root}/site-1/last_sync.json    the last run's report
/// ```
///
/// 🔒 Claim = write a temp file, then hard-link it to `index_meta.json`. The link fails if
/// the target exists, and the filesystem decides the race for us. Updates = temp file +
/// rename, so a reader never sees half a checkpoint.
///
/// ⚠️ Every read hits the disk. A CLI in one terminal and `ixsync pause` in another share
/// nothing but this directory, so there is nothing to cache.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    // -- 🔒 serializes owner-check + write inside this process
    write_lock: Arc<Mutex<()>>,
}

impl FileStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        debug!("🗄️ file progress store ready at '{}'", root.display());
        Ok(Self {
            root,
            write_lock: Arc::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn scope_dir(&self, scope: &Scope) -> Result<PathBuf, StoreError> {
        let dir = self.root.join(scope.key());
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    async fn path(&self, scope: &Scope, file: &str) -> Result<PathBuf, StoreError> {
        Ok(self.scope_dir(scope).await?.join(file))
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("store");
    path.with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4()))
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_interrupt(path: &Path, interrupt: Interrupt) -> Result<(), StoreError> {
    match interrupt {
        Interrupt::None => remove_if_exists(path).await,
        flag => write_atomic(path, flag.as_str().as_bytes()).await,
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let temp = temp_sibling(path);
    tokio::fs::write(&temp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes).await
}

async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ProgressStore for FileStore {
    async fn get_checkpoint(&self, scope: &Scope) -> Result<Option<SyncCheckpoint>, StoreError> {
        read_json(&self.path(scope, CHECKPOINT_FILE).await?).await
    }

    async fn claim_checkpoint(&self, scope: &Scope, checkpoint: &SyncCheckpoint) -> Result<(), StoreError> {
        let target = self.path(scope, CHECKPOINT_FILE).await?;
        let temp = temp_sibling(&target);
        tokio::fs::write(&temp, serde_json::to_vec_pretty(checkpoint)?).await?;

        let linked = tokio::fs::hard_link(&temp, &target).await;
        let _ = tokio::fs::remove_file(&temp).await;
        match linked {
            Ok(()) => {
                trace!("🔒 claimed '{}' for sync {}", target.display(), checkpoint.sync_id);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(StoreError::AlreadyClaimed(scope.key())),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_checkpoint(&self, scope: &Scope, checkpoint: &SyncCheckpoint) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path(scope, CHECKPOINT_FILE).await?;
        match read_json::<SyncCheckpoint>(&path).await? {
            Some(stored) if stored.sync_id == checkpoint.sync_id => write_json(&path, checkpoint).await,
            _ => Err(not_owner(scope, checkpoint.sync_id)),
        }
    }

    async fn release_checkpoint(&self, scope: &Scope, sync_id: Uuid) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path(scope, CHECKPOINT_FILE).await?;
        match read_json::<SyncCheckpoint>(&path).await? {
            Some(stored) if stored.sync_id == sync_id => {
                remove_if_exists(&path).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_checkpoint(&self, scope: &Scope) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        remove_if_exists(&self.path(scope, CHECKPOINT_FILE).await?).await
    }

    async fn get_interrupt(&self, scope: &Scope) -> Result<Interrupt, StoreError> {
        match tokio::fs::read_to_string(self.path(scope, INTERRUPT_FILE).await?).await {
            Ok(raw) => Ok(Interrupt::parse(&raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Interrupt::None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_interrupt(&self, scope: &Scope, interrupt: Interrupt) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        write_interrupt(&self.path(scope, INTERRUPT_FILE).await?, interrupt).await
    }

    async fn clear_interrupt(&self, scope: &Scope) -> Result<(), StoreError> {
        self.set_interrupt(scope, Interrupt::None).await
    }

    async fn clear_interrupt_if(&self, scope: &Scope, expected: Interrupt) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.get_interrupt(scope).await? != expected {
            return Ok(false);
        }
        write_interrupt(&self.path(scope, INTERRUPT_FILE).await?, Interrupt::None).await?;
        Ok(true)
    }

    async fn get_last_sync(&self, scope: &Scope) -> Result<Option<LastSyncReport>, StoreError> {
        read_json(&self.path(scope, LAST_SYNC_FILE).await?).await
    }

    async fn save_last_sync(&self, scope: &Scope, report: &LastSyncReport) -> Result<(), StoreError> {
        write_json(&self.path(scope, LAST_SYNC_FILE).await?, report).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{LogLevel, SyncOptions, SyncOutcome};
    use std::collections::VecDeque;

    fn checkpoint() -> SyncCheckpoint {
        SyncCheckpoint::new(SyncOptions::cli(), VecDeque::new())
    }

    #[tokio::test]
    async fn the_one_where_the_filesystem_referees_the_claim() -> Result<(), StoreError> {
        let dir = tempfile::tempdir()?;
        let store = FileStore::open(dir.path()).await?;
        // -- 🧪 a second handle on the same directory plays the second process
        let other_process = FileStore::open(dir.path()).await?;
        let scope = Scope::Site(1);

        store.claim_checkpoint(&scope, &checkpoint()).await?;
        let err = other_process
            .claim_checkpoint(&scope, &checkpoint())
            .await
            .expect_err("💀 second claim must lose");
        assert!(matches!(err, StoreError::AlreadyClaimed(ref key) if key == "site-1"));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("site-1"))?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files are cleaned up");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_another_process_sees_every_write() -> Result<(), StoreError> {
        let dir = tempfile::tempdir()?;
        let writer = FileStore::open(dir.path()).await?;
        let reader = FileStore::open(dir.path()).await?;
        let scope = Scope::Network;

        let mut owned = checkpoint();
        writer.claim_checkpoint(&scope, &owned).await?;
        owned.push_log(LogLevel::Info, "batch 1 done");
        writer.save_checkpoint(&scope, &owned).await?;
        assert_eq!(reader.get_checkpoint(&scope).await?, Some(owned.clone()));

        reader.set_interrupt(&scope, Interrupt::Pause).await?;
        assert_eq!(writer.get_interrupt(&scope).await?, Interrupt::Pause);
        writer.clear_interrupt(&scope).await?;
        assert_eq!(reader.get_interrupt(&scope).await?, Interrupt::None);

        reader.set_interrupt(&scope, Interrupt::Stop).await?;
        assert!(!writer.clear_interrupt_if(&scope, Interrupt::Pause).await?, "a stop is not a pause");
        assert_eq!(reader.get_interrupt(&scope).await?, Interrupt::Stop);
        assert!(writer.clear_interrupt_if(&scope, Interrupt::Stop).await?);
        assert_eq!(reader.get_interrupt(&scope).await?, Interrupt::None);

        let report = crate::checkpoint::LastSyncReport::from_checkpoint(&owned, SyncOutcome::Completed, None);
        writer.save_last_sync(&scope, &report).await?;
        assert!(writer.release_checkpoint(&scope, owned.sync_id).await?);
        assert!(reader.get_checkpoint(&scope).await?.is_none());
        assert_eq!(
            reader.get_last_sync(&scope).await?.map(|r| r.outcome),
            Some(SyncOutcome::Completed)
        );
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_restarted_run_locks_out_the_old_one() -> Result<(), StoreError> {
        let dir = tempfile::tempdir()?;
        let store = FileStore::open(dir.path()).await?;
        let scope = Scope::Site(2);

        let old = checkpoint();
        store.claim_checkpoint(&scope, &old).await?;
        store.clear_checkpoint(&scope).await?;
        let new = checkpoint();
        store.claim_checkpoint(&scope, &new).await?;

        assert!(matches!(
            store.save_checkpoint(&scope, &old).await,
            Err(StoreError::NotOwner { .. })
        ));
        assert!(store.save_checkpoint(&scope, &new).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_mangled_checkpoint_is_an_error_not_a_fresh_start() -> Result<(), StoreError> {
        let dir = tempfile::tempdir()?;
        let store = FileStore::open(dir.path()).await?;
        std::fs::create_dir_all(dir.path().join("site-1"))?;
        std::fs::write(dir.path().join("site-1").join(CHECKPOINT_FILE), b"{ half a checkp")?;
        assert!(matches!(
            store.get_checkpoint(&Scope::Site(1)).await,
            Err(StoreError::Serialization(_))
        ));
        Ok(())
    }
}
