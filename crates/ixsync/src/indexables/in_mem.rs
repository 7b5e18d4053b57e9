//! # Previously, on ixsync...
//!
//! 🎬 The content system was a black box. Somebody had to pretend to be it.
//! That somebody lives entirely in RAM, keyed by id, sorted like a librarian with opinions.
//!
//! `InMemorySource` is the content source for tests and demos. Clones share the same
//! map, so a test can hand one clone to the orchestrator and keep another to insert and
//! delete rows mid-sync. That is exactly how we prove the id cursor never looks back.
//!
//! ⚠️ Not for production. If you deploy this to prod, please also deploy a therapist. 🦆

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::common::{ObjectPage, SourceObject};
use crate::indexables::{ContentSource, Cursor, ObjectQuery};

/// 📦 A sorted, shared, mutable pile of source objects.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    objects: Arc<RwLock<BTreeMap<u64, SourceObject>>>,
    // 🔌 flip to true and every query errors, like the database fell over
    unavailable: Arc<AtomicBool>,
}

impl InMemorySource {
    /// 🏗️ Seed from a list. Later ids overwrite earlier duplicates, like a real upsert.
    pub fn from_objects(objects: impl IntoIterator<Item = SourceObject>) -> Self {
        let map = objects.into_iter().map(|o| (o.id, o)).collect();
        Self {
            objects: Arc::new(RwLock::new(map)),
            unavailable: Arc::default(),
        }
    }

    pub async fn insert(&self, object: SourceObject) {
        self.objects.write().await.insert(object.id, object);
    }

    pub async fn remove(&self, id: u64) -> Option<SourceObject> {
        self.objects.write().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// 🔌 Simulate the content system going away.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("💀 in-memory content source is marked unavailable. The database is out to lunch");
        }
        Ok(())
    }
}

/// 🔎 Apply filters + cursor + page size to an id-ordered iterator.
///
/// Shared with the file source, which is an in-memory source that read a file first.
pub(crate) fn select_page<'a>(
    objects: impl Iterator<Item = &'a SourceObject>,
    query: &ObjectQuery,
) -> ObjectPage {
    let offset = match query.cursor {
        Cursor::Offset { offset } => offset as usize,
        Cursor::IdRange { .. } | Cursor::Exhausted => 0,
    };
    let objects = objects
        .filter(|o| query.matches(o))
        .skip(offset)
        .take(query.per_page)
        .cloned()
        .collect();
    ObjectPage { objects }
}

#[async_trait]
impl ContentSource for InMemorySource {
    async fn query(&self, query: &ObjectQuery) -> Result<ObjectPage> {
        self.ensure_available()?;
        let objects = self.objects.read().await;
        Ok(select_page(objects.values(), query))
    }

    async fn count(&self, query: &ObjectQuery) -> Result<u64> {
        self.ensure_available()?;
        let objects = self.objects.read().await;
        let matching = objects.values().filter(|o| query.matches(o)).count() as u64;
        // -- 🧮 an offset start means the first `offset` rows are somebody else's problem
        let skipped = match query.cursor {
            Cursor::Offset { offset } => offset,
            Cursor::IdRange { .. } | Cursor::Exhausted => 0,
        };
        Ok(matching.saturating_sub(skipped))
    }
}
